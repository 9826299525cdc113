//! Root-mean-square deviation after optimal superposition (Kabsch).

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use super::traits::Metric;

pub fn centroid(r: &[Vector3<f64>]) -> Vector3<f64> {
    if r.is_empty() {
        return Vector3::zeros();
    }
    r.iter().sum::<Vector3<f64>>() / r.len() as f64
}

/// RMSD between `state` and `reference` after removing translation and the
/// best proper rotation. Both structures must list the same beads in the
/// same order.
pub fn kabsch_rmsd(state: &[Vector3<f64>], reference: &[Vector3<f64>]) -> f64 {
    let n = state.len().min(reference.len());
    if n == 0 {
        return 0.0;
    }
    let c_p = centroid(&state[..n]);
    let c_q = centroid(&reference[..n]);

    let mut h = Matrix3::zeros();
    for (p, q) in state.iter().zip(reference.iter()) {
        h += (p - c_p) * (q - c_q).transpose();
    }

    let svd = h.svd(true, true);
    let rotation = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => {
            let v = v_t.transpose();
            // Reflection correction keeps det(R) = +1
            let d = (v * u.transpose()).determinant().signum();
            v * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d)) * u.transpose()
        }
        _ => Matrix3::identity(),
    };

    let msd = state
        .iter()
        .zip(reference.iter())
        .map(|(p, q)| (rotation * (p - c_p) - (q - c_q)).norm_squared())
        .sum::<f64>()
        / n as f64;
    msd.sqrt()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct KabschRmsd;

impl Metric for KabschRmsd {
    fn compute(&self, state: &[Vector3<f64>], reference: &[Vector3<f64>]) -> f64 {
        kabsch_rmsd(state, reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;
    use rand_distr::{Distribution, Normal};

    fn random_structure(n: usize) -> Vec<Vector3<f64>> {
        let mut rng = rand::thread_rng();
        let dist = Normal::new(0.0, 5.0).unwrap();
        (0..n).map(|_| Vector3::<f64>::from_distribution(&dist, &mut rng)).collect()
    }

    #[test]
    fn test_rigid_motion_has_zero_rmsd() {
        let reference = random_structure(12);
        let rot = Rotation3::from_euler_angles(0.4, -1.1, 2.3);
        let shift = Vector3::new(10.0, -3.0, 7.5);
        let moved: Vec<_> = reference.iter().map(|p| rot * p + shift).collect();
        assert_relative_eq!(kabsch_rmsd(&moved, &reference), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_mirror_image_is_not_superposable() {
        let reference = random_structure(10);
        let mirrored: Vec<_> = reference.iter().map(|p| Vector3::new(-p.x, p.y, p.z)).collect();
        assert!(kabsch_rmsd(&mirrored, &reference) > 1e-3);
    }

    #[test]
    fn test_known_deviation() {
        // Two beads pulled apart symmetrically along their axis
        let reference = vec![Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)];
        let state = vec![Vector3::new(-2.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0)];
        assert_relative_eq!(kabsch_rmsd(&state, &reference), 1.0, epsilon = 1e-10);
        assert_relative_eq!(KabschRmsd.compute(&state, &reference), 1.0, epsilon = 1e-10);
    }
}
