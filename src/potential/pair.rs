//! Typed bead-pair potential for coarse-grained chains.
//!
//! E = Σ_bonded k_ab (r - r0_ab)² + Σ_{|i-j|≥2} ε_ab exp(-r / λ)
//!
//! where a, b are the type codes of the two beads. Consecutive beads of one
//! structure are bonded; all other pairs feel the repulsion. Every
//! parameter block holds one entry per unordered type pair, stored in an
//! `n_types × n_types` table (only the `lo ≤ hi` half is used).

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};
use crate::error::{CgweError, Result};
use super::traits::{EvalMode, Parameter, Potential, PotentialOutput};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BeadPairPotential {
    /// Number of bead type codes (codes must be `< n_types`)
    pub n_types: usize,
    /// Decay length λ of the repulsive term (Å)
    pub repulsion_length: f64,
}

impl BeadPairPotential {
    pub const BOND_K: usize = 0;
    pub const BOND_R0: usize = 1;
    pub const REPULSION: usize = 2;

    pub fn new(n_types: usize, repulsion_length: f64) -> Self {
        Self { n_types, repulsion_length }
    }

    /// Parameter blocks with every type pair set to the same starting value.
    pub fn init_params(&self, bond_k: f64, bond_r0: f64, repulsion: f64) -> Vec<Parameter> {
        let n = self.n_types * self.n_types;
        vec![
            Parameter::new("bond_k", DVector::from_element(n, bond_k)),
            Parameter::new("bond_r0", DVector::from_element(n, bond_r0)),
            Parameter::new("repulsion", DVector::from_element(n, repulsion)),
        ]
    }

    fn pair_index(&self, a: usize, b: usize) -> usize {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        lo * self.n_types + hi
    }

    fn check_params(&self, params: &[&Parameter]) -> Result<()> {
        if params.len() != 3 {
            return Err(CgweError::shape(format!(
                "bead pair potential expects 3 parameter blocks, got {}",
                params.len()
            )));
        }
        let n = self.n_types * self.n_types;
        for p in params {
            if p.len() != n {
                return Err(CgweError::shape(format!(
                    "parameter '{}' has {} entries, expected {}",
                    p.name,
                    p.len(),
                    n
                )));
            }
        }
        Ok(())
    }
}

/// Split a batch-index array into contiguous `[start, end)` bead ranges.
fn structure_ranges(batch: &[usize]) -> Result<Vec<(usize, usize)>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=batch.len() {
        if i == batch.len() || batch[i] != batch[start] {
            if batch[start] != ranges.len() {
                return Err(CgweError::shape(format!(
                    "batch indices must be contiguous and ordered, found {} at bead {}",
                    batch[start], start
                )));
            }
            ranges.push((start, i));
            start = i;
        }
    }
    Ok(ranges)
}

impl Potential for BeadPairPotential {
    fn evaluate(
        &self,
        params: &[&Parameter],
        embeddings: &[usize],
        positions: &[Vector3<f64>],
        batch: &[usize],
        mode: EvalMode,
    ) -> Result<PotentialOutput> {
        self.check_params(params)?;
        if embeddings.len() != positions.len() || batch.len() != positions.len() {
            return Err(CgweError::shape(format!(
                "{} embeddings, {} positions and {} batch indices",
                embeddings.len(),
                positions.len(),
                batch.len()
            )));
        }
        if let Some(&bad) = embeddings.iter().find(|&&t| t >= self.n_types) {
            return Err(CgweError::config(format!(
                "embedding code {} out of range for {} types",
                bad, self.n_types
            )));
        }

        let bond_k = &params[Self::BOND_K].value;
        let bond_r0 = &params[Self::BOND_R0].value;
        let repulsion = &params[Self::REPULSION].value;
        let lambda = self.repulsion_length;

        let ranges = structure_ranges(batch)?;
        let mut energies = vec![0.0; ranges.len()];
        let mut forces = vec![Vector3::zeros(); positions.len()];
        let mut param_grads = match mode {
            EvalMode::Tracked => Some(
                (0..ranges.len())
                    .map(|_| params.iter().map(|p| DVector::zeros(p.len())).collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
            ),
            EvalMode::ValueOnly => None,
        };

        for (s, &(start, end)) in ranges.iter().enumerate() {
            for i in start..end {
                for j in (i + 1)..end {
                    let d = positions[i] - positions[j];
                    let r = d.norm();
                    let ab = self.pair_index(embeddings[i], embeddings[j]);

                    let de_dr = if j == i + 1 {
                        let dr = r - bond_r0[ab];
                        energies[s] += bond_k[ab] * dr * dr;
                        if let Some(grads) = param_grads.as_mut() {
                            grads[s][Self::BOND_K][ab] += dr * dr;
                            grads[s][Self::BOND_R0][ab] -= 2.0 * bond_k[ab] * dr;
                        }
                        2.0 * bond_k[ab] * dr
                    } else {
                        let ex = (-r / lambda).exp();
                        energies[s] += repulsion[ab] * ex;
                        if let Some(grads) = param_grads.as_mut() {
                            grads[s][Self::REPULSION][ab] += ex;
                        }
                        -repulsion[ab] * ex / lambda
                    };

                    if r > 1e-12 {
                        let f = de_dr * d / r;
                        forces[i] -= f;
                        forces[j] += f;
                    }
                }
            }
        }

        Ok(PotentialOutput { energies, forces, param_grads })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand_distr::{Distribution, Normal};

    fn chain(n: usize) -> Vec<Vector3<f64>> {
        let mut rng = rand::thread_rng();
        let dist = Normal::new(0.0, 0.3).unwrap();
        (0..n)
            .map(|i| Vector3::new(3.8 * i as f64, 0.0, 0.0) + Vector3::<f64>::from_distribution(&dist, &mut rng))
            .collect()
    }

    fn perturbed_params(pot: &BeadPairPotential) -> Vec<Parameter> {
        let mut params = pot.init_params(2.0, 3.8, 1.5);
        for (k, p) in params.iter_mut().enumerate() {
            for (i, v) in p.value.iter_mut().enumerate() {
                *v += 0.01 * ((i + k) % 7) as f64;
            }
        }
        params
    }

    #[test]
    fn test_bond_at_rest_length_has_zero_energy() {
        let pot = BeadPairPotential::new(2, 1.0);
        let params = pot.init_params(5.0, 3.8, 0.0);
        let refs: Vec<&Parameter> = params.iter().collect();
        let pos = vec![Vector3::zeros(), Vector3::new(3.8, 0.0, 0.0)];
        let out = pot.evaluate(&refs, &[0, 1], &pos, &[0, 0], EvalMode::ValueOnly).unwrap();
        assert_eq!(out.energies.len(), 1);
        assert_relative_eq!(out.energies[0], 0.0, epsilon = 1e-12);
        assert!(out.param_grads.is_none());
    }

    #[test]
    fn test_structures_are_independent() {
        let pot = BeadPairPotential::new(3, 2.0);
        let params = perturbed_params(&pot);
        let refs: Vec<&Parameter> = params.iter().collect();
        let a = chain(4);
        let b = chain(4);
        let emb = vec![0, 1, 2, 1];

        let single_a = pot.evaluate(&refs, &emb, &a, &[0; 4], EvalMode::ValueOnly).unwrap();
        let single_b = pot.evaluate(&refs, &emb, &b, &[0; 4], EvalMode::ValueOnly).unwrap();

        let pos: Vec<_> = a.iter().chain(b.iter()).cloned().collect();
        let emb2: Vec<_> = emb.iter().chain(emb.iter()).cloned().collect();
        let batch = vec![0, 0, 0, 0, 1, 1, 1, 1];
        let both = pot.evaluate(&refs, &emb2, &pos, &batch, EvalMode::ValueOnly).unwrap();

        assert_relative_eq!(both.energies[0], single_a.energies[0], epsilon = 1e-10);
        assert_relative_eq!(both.energies[1], single_b.energies[0], epsilon = 1e-10);
    }

    #[test]
    fn test_numerical_param_grads() {
        let pot = BeadPairPotential::new(3, 2.0);
        let params = perturbed_params(&pot);
        let refs: Vec<&Parameter> = params.iter().collect();
        let pos: Vec<_> = chain(5).into_iter().chain(chain(5)).collect();
        let emb = vec![0, 1, 2, 1, 0, 2, 2, 1, 0, 0];
        let batch = vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1];

        let analytic = pot
            .evaluate(&refs, &emb, &pos, &batch, EvalMode::Tracked)
            .unwrap()
            .param_grads
            .unwrap();
        let numerical = pot.numerical_param_grads(&refs, &emb, &pos, &batch, 1e-6).unwrap();

        for s in 0..2 {
            for k in 0..3 {
                for i in 0..params[k].len() {
                    assert_relative_eq!(analytic[s][k][i], numerical[s][k][i], epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_numerical_forces() {
        let pot = BeadPairPotential::new(3, 2.0);
        let params = perturbed_params(&pot);
        let refs: Vec<&Parameter> = params.iter().collect();
        let pos = chain(6);
        let emb = vec![0, 1, 2, 0, 1, 2];
        let batch = vec![0; 6];

        let analytic = pot.evaluate(&refs, &emb, &pos, &batch, EvalMode::ValueOnly).unwrap().forces;
        let numerical = pot.numerical_forces(&refs, &emb, &pos, &batch, 1e-6).unwrap();

        for i in 0..pos.len() {
            assert_relative_eq!(analytic[i].x, numerical[i].x, epsilon = 1e-5);
            assert_relative_eq!(analytic[i].y, numerical[i].y, epsilon = 1e-5);
            assert_relative_eq!(analytic[i].z, numerical[i].z, epsilon = 1e-5);
        }

        // Internal forces sum to zero
        let total: Vector3<f64> = analytic.iter().sum();
        assert_relative_eq!(total.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_unknown_type_code() {
        let pot = BeadPairPotential::new(2, 1.0);
        let params = pot.init_params(1.0, 3.8, 1.0);
        let refs: Vec<&Parameter> = params.iter().collect();
        let pos = vec![Vector3::zeros(), Vector3::new(3.8, 0.0, 0.0)];
        let err = pot.evaluate(&refs, &[0, 5], &pos, &[0, 0], EvalMode::ValueOnly);
        assert!(matches!(err, Err(CgweError::Config(_))));
    }

    #[test]
    fn test_rejects_unordered_batch() {
        let pot = BeadPairPotential::new(2, 1.0);
        let params = pot.init_params(1.0, 3.8, 1.0);
        let refs: Vec<&Parameter> = params.iter().collect();
        let pos = vec![Vector3::zeros(), Vector3::new(3.8, 0.0, 0.0)];
        let err = pot.evaluate(&refs, &[0, 1], &pos, &[1, 0], EvalMode::ValueOnly);
        assert!(matches!(err, Err(CgweError::ShapeMismatch(_))));
    }
}
