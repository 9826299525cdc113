//! Traits and shared types for trainable potentials.

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};
use crate::error::Result;

/// One coarse-grained structure: bead coordinates in Å.
pub type State = Vec<Vector3<f64>>;

/// A named trainable parameter block with its gradient slot.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: DVector<f64>,
    /// Accumulated gradient; `None` until a backward pass or a received
    /// gradient message fills it.
    #[serde(skip)]
    pub grad: Option<DVector<f64>>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: DVector<f64>) -> Self {
        Self {
            name: name.into(),
            value,
            grad: None,
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// How a potential evaluation should treat parameter gradients.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvalMode {
    /// Energies plus dE/dθ for every structure and parameter.
    Tracked,
    /// Energies and forces only.
    ValueOnly,
}

/// Output of one batched potential call.
#[derive(Clone, Debug)]
pub struct PotentialOutput {
    /// One energy per structure (batch index) in kcal/mol.
    pub energies: Vec<f64>,
    /// Per-bead forces, flattened over the whole batch.
    pub forces: Vec<Vector3<f64>>,
    /// `param_grads[s][k]` = ∂E_s / ∂θ_k. Present only in `EvalMode::Tracked`.
    pub param_grads: Option<Vec<Vec<DVector<f64>>>>,
}

/// A trainable potential: `(embeddings, positions, batch) -> (energy, forces)`.
///
/// `embeddings` holds one type code per bead, `positions` the matching
/// coordinates and `batch` the structure index of every bead. Structures
/// are numbered `0..n_structures` and appear contiguously.
pub trait Potential {
    fn evaluate(
        &self,
        params: &[&Parameter],
        embeddings: &[usize],
        positions: &[Vector3<f64>],
        batch: &[usize],
        mode: EvalMode,
    ) -> Result<PotentialOutput>;

    /// Central-difference ∂E_s/∂θ_k, for checking analytic gradients.
    fn numerical_param_grads(
        &self,
        params: &[&Parameter],
        embeddings: &[usize],
        positions: &[Vector3<f64>],
        batch: &[usize],
        h: f64,
    ) -> Result<Vec<Vec<DVector<f64>>>> {
        let n_structures = batch.iter().max().map_or(0, |b| b + 1);
        let mut grads: Vec<Vec<DVector<f64>>> = (0..n_structures)
            .map(|_| params.iter().map(|p| DVector::zeros(p.len())).collect())
            .collect();

        for k in 0..params.len() {
            for i in 0..params[k].len() {
                let mut fwd = params[k].clone();
                let mut bwd = params[k].clone();
                fwd.value[i] += h;
                bwd.value[i] -= h;

                let mut shifted: Vec<&Parameter> = params.to_vec();
                shifted[k] = &fwd;
                let e_fwd = self.evaluate(&shifted, embeddings, positions, batch, EvalMode::ValueOnly)?;
                shifted[k] = &bwd;
                let e_bwd = self.evaluate(&shifted, embeddings, positions, batch, EvalMode::ValueOnly)?;

                for s in 0..n_structures {
                    grads[s][k][i] = (e_fwd.energies[s] - e_bwd.energies[s]) / (2.0 * h);
                }
            }
        }
        Ok(grads)
    }

    /// Central-difference forces -∂E/∂x, flattened like `PotentialOutput::forces`.
    fn numerical_forces(
        &self,
        params: &[&Parameter],
        embeddings: &[usize],
        positions: &[Vector3<f64>],
        batch: &[usize],
        h: f64,
    ) -> Result<Vec<Vector3<f64>>> {
        let mut forces = vec![Vector3::zeros(); positions.len()];
        for i in 0..positions.len() {
            for axis in 0..3 {
                let mut r_fwd = positions.to_vec();
                let mut r_bwd = positions.to_vec();
                r_fwd[i][axis] += h;
                r_bwd[i][axis] -= h;
                let e_fwd: f64 = self
                    .evaluate(params, embeddings, &r_fwd, batch, EvalMode::ValueOnly)?
                    .energies
                    .iter()
                    .sum();
                let e_bwd: f64 = self
                    .evaluate(params, embeddings, &r_bwd, batch, EvalMode::ValueOnly)?
                    .energies
                    .iter()
                    .sum();
                forces[i][axis] = -(e_fwd - e_bwd) / (2.0 * h);
            }
        }
        Ok(forces)
    }
}
