//! Replica-batched evaluation of a trainable potential over a state batch.

use nalgebra::Vector3;
use crate::ensemble::Tracked;
use crate::error::{CgweError, Result};
use super::traits::{EvalMode, Parameter, Potential, State};

/// Energies of every state, with and without parameter gradients.
#[derive(Clone, Debug)]
pub struct Evaluation {
    /// Gradient-bearing energies (constants in `EvalMode::ValueOnly`)
    pub energies: Vec<Tracked>,
    /// The same values, never carrying a gradient
    pub energies_detached: Vec<f64>,
}

/// Evaluate `states` in `replicas` contiguous sub-batches.
///
/// `embeddings` holds either one row per replica or a single row shared by
/// all replicas; every row must have one code per bead. Output order
/// matches `states` (replica-major).
pub fn evaluate_states<P: Potential + ?Sized>(
    potential: &P,
    params: &[&Parameter],
    states: &[State],
    embeddings: &[Vec<usize>],
    replicas: usize,
    mode: EvalMode,
) -> Result<Evaluation> {
    if replicas == 0 {
        return Err(CgweError::shape("replicas must be at least 1"));
    }
    if states.len() % replicas != 0 {
        return Err(CgweError::shape(format!(
            "{} states cannot be split into {} replicas",
            states.len(),
            replicas
        )));
    }
    if embeddings.len() != replicas && embeddings.len() != 1 {
        return Err(CgweError::shape(format!(
            "{} embedding rows for {} replicas",
            embeddings.len(),
            replicas
        )));
    }

    let batch_num = states.len() / replicas;
    let mut energies = Vec::with_capacity(states.len());
    let mut energies_detached = Vec::with_capacity(states.len());

    for irepl in 0..replicas {
        let batch_states = &states[batch_num * irepl..batch_num * (irepl + 1)];
        let row = &embeddings[if embeddings.len() == 1 { 0 } else { irepl }];

        let mut pos: Vec<Vector3<f64>> = Vec::with_capacity(batch_num * row.len());
        let mut emb = Vec::with_capacity(batch_num * row.len());
        let mut batch = Vec::with_capacity(batch_num * row.len());
        for (idx, state) in batch_states.iter().enumerate() {
            if state.len() != row.len() {
                return Err(CgweError::shape(format!(
                    "state has {} beads but embedding row {} has {}",
                    state.len(),
                    irepl,
                    row.len()
                )));
            }
            pos.extend_from_slice(state);
            emb.extend_from_slice(row);
            batch.extend(std::iter::repeat(idx).take(row.len()));
        }

        let out = potential.evaluate(params, &emb, &pos, &batch, mode)?;
        if out.energies.len() != batch_num {
            return Err(CgweError::shape(format!(
                "potential returned {} energies for {} states",
                out.energies.len(),
                batch_num
            )));
        }

        match (mode, out.param_grads) {
            (EvalMode::Tracked, Some(grads)) => {
                if grads.len() != batch_num {
                    return Err(CgweError::shape(format!(
                        "potential returned {} gradient rows for {} states",
                        grads.len(),
                        batch_num
                    )));
                }
                for (e, g) in out.energies.iter().zip(grads) {
                    energies.push(Tracked::new(*e, g));
                }
            }
            (EvalMode::Tracked, None) => {
                return Err(CgweError::shape(
                    "potential returned no parameter gradients in tracked mode",
                ));
            }
            (EvalMode::ValueOnly, _) => {
                energies.extend(out.energies.iter().map(|&e| Tracked::constant(e)));
            }
        }
        energies_detached.extend_from_slice(&out.energies);
    }

    Ok(Evaluation { energies, energies_detached })
}
