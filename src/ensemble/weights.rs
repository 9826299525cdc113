//! Importance weights and effective sample size.
//!
//! wᵢ = exp(uᵢ) / Σⱼ exp(uⱼ),  uᵢ = -(Eᵢ - E_refᵢ) / (k_B T)
//!
//! During training `E_ref` is the detached copy of `E`, so every uᵢ is zero
//! in value while ∂wᵢ/∂θ = -(wᵢ / k_B T)(∂Eᵢ/∂θ - Σⱼ wⱼ ∂Eⱼ/∂θ) is not.

use crate::error::{CgweError, Result};
use super::tracked::Tracked;

/// Boltzmann constant in kcal/(mol·K).
pub const BOLTZMANN: f64 = 0.001987191;

/// Unnormalized log-weights uᵢ.
pub fn log_weight_args(energies: &[f64], reference: &[f64], temperature: f64) -> Vec<f64> {
    let kt = temperature * BOLTZMANN;
    energies
        .iter()
        .zip(reference.iter())
        .map(|(e, r)| -(e - r) / kt)
        .collect()
}

/// Normalize log-weights with a softmax.
///
/// With `stabilize` the maximum argument is subtracted before
/// exponentiating; without it large arguments overflow and the result is
/// reported as a numerical error instead of being returned.
pub fn softmax(args: &[f64], stabilize: bool) -> Result<Vec<f64>> {
    if args.is_empty() {
        return Err(CgweError::shape("cannot weight an empty ensemble"));
    }
    let shift = if stabilize {
        args.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    } else {
        0.0
    };
    let exponentials: Vec<f64> = args.iter().map(|u| (u - shift).exp()).collect();
    let total: f64 = exponentials.iter().sum();
    let weights: Vec<f64> = exponentials.iter().map(|e| e / total).collect();

    if weights.iter().any(|w| !w.is_finite()) {
        return Err(CgweError::numerical(format!(
            "non-finite importance weights (log-weight range [{:.3e}, {:.3e}])",
            args.iter().cloned().fold(f64::INFINITY, f64::min),
            args.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        )));
    }
    Ok(weights)
}

/// Importance weights of a state ensemble.
///
/// Gradients are propagated when every energy carries one; otherwise the
/// weights are constants.
pub fn importance_weights(
    energies: &[Tracked],
    reference: &[f64],
    temperature: f64,
    stabilize: bool,
) -> Result<Vec<Tracked>> {
    if energies.len() != reference.len() {
        return Err(CgweError::shape(format!(
            "{} energies but {} reference energies",
            energies.len(),
            reference.len()
        )));
    }
    if !(temperature > 0.0) {
        return Err(CgweError::config(format!("temperature must be positive, got {}", temperature)));
    }

    let values: Vec<f64> = energies.iter().map(|e| e.value).collect();
    let weights = softmax(&log_weight_args(&values, reference, temperature), stabilize)?;

    if !energies.iter().all(Tracked::requires_grad) {
        return Ok(weights.into_iter().map(Tracked::constant).collect());
    }

    let kt = temperature * BOLTZMANN;
    let mean_energy = Tracked::linear_combination(
        &weights.iter().zip(energies.iter()).map(|(&w, e)| (w, e)).collect::<Vec<_>>(),
    );

    Ok(weights
        .iter()
        .zip(energies.iter())
        .map(|(&w, e)| {
            let dw = Tracked::linear_combination(&[(-w / kt, e), (w / kt, &mean_energy)]);
            Tracked { value: w, grad: dw.grad }
        })
        .collect())
}

/// neff = exp(-Σ wᵢ ln wᵢ), with 0·ln 0 taken as 0.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let plogp: f64 = weights
        .iter()
        .filter(|&&w| w > 0.0)
        .map(|&w| w * w.ln())
        .sum();
    (-plogp).exp()
}
