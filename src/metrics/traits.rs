//! Collaborator traits for the weighted-ensemble observable.

use nalgebra::Vector3;
use crate::ensemble::Tracked;

/// Per-state structural metric against a fixed reference structure.
pub trait Metric {
    fn compute(&self, state: &[Vector3<f64>], reference: &[Vector3<f64>]) -> f64;
}

impl<F> Metric for F
where
    F: Fn(&[Vector3<f64>], &[Vector3<f64>]) -> f64,
{
    fn compute(&self, state: &[Vector3<f64>], reference: &[Vector3<f64>]) -> f64 {
        self(state, reference)
    }
}

/// Differentiable scalar transform turning the weighted observable into a loss.
pub trait LossTransform {
    fn value(&self, x: f64) -> f64;

    fn derivative(&self, x: f64) -> f64;

    fn apply(&self, x: &Tracked) -> Tracked {
        x.map(|v| self.value(v), |v| self.derivative(v))
    }
}
