//! Scalars that carry their gradient with respect to the potential parameters.
//!
//! A `Tracked` is the value-plus-derivative pair the estimator pushes through
//! the weighting pipeline. `grad[k]` has the shape of parameter block `k`.
//! A value computed in `EvalMode::ValueOnly` (or explicitly detached) has no
//! gradient and acts as a constant.

use nalgebra::DVector;

#[derive(Clone, Debug, PartialEq)]
pub struct Tracked {
    pub value: f64,
    pub grad: Option<Vec<DVector<f64>>>,
}

impl Tracked {
    pub fn new(value: f64, grad: Vec<DVector<f64>>) -> Self {
        Self { value, grad: Some(grad) }
    }

    pub fn constant(value: f64) -> Self {
        Self { value, grad: None }
    }

    pub fn requires_grad(&self) -> bool {
        self.grad.is_some()
    }

    /// Same value, no gradient.
    pub fn detach(&self) -> Self {
        Self::constant(self.value)
    }

    /// Apply a scalar function with known derivative (chain rule).
    pub fn map(&self, f: impl Fn(f64) -> f64, df: impl Fn(f64) -> f64) -> Self {
        let value = f(self.value);
        let grad = self.grad.as_ref().map(|g| {
            let slope = df(self.value);
            g.iter().map(|block| block * slope).collect()
        });
        Self { value, grad }
    }

    /// Σ cᵢ·tᵢ. Terms without a gradient contribute only to the value.
    pub fn linear_combination(terms: &[(f64, &Tracked)]) -> Self {
        let mut value = 0.0;
        let mut grad: Option<Vec<DVector<f64>>> = None;
        for &(c, t) in terms {
            value += c * t.value;
            if let Some(g) = &t.grad {
                match grad.as_mut() {
                    Some(acc) => axpy(acc, c, g),
                    None => grad = Some(g.iter().map(|block| block * c).collect()),
                }
            }
        }
        Self { value, grad }
    }
}

/// acc += a·x, block by block.
pub(crate) fn axpy(acc: &mut [DVector<f64>], a: f64, x: &[DVector<f64>]) {
    for (dst, src) in acc.iter_mut().zip(x.iter()) {
        dst.axpy(a, src, 1.0);
    }
}
