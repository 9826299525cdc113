//! Loss transforms.

use serde::{Deserialize, Serialize};
use super::traits::LossTransform;

/// L(x) = ln(1 + x)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct Log1pLoss;

impl LossTransform for Log1pLoss {
    fn value(&self, x: f64) -> f64 {
        x.ln_1p()
    }

    fn derivative(&self, x: f64) -> f64 {
        1.0 / (1.0 + x)
    }
}

/// L(x) = x
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct IdentityLoss;

impl LossTransform for IdentityLoss {
    fn value(&self, x: f64) -> f64 {
        x
    }

    fn derivative(&self, _x: f64) -> f64 {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::Tracked;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    #[test]
    fn test_log1p_matches_numerical_derivative() {
        let loss = Log1pLoss;
        let h = 1e-6;
        for x in [0.0, 0.5, 2.0, 10.0] {
            let numerical = (loss.value(x + h) - loss.value(x - h)) / (2.0 * h);
            assert_relative_eq!(loss.derivative(x), numerical, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_apply_scales_gradient() {
        let x = Tracked::new(1.0, vec![DVector::from_vec(vec![4.0])]);
        let l = Log1pLoss.apply(&x);
        assert_relative_eq!(l.value, 2.0f64.ln());
        assert_relative_eq!(l.grad.unwrap()[0][0], 2.0);
        assert_eq!(IdentityLoss.apply(&x), x);
    }
}
