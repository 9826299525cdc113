//! AdamW: Adam with decoupled weight decay.

use nalgebra::DVector;
use crate::potential::Parameter;
use super::traits::{Optimizer, ParamGroup};

#[derive(Clone, Debug)]
struct AdamState {
    step: i32,
    exp_avg: DVector<f64>,
    exp_avg_sq: DVector<f64>,
}

#[derive(Clone, Debug)]
pub struct AdamW {
    groups: Vec<ParamGroup>,
    /// Decay rate of the first moment
    pub beta1: f64,
    /// Decay rate of the second moment
    pub beta2: f64,
    pub epsilon: f64,
    state: Vec<Vec<Option<AdamState>>>,
}

impl AdamW {
    pub const DEFAULT_WEIGHT_DECAY: f64 = 0.01;

    /// Single parameter group.
    pub fn new(params: Vec<Parameter>, lr: f64) -> Self {
        let mut group = ParamGroup::new(params, lr);
        group.weight_decay = Self::DEFAULT_WEIGHT_DECAY;
        Self::with_groups(vec![group])
    }

    pub fn with_groups(groups: Vec<ParamGroup>) -> Self {
        let state = groups.iter().map(|g| vec![None; g.params.len()]).collect();
        Self {
            groups,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            state,
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    /// Set weight decay on every group.
    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        for g in self.groups.iter_mut() {
            g.weight_decay = weight_decay;
        }
        self
    }

    pub fn reset(&mut self) {
        for group_state in self.state.iter_mut() {
            group_state.iter_mut().for_each(|s| *s = None);
        }
    }
}

impl Optimizer for AdamW {
    fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    fn step(&mut self) {
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);
        for (group, group_state) in self.groups.iter_mut().zip(self.state.iter_mut()) {
            let (lr, wd) = (group.lr, group.weight_decay);
            for (p, slot) in group.params.iter_mut().zip(group_state.iter_mut()) {
                let grad = match p.grad.as_ref() {
                    Some(g) => g,
                    None => continue,
                };
                let state = slot.get_or_insert_with(|| AdamState {
                    step: 0,
                    exp_avg: DVector::zeros(grad.len()),
                    exp_avg_sq: DVector::zeros(grad.len()),
                });
                state.step += 1;

                p.value *= 1.0 - lr * wd;

                state.exp_avg = &state.exp_avg * beta1 + grad * (1.0 - beta1);
                state.exp_avg_sq = &state.exp_avg_sq * beta2 + grad.component_mul(grad) * (1.0 - beta2);

                let bias_correction1 = 1.0 - beta1.powi(state.step);
                let bias_correction2 = 1.0 - beta2.powi(state.step);
                let step_size = lr / bias_correction1;
                let bc2_sqrt = bias_correction2.sqrt();

                for i in 0..p.value.len() {
                    let denom = state.exp_avg_sq[i].sqrt() / bc2_sqrt + eps;
                    p.value[i] -= step_size * state.exp_avg[i] / denom;
                }
            }
        }
    }
}
