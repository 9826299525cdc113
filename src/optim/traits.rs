//! Optimizer interface.
//!
//! An optimizer owns the trainable parameters, grouped by learning rate.
//! Parameter order is group order, then order within the group; gradient
//! messages are keyed by this position.

use crate::potential::Parameter;

/// Parameters sharing one learning rate and weight decay.
#[derive(Clone, Debug)]
pub struct ParamGroup {
    pub lr: f64,
    pub weight_decay: f64,
    pub params: Vec<Parameter>,
}

impl ParamGroup {
    pub fn new(params: Vec<Parameter>, lr: f64) -> Self {
        Self { lr, weight_decay: 0.0, params }
    }
}

pub trait Optimizer {
    fn param_groups(&self) -> &[ParamGroup];

    fn param_groups_mut(&mut self) -> &mut [ParamGroup];

    /// Update every parameter that has a gradient.
    fn step(&mut self);

    fn parameters(&self) -> Vec<&Parameter> {
        self.param_groups().iter().flat_map(|g| g.params.iter()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.param_groups_mut().iter_mut().flat_map(|g| g.params.iter_mut()).collect()
    }

    fn num_parameters(&self) -> usize {
        self.param_groups().iter().map(|g| g.params.len()).sum()
    }

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.grad = None;
        }
    }

    /// Learning rate of the first group.
    fn learning_rate(&self) -> f64 {
        self.param_groups().first().map_or(0.0, |g| g.lr)
    }

    /// Set the learning rate of every group.
    fn set_lr(&mut self, lr: f64) {
        for g in self.param_groups_mut() {
            g.lr = lr;
        }
    }
}
