//! Stochastic gradient descent with optional momentum and L2 weight decay.

use nalgebra::DVector;
use crate::potential::Parameter;
use super::traits::{Optimizer, ParamGroup};

#[derive(Clone, Debug)]
pub struct Sgd {
    groups: Vec<ParamGroup>,
    pub momentum: f64,
    momentum_buffers: Vec<Vec<Option<DVector<f64>>>>,
}

impl Sgd {
    pub fn new(params: Vec<Parameter>, lr: f64) -> Self {
        Self::with_groups(vec![ParamGroup::new(params, lr)])
    }

    pub fn with_groups(groups: Vec<ParamGroup>) -> Self {
        let momentum_buffers = groups.iter().map(|g| vec![None; g.params.len()]).collect();
        Self { groups, momentum: 0.0, momentum_buffers }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        for g in self.groups.iter_mut() {
            g.weight_decay = weight_decay;
        }
        self
    }
}

impl Optimizer for Sgd {
    fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }

    fn step(&mut self) {
        let momentum = self.momentum;
        for (group, buffers) in self.groups.iter_mut().zip(self.momentum_buffers.iter_mut()) {
            let (lr, wd) = (group.lr, group.weight_decay);
            for (p, buf) in group.params.iter_mut().zip(buffers.iter_mut()) {
                let grad = match p.grad.as_ref() {
                    Some(g) => g,
                    None => continue,
                };
                let mut d_p = grad.clone();
                if wd != 0.0 {
                    d_p.axpy(wd, &p.value, 1.0);
                }
                if momentum != 0.0 {
                    let b = match buf.take() {
                        Some(prev) => prev * momentum + &d_p,
                        None => d_p.clone(),
                    };
                    d_p = b.clone();
                    *buf = Some(b);
                }
                p.value.axpy(-lr, &d_p, 1.0);
            }
        }
    }
}
