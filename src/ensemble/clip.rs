//! Dynamic gradient clipping driven by a bounded history of gradient norms.

use std::collections::VecDeque;
use crate::potential::Parameter;

/// Fixed-capacity FIFO of recent gradient norms.
///
/// Seeded with one conservative value so the first steps are not
/// over-clipped before statistics accumulate. The queue never drops
/// below one entry.
#[derive(Clone, Debug)]
pub struct GradNormQueue {
    items: VecDeque<f64>,
    capacity: usize,
}

impl Default for GradNormQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_SEED)
    }
}

impl GradNormQueue {
    pub const DEFAULT_CAPACITY: usize = 50;
    pub const DEFAULT_SEED: f64 = 3000.0;

    pub fn new(capacity: usize, seed: f64) -> Self {
        let capacity = capacity.max(1);
        let mut items = VecDeque::with_capacity(capacity);
        items.push_back(seed);
        Self { items, capacity }
    }

    pub fn add(&mut self, value: f64) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn values(&self) -> Vec<f64> {
        self.items.iter().cloned().collect()
    }

    pub fn mean(&self) -> f64 {
        self.items.iter().sum::<f64>() / self.items.len() as f64
    }

    /// Population standard deviation.
    pub fn std(&self) -> f64 {
        let mean = self.mean();
        let var = self.items.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / self.items.len() as f64;
        var.sqrt()
    }

    /// 1.5·mean + 2·std of the history.
    pub fn dynamic_threshold(&self) -> f64 {
        1.5 * self.mean() + 2.0 * self.std()
    }
}

/// L2 norm over every gradient that is present.
pub fn global_grad_norm(params: &[&Parameter]) -> f64 {
    params
        .iter()
        .filter_map(|p| p.grad.as_ref())
        .map(|g| g.norm_squared())
        .sum::<f64>()
        .sqrt()
}

/// Scale all gradients together so their global norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(params: &mut [&mut Parameter], max_norm: f64) -> f64 {
    let total = params
        .iter()
        .filter_map(|p| p.grad.as_ref())
        .map(|g| g.norm_squared())
        .sum::<f64>()
        .sqrt();
    let clip_coef = max_norm / (total + 1e-6);
    if clip_coef < 1.0 {
        for p in params.iter_mut() {
            if let Some(g) = p.grad.as_mut() {
                *g *= clip_coef;
            }
        }
    }
    total
}
