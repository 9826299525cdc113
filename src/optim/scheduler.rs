//! Learning-rate schedules stepped once per epoch.

pub trait LrScheduler {
    /// Learning rate for the next epoch given the current one and an
    /// optional monitored loss.
    fn next_lr(&mut self, current: f64, metric: Option<f64>) -> f64;
}

impl<S: LrScheduler + ?Sized> LrScheduler for Box<S> {
    fn next_lr(&mut self, current: f64, metric: Option<f64>) -> f64 {
        (**self).next_lr(current, metric)
    }
}

/// Multiply the learning rate by `gamma` every `step_size` epochs.
#[derive(Clone, Debug)]
pub struct StepLr {
    pub step_size: usize,
    pub gamma: f64,
    epoch: usize,
}

impl StepLr {
    pub fn new(step_size: usize, gamma: f64) -> Self {
        Self { step_size: step_size.max(1), gamma, epoch: 0 }
    }
}

impl LrScheduler for StepLr {
    fn next_lr(&mut self, current: f64, _metric: Option<f64>) -> f64 {
        self.epoch += 1;
        if self.epoch % self.step_size == 0 {
            current * self.gamma
        } else {
            current
        }
    }
}

/// Reduce the learning rate when the monitored loss stops improving.
#[derive(Clone, Debug)]
pub struct ReduceLrOnPlateau {
    pub factor: f64,
    pub patience: usize,
    /// Relative improvement needed to reset patience
    pub threshold: f64,
    pub min_lr: f64,
    best: f64,
    num_bad_epochs: usize,
}

impl Default for ReduceLrOnPlateau {
    fn default() -> Self {
        Self::new(0.1, 10)
    }
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize) -> Self {
        Self {
            factor,
            patience,
            threshold: 1e-4,
            min_lr: 0.0,
            best: f64::INFINITY,
            num_bad_epochs: 0,
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }
}

impl LrScheduler for ReduceLrOnPlateau {
    fn next_lr(&mut self, current: f64, metric: Option<f64>) -> f64 {
        let metric = match metric {
            Some(m) => m,
            None => return current,
        };
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }
        if self.num_bad_epochs > self.patience {
            self.num_bad_epochs = 0;
            (current * self.factor).max(self.min_lr)
        } else {
            current
        }
    }
}
