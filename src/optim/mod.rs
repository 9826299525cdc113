//! Optimizer module - parameter groups, first-order optimizers and LR schedules.

mod traits;
mod adamw;
mod sgd;
mod scheduler;

pub use traits::{Optimizer, ParamGroup};
pub use adamw::AdamW;
pub use sgd::Sgd;
pub use scheduler::{LrScheduler, StepLr, ReduceLrOnPlateau};
