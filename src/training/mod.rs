//! Training module - the sample/reweight/update loop.

mod learner;

pub use learner::{EpochStats, Learner, StepInfo};
