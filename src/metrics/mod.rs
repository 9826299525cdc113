//! Metrics module - structural metrics and scalar loss transforms.

mod traits;
mod rmsd;
mod loss;

pub use traits::{Metric, LossTransform};
pub use rmsd::{KabschRmsd, kabsch_rmsd, centroid};
pub use loss::{Log1pLoss, IdentityLoss};
