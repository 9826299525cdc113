pub mod tracked;
pub mod weights;
pub mod clip;
pub mod weighted_ensemble;

pub use tracked::Tracked;
pub use weights::{effective_sample_size, importance_weights, log_weight_args, softmax, BOLTZMANN};
pub use clip::{clip_grad_norm, global_grad_norm, GradNormQueue};
pub use weighted_ensemble::{
    Diagnostics, EnergyTarget, EnsembleConfig, GradientMessage, GradientResult, Mode,
    WeightedEnsemble, WeightedObservable, METRIC_CLAMP,
};
