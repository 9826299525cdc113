//! Sampling module - Boltzmann sampling of bead configurations.

mod traits;
mod metropolis;

pub use traits::{EnergyCalculator, ReplicaStats, SampleBatch, Sampler, SamplingStats};
pub use metropolis::{
    correlated_standard_error, integrated_autocorrelation_time, MetropolisParams, MetropolisSampler,
    WalkerState,
};
