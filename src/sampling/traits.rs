//! Traits for configuration samplers.

use nalgebra::Vector3;
use crate::error::Result;
use crate::potential::State;
use super::metropolis::{correlated_standard_error, integrated_autocorrelation_time};

/// Energy of one bead configuration.
pub trait EnergyCalculator {
    fn energy(&self, positions: &[Vector3<f64>]) -> Result<f64>;
}

impl<F> EnergyCalculator for F
where
    F: Fn(&[Vector3<f64>]) -> Result<f64>,
{
    fn energy(&self, positions: &[Vector3<f64>]) -> Result<f64> {
        self(positions)
    }
}

/// Energy statistics of one replica's chain.
#[derive(Clone, Debug, Default)]
pub struct ReplicaStats {
    pub mean_energy: f64,
    pub autocorrelation_time: f64,
    pub standard_error: f64,
}

impl ReplicaStats {
    pub fn from_trace(trace: &[f64]) -> Self {
        if trace.is_empty() {
            return Self { autocorrelation_time: 1.0, ..Self::default() };
        }
        let tau = integrated_autocorrelation_time(trace);
        Self {
            mean_energy: trace.iter().sum::<f64>() / trace.len() as f64,
            autocorrelation_time: tau,
            standard_error: correlated_standard_error(trace, tau),
        }
    }
}

/// Summary statistics of one sampling run.
#[derive(Clone, Debug, Default)]
pub struct SamplingStats {
    pub acceptance_rate: f64,
    /// Mean over replicas of each chain's mean energy
    pub mean_energy: f64,
    /// Standard error of `mean_energy`, treating replicas as independent
    pub energy_error: f64,
    /// Longest per-replica autocorrelation time
    pub autocorrelation_time: f64,
    /// Proposal width at the end of the run
    pub step_size: f64,
    pub replicas: Vec<ReplicaStats>,
}

/// Snapshots of one sampling run.
#[derive(Clone, Debug)]
pub struct SampleBatch {
    /// Replica-major: all snapshots of replica 0, then replica 1, ...
    pub states: Vec<State>,
    /// Energy of each snapshot under the sampling potential
    pub energies: Vec<f64>,
    /// Final configuration of every replica
    pub last: Vec<State>,
    pub stats: SamplingStats,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Produces states distributed according to the Boltzmann factor of a
/// potential.
pub trait Sampler {
    /// Number of independent walkers.
    fn replicas(&self) -> usize;

    /// Temperature (K) of the sampled Boltzmann distribution.
    fn temperature(&self) -> f64;

    /// Advance every walker `steps` moves, starting from `init` (one state
    /// per replica, or one state shared by all), keeping a snapshot every
    /// `output_period` moves.
    fn sample<E: EnergyCalculator>(
        &mut self,
        energy: &E,
        init: &[State],
        steps: usize,
        output_period: usize,
    ) -> Result<SampleBatch>;
}
