//! Metropolis Monte Carlo in the canonical ensemble.
//!
//! Every walker proposes a Gaussian displacement of all beads and accepts it
//! with probability min(1, exp(-ΔE / k_B T)). The proposal width adapts
//! toward a target acceptance rate.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::ensemble::BOLTZMANN;
use crate::error::{CgweError, Result};
use crate::potential::State;
use super::traits::{EnergyCalculator, ReplicaStats, SampleBatch, Sampler, SamplingStats};

/// Parameters for Metropolis sampling.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetropolisParams {
    pub replicas: usize,
    /// Temperature in K
    pub temperature: f64,
    pub initial_step_size: f64,
    pub max_step_size: f64,
    pub min_step_size: f64,
    pub target_acceptance: f64,
    pub adaptation_interval: usize,
}

impl Default for MetropolisParams {
    fn default() -> Self {
        Self {
            replicas: 1,
            temperature: 350.0,
            initial_step_size: 0.05,
            max_step_size: 1.0,
            min_step_size: 1e-4,
            target_acceptance: 0.5,
            adaptation_interval: 100,
        }
    }
}

/// State of a single walker.
#[derive(Clone, Debug)]
pub struct WalkerState {
    pub positions: State,
    pub energy: f64,
}

pub struct MetropolisSampler {
    params: MetropolisParams,
    rng: StdRng,
    step_size: f64,
}

impl MetropolisSampler {
    pub fn new(params: MetropolisParams, seed: Option<u64>) -> Result<Self> {
        if params.replicas == 0 {
            return Err(CgweError::config("sampler needs at least one replica"));
        }
        if !(params.temperature > 0.0) {
            return Err(CgweError::config(format!(
                "temperature must be positive, got {}",
                params.temperature
            )));
        }
        if !(params.min_step_size > 0.0) || params.min_step_size > params.max_step_size {
            return Err(CgweError::config(format!(
                "invalid step size bounds [{}, {}]",
                params.min_step_size, params.max_step_size
            )));
        }
        if params.adaptation_interval == 0 {
            return Err(CgweError::config("adaptation interval must be at least 1"));
        }
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let step_size = params
            .initial_step_size
            .clamp(params.min_step_size, params.max_step_size);
        Ok(Self { params, rng, step_size })
    }

    pub fn params(&self) -> &MetropolisParams {
        &self.params
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    fn initialize<E: EnergyCalculator>(&self, energy: &E, init: &[State]) -> Result<Vec<WalkerState>> {
        let replicas = self.params.replicas;
        if init.len() != 1 && init.len() != replicas {
            return Err(CgweError::shape(format!(
                "{} initial states for {} replicas",
                init.len(),
                replicas
            )));
        }
        (0..replicas)
            .map(|r| {
                let positions = init[if init.len() == 1 { 0 } else { r }].clone();
                let e = energy.energy(&positions)?;
                Ok(WalkerState { positions, energy: e })
            })
            .collect()
    }

    /// Perform a single Metropolis move for one walker.
    fn metropolis_step<E: EnergyCalculator>(
        &mut self,
        energy: &E,
        walker: &mut WalkerState,
        normal: &Normal<f64>,
    ) -> Result<bool> {
        let proposal: State = walker
            .positions
            .iter()
            .map(|pos| {
                Vector3::new(
                    pos[0] + normal.sample(&mut self.rng),
                    pos[1] + normal.sample(&mut self.rng),
                    pos[2] + normal.sample(&mut self.rng),
                )
            })
            .collect();

        let new_energy = energy.energy(&proposal)?;
        if !new_energy.is_finite() {
            return Ok(false);
        }
        let kt = BOLTZMANN * self.params.temperature;
        let delta = new_energy - walker.energy;

        if delta <= 0.0 || self.rng.gen::<f64>() < (-delta / kt).exp() {
            walker.positions = proposal;
            walker.energy = new_energy;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Adapt the step size to achieve target acceptance rate.
    fn adapt_step_size(&mut self, acceptance_count: usize, moves: usize) {
        if moves == 0 {
            return;
        }
        let acceptance_rate = acceptance_count as f64 / moves as f64;
        let adjustment = (acceptance_rate / self.params.target_acceptance).sqrt();
        self.step_size = (self.step_size * adjustment)
            .clamp(self.params.min_step_size, self.params.max_step_size);
    }
}

impl Sampler for MetropolisSampler {
    fn replicas(&self) -> usize {
        self.params.replicas
    }

    fn temperature(&self) -> f64 {
        self.params.temperature
    }

    fn sample<E: EnergyCalculator>(
        &mut self,
        energy: &E,
        init: &[State],
        steps: usize,
        output_period: usize,
    ) -> Result<SampleBatch> {
        if output_period == 0 || steps < output_period {
            return Err(CgweError::config(format!(
                "{} steps with output period {} produce no snapshots",
                steps, output_period
            )));
        }
        let mut walkers = self.initialize(energy, init)?;
        let replicas = walkers.len();
        let n_snapshots = steps / output_period;

        let mut trajectories: Vec<Vec<WalkerState>> = vec![Vec::with_capacity(n_snapshots); replicas];
        let mut energy_traces: Vec<Vec<f64>> = vec![Vec::with_capacity(steps); replicas];
        let mut acceptance_count = 0;
        let mut accepted_total = 0;
        let mut moves_since_adapt = 0;

        for step in 0..steps {
            let normal = Normal::new(0.0, self.step_size)
                .map_err(|e| CgweError::numerical(format!("invalid proposal width: {}", e)))?;
            for walker in walkers.iter_mut() {
                if self.metropolis_step(energy, walker, &normal)? {
                    acceptance_count += 1;
                    accepted_total += 1;
                }
            }
            moves_since_adapt += replicas;

            for (trace, walker) in energy_traces.iter_mut().zip(walkers.iter()) {
                trace.push(walker.energy);
            }

            if (step + 1) % output_period == 0 {
                for (traj, walker) in trajectories.iter_mut().zip(walkers.iter()) {
                    traj.push(walker.clone());
                }
            }

            if (step + 1) % self.params.adaptation_interval == 0 {
                self.adapt_step_size(acceptance_count, moves_since_adapt);
                acceptance_count = 0;
                moves_since_adapt = 0;
            }
        }

        let per_replica: Vec<ReplicaStats> = energy_traces.iter().map(|t| ReplicaStats::from_trace(t)).collect();
        let r = per_replica.len() as f64;
        let stats = SamplingStats {
            acceptance_rate: accepted_total as f64 / (steps * replicas) as f64,
            mean_energy: per_replica.iter().map(|s| s.mean_energy).sum::<f64>() / r,
            // Replicas are independent chains
            energy_error: per_replica.iter().map(|s| s.standard_error.powi(2)).sum::<f64>().sqrt() / r,
            autocorrelation_time: per_replica.iter().map(|s| s.autocorrelation_time).fold(1.0, f64::max),
            step_size: self.step_size,
            replicas: per_replica,
        };

        let last = walkers.into_iter().map(|w| w.positions).collect();
        let (states, energies) = trajectories
            .into_iter()
            .flatten()
            .map(|w| (w.positions, w.energy))
            .unzip();

        Ok(SampleBatch { states, energies, last, stats })
    }
}

fn mean_and_variance(series: &[f64]) -> (f64, f64) {
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let var = series.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
    (mean, var)
}

/// Normalized autocorrelation of `series` at `lag`.
fn autocorrelation(series: &[f64], mean: f64, var: f64, lag: usize) -> f64 {
    let pairs = series.len() - lag;
    let cov: f64 = (0..pairs).map(|i| (series[i] - mean) * (series[i + lag] - mean)).sum();
    cov / (pairs as f64 * var)
}

/// τ = 1 + 2 Σ ρ(t), summed until ρ first turns negative.
pub fn integrated_autocorrelation_time(series: &[f64]) -> f64 {
    if series.len() < 4 {
        return 1.0;
    }
    let (mean, var) = mean_and_variance(series);
    if var <= 0.0 {
        return 1.0;
    }
    let tail: f64 = (1..series.len() / 2)
        .map(|lag| autocorrelation(series, mean, var, lag))
        .take_while(|&rho| rho >= 0.0)
        .sum();
    1.0 + 2.0 * tail
}

/// Standard error of the mean of a correlated series, sqrt(τ σ² / n).
pub fn correlated_standard_error(series: &[f64], tau: f64) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let (_, var) = mean_and_variance(series);
    (tau * var / series.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn harmonic(k: f64) -> impl Fn(&[Vector3<f64>]) -> Result<f64> {
        move |pos: &[Vector3<f64>]| Ok(pos.iter().map(|p| 0.5 * k * p.norm_squared()).sum())
    }

    fn params(replicas: usize) -> MetropolisParams {
        MetropolisParams {
            replicas,
            initial_step_size: 0.5,
            adaptation_interval: 50,
            ..MetropolisParams::default()
        }
    }

    #[test]
    fn test_harmonic_equipartition() {
        let mut sampler = MetropolisSampler::new(params(16), Some(7)).unwrap();
        let init = vec![vec![Vector3::zeros()]];
        let batch = sampler.sample(&harmonic(2.0), &init, 6000, 10).unwrap();

        // <E> = 3/2 k_B T for one bead in a 3D harmonic well
        let kt = BOLTZMANN * 350.0;
        let burn = batch.energies.len() / 5;
        let tail = &batch.energies[burn..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        assert_relative_eq!(mean, 1.5 * kt, max_relative = 0.15);
    }

    #[test]
    fn test_snapshots_are_replica_major() {
        let mut sampler = MetropolisSampler::new(params(3), Some(11)).unwrap();
        let init: Vec<State> = (0..3).map(|r| vec![Vector3::new(100.0 * r as f64, 0.0, 0.0)]).collect();
        // Flat potential: walkers diffuse but stay far apart
        let flat = |_: &[Vector3<f64>]| -> Result<f64> { Ok(0.0) };
        let batch = sampler.sample(&flat, &init, 40, 10).unwrap();

        assert_eq!(batch.len(), 12);
        assert_eq!(batch.last.len(), 3);
        for (i, s) in batch.states.iter().enumerate() {
            let replica = i / 4;
            assert!((s[0].x - 100.0 * replica as f64).abs() < 50.0);
        }
        assert_relative_eq!(batch.stats.acceptance_rate, 1.0);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let init = vec![vec![Vector3::new(0.5, 0.0, 0.0), Vector3::new(1.0, 1.0, 0.0)]];
        let run = || {
            let mut sampler = MetropolisSampler::new(params(2), Some(42)).unwrap();
            sampler.sample(&harmonic(1.0), &init, 200, 20).unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.states, b.states);
        assert_eq!(a.energies, b.energies);
    }

    #[test]
    fn test_step_size_adapts_down_in_stiff_well() {
        let mut sampler = MetropolisSampler::new(params(4), Some(3)).unwrap();
        let init = vec![vec![Vector3::zeros()]];
        let batch = sampler.sample(&harmonic(500.0), &init, 2000, 100).unwrap();
        assert!(batch.stats.step_size < 0.5);
        assert!(batch.stats.acceptance_rate > 0.0);
    }

    #[test]
    fn test_rejects_invalid_requests() {
        assert!(matches!(
            MetropolisSampler::new(MetropolisParams { replicas: 0, ..params(1) }, None),
            Err(CgweError::Config(_))
        ));
        let mut sampler = MetropolisSampler::new(params(2), Some(1)).unwrap();
        let init = vec![vec![Vector3::zeros()]; 3];
        assert!(matches!(
            sampler.sample(&harmonic(1.0), &init, 10, 5),
            Err(CgweError::ShapeMismatch(_))
        ));
        assert!(matches!(
            sampler.sample(&harmonic(1.0), &init[..1], 3, 5),
            Err(CgweError::Config(_))
        ));
    }

    #[test]
    fn test_constant_trace_statistics() {
        assert_relative_eq!(integrated_autocorrelation_time(&[2.0; 10]), 1.0);
        assert_relative_eq!(correlated_standard_error(&[2.0; 10], 1.0), 0.0);
    }

    #[test]
    fn test_alternating_trace_is_uncorrelated() {
        let trace: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert_relative_eq!(integrated_autocorrelation_time(&trace), 1.0);
        assert_relative_eq!(correlated_standard_error(&trace, 1.0), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_slow_trace_has_long_correlation_time() {
        let trace: Vec<f64> = (0..200).map(|i| (i as f64 / 40.0).sin()).collect();
        assert!(integrated_autocorrelation_time(&trace) > 5.0);
    }

    #[test]
    fn test_statistics_are_reported_per_replica() {
        let mut sampler = MetropolisSampler::new(params(3), Some(5)).unwrap();
        let init = vec![vec![Vector3::zeros()]];
        let batch = sampler.sample(&harmonic(2.0), &init, 500, 50).unwrap();
        let stats = &batch.stats;

        assert_eq!(stats.replicas.len(), 3);
        let mean = stats.replicas.iter().map(|r| r.mean_energy).sum::<f64>() / 3.0;
        assert_relative_eq!(stats.mean_energy, mean, epsilon = 1e-12);
        let tau_max = stats.replicas.iter().map(|r| r.autocorrelation_time).fold(1.0, f64::max);
        assert_relative_eq!(stats.autocorrelation_time, tau_max);
        assert!(stats.replicas.iter().all(|r| r.standard_error >= 0.0));
    }
}
