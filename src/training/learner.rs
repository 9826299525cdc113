//! Training driver: sample, reweight, update.
//!
//! One `step` samples a fresh batch with the current potential, computes the
//! weighted-ensemble loss and (in training) applies the gradient. The next
//! step continues from the last sampled configurations unless the update
//! moved the potential so far that the batch reweights to fewer than
//! `neff_threshold · n_states` effective samples, in which case sampling
//! restarts from the reference structure.

use std::path::Path;
use log::{info, warn};
use nalgebra::Vector3;

use crate::ensemble::{effective_sample_size, log_weight_args, softmax, Mode, WeightedEnsemble};
use crate::error::{CgweError, Result};
use crate::io::{write_params, ParamSnapshot};
use crate::optim::{LrScheduler, Optimizer};
use crate::potential::{EvalMode, Potential, State};
use crate::sampling::{Sampler, SamplingStats};

/// Outcome of one training or validation step.
#[derive(Clone, Debug)]
pub struct StepInfo {
    pub mode: Mode,
    pub loss: f64,
    pub avg_metric: f64,
    pub neff: f64,
    /// neff of the batch reweighted to the updated potential
    pub post_update_neff: Option<f64>,
    pub restarted: bool,
    pub lr: f64,
    pub sampling: SamplingStats,
}

/// Means over the steps of one epoch.
#[derive(Clone, Debug, Default)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: Option<f64>,
    pub train_avg_metric: Option<f64>,
    pub val_loss: Option<f64>,
    pub val_avg_metric: Option<f64>,
    pub lr: f64,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub struct Learner<P: Potential, O: Optimizer, S: Sampler> {
    ensemble: WeightedEnsemble<P, O>,
    sampler: S,
    scheduler: Option<Box<dyn LrScheduler>>,
    reference: State,
    embedding: Vec<usize>,
    init_states: Vec<State>,
    steps: usize,
    output_period: usize,
    neff_threshold: f64,
    epoch: usize,
    train_losses: Vec<f64>,
    train_avg_metrics: Vec<f64>,
    val_losses: Vec<f64>,
    val_avg_metrics: Vec<f64>,
    last_stats: Option<EpochStats>,
}

impl<P: Potential, O: Optimizer, S: Sampler> Learner<P, O, S> {
    pub fn new(
        ensemble: WeightedEnsemble<P, O>,
        sampler: S,
        reference: State,
        embedding: Vec<usize>,
        steps: usize,
        output_period: usize,
    ) -> Result<Self> {
        if reference.len() != embedding.len() {
            return Err(CgweError::shape(format!(
                "reference has {} beads but the embedding has {}",
                reference.len(),
                embedding.len()
            )));
        }
        if sampler.replicas() != ensemble.config().replicas {
            return Err(CgweError::config(format!(
                "sampler runs {} replicas but the estimator expects {}",
                sampler.replicas(),
                ensemble.config().replicas
            )));
        }
        if (sampler.temperature() - ensemble.config().temperature).abs() > 1e-9 {
            return Err(CgweError::config(format!(
                "sampler runs at {} K but the estimator reweights at {} K",
                sampler.temperature(),
                ensemble.config().temperature
            )));
        }
        Ok(Self {
            ensemble,
            sampler,
            scheduler: None,
            init_states: vec![reference.clone()],
            reference,
            embedding,
            steps,
            output_period,
            neff_threshold: 0.9,
            epoch: 0,
            train_losses: Vec::new(),
            train_avg_metrics: Vec::new(),
            val_losses: Vec::new(),
            val_avg_metrics: Vec::new(),
            last_stats: None,
        })
    }

    pub fn with_scheduler(mut self, scheduler: impl LrScheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    pub fn with_neff_threshold(mut self, threshold: f64) -> Self {
        self.neff_threshold = threshold;
        self
    }

    pub fn ensemble(&self) -> &WeightedEnsemble<P, O> {
        &self.ensemble
    }

    pub fn ensemble_mut(&mut self) -> &mut WeightedEnsemble<P, O> {
        &mut self.ensemble
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn init_states(&self) -> &[State] {
        &self.init_states
    }

    pub fn set_init_states(&mut self, states: Vec<State>) {
        self.init_states = states;
    }

    pub fn set_steps(&mut self, steps: usize) {
        self.steps = steps;
    }

    pub fn set_output_period(&mut self, output_period: usize) {
        self.output_period = output_period;
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.ensemble.set_lr(lr);
    }

    pub fn last_epoch_stats(&self) -> Option<&EpochStats> {
        self.last_stats.as_ref()
    }

    /// One sampling + weighted-ensemble step.
    pub fn step(&mut self, mode: Mode) -> Result<StepInfo> {
        let ensemble = &self.ensemble;
        let embedding = &self.embedding;
        let energy = |s: &[Vector3<f64>]| ensemble.state_energy(s, embedding);
        let batch = self
            .sampler
            .sample(&energy, &self.init_states, self.steps, self.output_period)?;

        let embeddings = vec![self.embedding.clone()];
        let result = self
            .ensemble
            .compute_gradients(&self.reference, &batch.states, &embeddings, mode)?;
        let diag = |key: &str| result.diagnostics.get(key).cloned().flatten().unwrap_or(f64::NAN);
        let avg_metric = diag("avg_metric");
        let neff = diag("neff");

        let mut post_update_neff = None;
        let mut restarted = false;
        match mode {
            Mode::Train => {
                self.train_losses.push(result.loss);
                self.train_avg_metrics.push(avg_metric);
                if let Some(grads) = result.gradients.as_ref() {
                    self.ensemble.apply_gradients(Some(grads))?;

                    let updated = self.ensemble.evaluate(&batch.states, &embeddings, EvalMode::ValueOnly)?;
                    let weights = softmax(
                        &log_weight_args(
                            &updated.energies_detached,
                            &batch.energies,
                            self.ensemble.config().temperature,
                        ),
                        true,
                    )?;
                    let n = effective_sample_size(&weights);
                    post_update_neff = Some(n);
                    if n < self.neff_threshold * batch.len() as f64 {
                        warn!(
                            "neff {:.2} below {:.2}; restarting from the reference structure",
                            n,
                            self.neff_threshold * batch.len() as f64
                        );
                        restarted = true;
                    }
                }
            }
            Mode::Validation => {
                self.val_losses.push(result.loss);
                self.val_avg_metrics.push(avg_metric);
            }
        }

        self.init_states = if restarted { vec![self.reference.clone()] } else { batch.last };

        Ok(StepInfo {
            mode,
            loss: result.loss,
            avg_metric,
            neff,
            post_update_neff,
            restarted,
            lr: self.ensemble.learning_rate(),
            sampling: batch.stats,
        })
    }

    /// Close the epoch: average the step records, advance the scheduler.
    pub fn compute_epoch_stats(&mut self) -> EpochStats {
        self.epoch += 1;
        let stats = EpochStats {
            epoch: self.epoch,
            train_loss: mean(&self.train_losses),
            train_avg_metric: mean(&self.train_avg_metrics),
            val_loss: mean(&self.val_losses),
            val_avg_metric: mean(&self.val_avg_metrics),
            lr: self.ensemble.learning_rate(),
        };
        info!(
            "epoch {} train_loss {:?} train_avg_metric {:?} val_loss {:?} val_avg_metric {:?} lr {:.3e}",
            stats.epoch, stats.train_loss, stats.train_avg_metric, stats.val_loss, stats.val_avg_metric, stats.lr
        );

        if let Some(scheduler) = self.scheduler.as_mut() {
            let monitored = stats.val_loss.or(stats.train_loss);
            let lr = scheduler.next_lr(self.ensemble.learning_rate(), monitored);
            self.ensemble.set_lr(lr);
        }

        self.train_losses.clear();
        self.train_avg_metrics.clear();
        self.val_losses.clear();
        self.val_avg_metrics.clear();
        self.last_stats = Some(stats.clone());
        stats
    }

    /// Write the current parameters as a YAML snapshot.
    pub fn save_params<Q: AsRef<Path>>(&self, path: Q) -> Result<()> {
        let (train_loss, val_loss) = match self.last_stats.as_ref() {
            Some(s) => (s.train_loss, s.val_loss),
            None => (None, None),
        };
        let snapshot = ParamSnapshot {
            epoch: self.epoch,
            train_loss,
            val_loss,
            params: self.ensemble.optimizer().parameters().into_iter().cloned().collect(),
        };
        write_params(path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::EnsembleConfig;
    use crate::io::read_params;
    use crate::metrics::{KabschRmsd, Log1pLoss};
    use crate::optim::{AdamW, StepLr};
    use crate::potential::BeadPairPotential;
    use crate::sampling::{MetropolisParams, MetropolisSampler};
    use crate::systems::ideal_helix;
    use approx::assert_relative_eq;

    fn learner(replicas: usize, seed: u64) -> Learner<BeadPairPotential, AdamW, MetropolisSampler> {
        let pot = BeadPairPotential::new(3, 2.0);
        let params = pot.init_params(1.0, 3.8, 0.5);
        let ensemble = WeightedEnsemble::new(
            pot,
            AdamW::new(params, 1e-2),
            EnsembleConfig::new().with_replicas(replicas),
            KabschRmsd,
            Log1pLoss,
        );
        let sampler = MetropolisSampler::new(
            MetropolisParams { replicas, initial_step_size: 0.1, ..MetropolisParams::default() },
            Some(seed),
        )
        .unwrap();
        Learner::new(ensemble, sampler, ideal_helix(5, 2.3, 1.5, 3.6), vec![0, 1, 2, 1, 0], 40, 10).unwrap()
    }

    #[test]
    fn test_train_step_updates_parameters() {
        let mut l = learner(2, 5);
        let before: Vec<_> = l.ensemble().optimizer().parameters().iter().map(|p| p.value.clone()).collect();
        let info = l.step(Mode::Train).unwrap();

        assert!(info.loss > 0.0);
        assert_relative_eq!(info.neff, 8.0, epsilon = 1e-9);
        assert!(info.post_update_neff.is_some());
        let after: Vec<_> = l.ensemble().optimizer().parameters().iter().map(|p| p.value.clone()).collect();
        assert_ne!(before, after);
        assert_eq!(l.ensemble().grad_norm_history().len(), 2);
    }

    #[test]
    fn test_continues_from_last_states_without_restart() {
        let mut l = learner(2, 9).with_neff_threshold(0.0);
        let info = l.step(Mode::Train).unwrap();
        assert!(!info.restarted);
        assert_eq!(l.init_states().len(), 2);
    }

    #[test]
    fn test_restarts_when_neff_collapses() {
        let mut l = learner(2, 13).with_neff_threshold(1.0);
        let info = l.step(Mode::Train).unwrap();
        assert!(info.restarted);
        assert_eq!(l.init_states().len(), 1);
        assert_eq!(l.init_states()[0], ideal_helix(5, 2.3, 1.5, 3.6));
    }

    #[test]
    fn test_validation_leaves_parameters_alone() {
        let mut l = learner(1, 21);
        let before: Vec<_> = l.ensemble().optimizer().parameters().iter().map(|p| p.value.clone()).collect();
        let info = l.step(Mode::Validation).unwrap();
        assert!(info.post_update_neff.is_none());
        let after: Vec<_> = l.ensemble().optimizer().parameters().iter().map(|p| p.value.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_epoch_stats_and_scheduler() {
        let mut l = learner(1, 3).with_scheduler(StepLr::new(1, 0.5));
        let a = l.step(Mode::Train).unwrap();
        let b = l.step(Mode::Train).unwrap();
        let v = l.step(Mode::Validation).unwrap();
        let stats = l.compute_epoch_stats();

        assert_eq!(stats.epoch, 1);
        assert_relative_eq!(stats.train_loss.unwrap(), (a.loss + b.loss) / 2.0, epsilon = 1e-12);
        assert_relative_eq!(stats.val_loss.unwrap(), v.loss, epsilon = 1e-12);
        assert_relative_eq!(stats.lr, 1e-2);
        assert_relative_eq!(l.ensemble().learning_rate(), 5e-3);

        let empty = l.compute_epoch_stats();
        assert!(empty.train_loss.is_none());
    }

    #[test]
    fn test_save_params_snapshot() {
        let mut l = learner(1, 4);
        l.step(Mode::Train).unwrap();
        l.compute_epoch_stats();
        let path = std::env::temp_dir().join(format!("cgwe_learner_{}.yaml", std::process::id()));
        l.save_params(&path).unwrap();
        let snapshot = read_params(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(snapshot.epoch, 1);
        assert_eq!(snapshot.params.len(), 3);
        assert_eq!(snapshot.params[0].value, l.ensemble().optimizer().parameters()[0].value);
    }

    #[test]
    fn test_rejects_mismatched_setup() {
        let pot = BeadPairPotential::new(3, 2.0);
        let params = pot.init_params(1.0, 3.8, 0.5);
        let ensemble = WeightedEnsemble::new(
            pot,
            AdamW::new(params, 1e-2),
            EnsembleConfig::new().with_replicas(2),
            KabschRmsd,
            Log1pLoss,
        );
        let sampler = MetropolisSampler::new(MetropolisParams::default(), Some(1)).unwrap();
        let err = Learner::new(ensemble, sampler, ideal_helix(5, 2.3, 1.5, 3.6), vec![0, 1, 2, 1, 0], 40, 10);
        assert!(matches!(err, Err(CgweError::Config(_))));
    }

    #[test]
    fn test_rejects_temperature_mismatch() {
        let pot = BeadPairPotential::new(3, 2.0);
        let params = pot.init_params(1.0, 3.8, 0.5);
        let ensemble = WeightedEnsemble::new(
            pot,
            AdamW::new(params, 1e-2),
            EnsembleConfig::new().with_temperature(300.0),
            KabschRmsd,
            Log1pLoss,
        );
        let sampler = MetropolisSampler::new(MetropolisParams { temperature: 350.0, ..MetropolisParams::default() }, Some(1)).unwrap();
        let err = Learner::new(ensemble, sampler, ideal_helix(5, 2.3, 1.5, 3.6), vec![0, 1, 2, 1, 0], 40, 10);
        assert!(matches!(err, Err(CgweError::Config(_))));
    }
}
