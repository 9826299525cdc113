//! YAML configuration of a training run and parameter snapshots.
//!
//! ```yaml
//! temperature: 350.0
//! replicas: 4
//! lr: 0.001
//! optimizer: adamw
//! epochs: 20
//! steps: 400
//! output_period: 20
//! sequence: [ALA, GLY, LEU, LYS, GLU, ALA, LEU, GLY]
//! bead: CA
//! params_output: params.yaml
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::ensemble::{EnsembleConfig, GradNormQueue};
use crate::error::{CgweError, Result};
use crate::optim::{LrScheduler, ReduceLrOnPlateau, StepLr};
use crate::potential::Parameter;
use crate::sampling::MetropolisParams;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    AdamW,
    Sgd,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Decay by `gamma` every `step_size` epochs
    Step,
    /// Decay by `factor` after `patience` epochs without improvement
    Plateau,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub kind: SchedulerKind,
    pub step_size: usize,
    pub gamma: f64,
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::Step,
            step_size: 1,
            gamma: 0.8,
            factor: 0.1,
            patience: 10,
            min_lr: 0.0,
        }
    }
}

impl SchedulerConfig {
    pub fn build(&self) -> Box<dyn LrScheduler> {
        match self.kind {
            SchedulerKind::Step => Box::new(StepLr::new(self.step_size, self.gamma)),
            SchedulerKind::Plateau => {
                Box::new(ReduceLrOnPlateau::new(self.factor, self.patience).with_min_lr(self.min_lr))
            }
        }
    }
}

/// Ideal helix used as the reference structure.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HelixConfig {
    pub radius: f64,
    pub rise: f64,
    pub residues_per_turn: f64,
}

impl Default for HelixConfig {
    fn default() -> Self {
        Self { radius: 2.3, rise: 1.5, residues_per_turn: 3.6 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub temperature: f64,
    pub replicas: usize,
    pub lr: f64,
    pub optimizer: OptimizerKind,
    pub weight_decay: f64,
    pub momentum: f64,
    pub scheduler: SchedulerConfig,
    pub epochs: usize,
    /// Sampler moves per training step
    pub steps: usize,
    pub output_period: usize,
    pub sampler: MetropolisParams,
    /// Restart from the reference when neff < neff_threshold · n_states
    pub neff_threshold: f64,
    pub grad_history_capacity: usize,
    pub grad_history_seed: f64,
    pub seed: Option<u64>,
    pub sequence: Vec<String>,
    pub bead: String,
    pub helix: HelixConfig,
    /// Initial bond parameters of the pair potential
    pub bond_k: f64,
    pub bond_r0: f64,
    pub repulsion: f64,
    pub repulsion_length: f64,
    pub params_output: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            temperature: 350.0,
            replicas: 4,
            lr: 1e-3,
            optimizer: OptimizerKind::AdamW,
            weight_decay: 0.0,
            momentum: 0.0,
            scheduler: SchedulerConfig::default(),
            epochs: 10,
            steps: 400,
            output_period: 20,
            sampler: MetropolisParams::default(),
            neff_threshold: 0.9,
            grad_history_capacity: GradNormQueue::DEFAULT_CAPACITY,
            grad_history_seed: GradNormQueue::DEFAULT_SEED,
            seed: None,
            sequence: ["ALA", "GLY", "LEU", "LYS", "GLU", "ALA", "LEU", "GLY"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            bead: "CA".to_string(),
            helix: HelixConfig::default(),
            bond_k: 1.0,
            bond_r0: 3.8,
            repulsion: 0.5,
            repulsion_length: 2.0,
            params_output: None,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature > 0.0) {
            return Err(CgweError::config(format!("temperature must be positive, got {}", self.temperature)));
        }
        if self.replicas == 0 {
            return Err(CgweError::config("replicas must be at least 1"));
        }
        if self.output_period == 0 || self.steps < self.output_period {
            return Err(CgweError::config(format!(
                "steps ({}) must be at least one output period ({})",
                self.steps, self.output_period
            )));
        }
        if !(0.0..=1.0).contains(&self.neff_threshold) {
            return Err(CgweError::config(format!(
                "neff_threshold must lie in [0, 1], got {}",
                self.neff_threshold
            )));
        }
        if self.sequence.len() < 2 {
            return Err(CgweError::config("sequence needs at least two residues"));
        }
        Ok(())
    }

    pub fn ensemble_config(&self) -> EnsembleConfig {
        EnsembleConfig::new()
            .with_temperature(self.temperature)
            .with_replicas(self.replicas)
            .with_lr(self.lr)
            .with_grad_history(self.grad_history_capacity, self.grad_history_seed)
    }

    /// Sampler settings with the run's temperature and replica count.
    pub fn sampler_params(&self) -> MetropolisParams {
        MetropolisParams {
            replicas: self.replicas,
            temperature: self.temperature,
            ..self.sampler
        }
    }
}

pub fn read_config<P: AsRef<Path>>(filename: P) -> Result<TrainConfig> {
    let file = File::open(filename)?;
    let reader = BufReader::new(file);
    let config: TrainConfig = serde_yaml::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

/// Parameter values at the end of an epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamSnapshot {
    pub epoch: usize,
    pub train_loss: Option<f64>,
    pub val_loss: Option<f64>,
    pub params: Vec<Parameter>,
}

pub fn write_params<P: AsRef<Path>>(filename: P, snapshot: &ParamSnapshot) -> Result<()> {
    let file = File::create(filename)?;
    serde_yaml::to_writer(BufWriter::new(file), snapshot)?;
    Ok(())
}

pub fn read_params<P: AsRef<Path>>(filename: P) -> Result<ParamSnapshot> {
    let file = File::open(filename)?;
    Ok(serde_yaml::from_reader(BufReader::new(file))?)
}
