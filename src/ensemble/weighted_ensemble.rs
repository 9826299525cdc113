//! Weighted-ensemble reweighting estimator and its training step.
//!
//! States sampled under a reference potential are reweighted toward the
//! current trainable potential; the weighted average of a structural
//! metric is the training observable. Gradients come from the weights
//! alone (the metric is treated as a constant), giving
//!
//!   ∂L/∂θ = -L'(O)/(k_B T) · Σᵢ wᵢ (obsᵢ - O) ∂Eᵢ/∂θ
//!
//! which is what `compute_gradients` writes into the parameter slots.

use std::collections::BTreeMap;
use std::str::FromStr;
use log::{debug, info};
use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{CgweError, Result};
use crate::metrics::{LossTransform, Metric};
use crate::optim::Optimizer;
use crate::potential::{evaluate_states, EvalMode, Evaluation, Potential, State};
use super::clip::{clip_grad_norm, GradNormQueue};
use super::tracked::Tracked;
use super::weights::{effective_sample_size, importance_weights};

/// Upper bound applied to every per-state metric value.
pub const METRIC_CLAMP: f64 = 1e7;

/// Named scalar diagnostics; `None` marks a reserved, unused slot.
pub type Diagnostics = BTreeMap<String, Option<f64>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Validation,
}

impl Mode {
    pub fn from_val_flag(val: bool) -> Self {
        if val {
            Mode::Validation
        } else {
            Mode::Train
        }
    }
}

impl FromStr for Mode {
    type Err = CgweError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Mode::Train),
            "val" | "validation" => Ok(Mode::Validation),
            other => Err(CgweError::config(format!(
                "invalid mode '{}', expected 'train' or 'val'",
                other
            ))),
        }
    }
}

/// Estimator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Temperature in K
    pub temperature: f64,
    /// Number of replicas the state batch is split into
    pub replicas: usize,
    /// Learning rate written into the optimizer at construction
    pub lr: Option<f64>,
    pub grad_history_capacity: usize,
    pub grad_history_seed: f64,
    /// Subtract the largest log-weight before exponentiating
    pub stabilize_weights: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            temperature: 350.0,
            replicas: 1,
            lr: None,
            grad_history_capacity: GradNormQueue::DEFAULT_CAPACITY,
            grad_history_seed: GradNormQueue::DEFAULT_SEED,
            stabilize_weights: true,
        }
    }
}

impl EnsembleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, t: f64) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_replicas(mut self, n: usize) -> Self {
        self.replicas = n;
        self
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = Some(lr);
        self
    }

    pub fn with_grad_history(mut self, capacity: usize, seed: f64) -> Self {
        self.grad_history_capacity = capacity;
        self.grad_history_seed = seed;
        self
    }

    pub fn with_stabilize_weights(mut self, stabilize: bool) -> Self {
        self.stabilize_weights = stabilize;
        self
    }
}

/// Per-parameter gradients as plain arrays, keyed by parameter position.
///
/// `None` entries leave the receiving parameter's gradient slot alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientMessage {
    pub grads: Vec<Option<Vec<f64>>>,
}

impl GradientMessage {
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }
}

/// Weighted observable of one state batch.
#[derive(Clone, Debug)]
pub struct WeightedObservable {
    /// Σ wᵢ·obsᵢ, differentiable through the weights
    pub value: Tracked,
    /// Unweighted mean of the clamped metric
    pub avg_metric: f64,
    pub neff: f64,
    pub weights: Vec<f64>,
}

/// Result of one `compute_gradients` call.
#[derive(Clone, Debug)]
pub struct GradientResult {
    pub gradients: Option<GradientMessage>,
    pub loss: f64,
    pub diagnostics: Diagnostics,
}

/// Supervised targets for `compute_energy_loss`.
#[derive(Clone, Debug)]
pub enum EnergyTarget {
    /// One energy per state
    Energies(Vec<f64>),
    /// One force per bead per state
    Forces(Vec<State>),
}

/// Weighted-ensemble estimator for one trainable potential.
pub struct WeightedEnsemble<P: Potential, O: Optimizer> {
    potential: P,
    optimizer: O,
    config: EnsembleConfig,
    metric: Box<dyn Metric>,
    loss_fn: Box<dyn LossTransform>,
    val_fn: Option<Box<dyn Metric>>,
    gradnorm_queue: GradNormQueue,
    loss: f64,
}

impl<P: Potential, O: Optimizer> WeightedEnsemble<P, O> {
    pub fn new(
        potential: P,
        mut optimizer: O,
        config: EnsembleConfig,
        metric: impl Metric + 'static,
        loss_fn: impl LossTransform + 'static,
    ) -> Self {
        if let Some(lr) = config.lr {
            optimizer.set_lr(lr);
        }
        let gradnorm_queue = GradNormQueue::new(config.grad_history_capacity, config.grad_history_seed);
        Self {
            potential,
            optimizer,
            config,
            metric: Box::new(metric),
            loss_fn: Box::new(loss_fn),
            val_fn: None,
            gradnorm_queue,
            loss: 0.0,
        }
    }

    /// Metric used by `report_metric`.
    pub fn with_val_fn(mut self, val_fn: impl Metric + 'static) -> Self {
        self.val_fn = Some(Box::new(val_fn));
        self
    }

    pub fn potential(&self) -> &P {
        &self.potential
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn grad_norm_history(&self) -> &GradNormQueue {
        &self.gradnorm_queue
    }

    /// Energies of `states` under the current parameters.
    pub fn evaluate(&self, states: &[State], embeddings: &[Vec<usize>], mode: EvalMode) -> Result<Evaluation> {
        let params = self.optimizer.parameters();
        evaluate_states(&self.potential, &params, states, embeddings, self.config.replicas, mode)
    }

    /// Importance weights and the detached energies they were derived from.
    pub fn weights(&self, states: &[State], embeddings: &[Vec<usize>]) -> Result<(Vec<Tracked>, Vec<f64>)> {
        self.weights_with_mode(states, embeddings, EvalMode::Tracked)
    }

    fn weights_with_mode(
        &self,
        states: &[State],
        embeddings: &[Vec<usize>],
        mode: EvalMode,
    ) -> Result<(Vec<Tracked>, Vec<f64>)> {
        let eval = self.evaluate(states, embeddings, mode)?;
        let weights = importance_weights(
            &eval.energies,
            &eval.energies_detached,
            self.config.temperature,
            self.config.stabilize_weights,
        )?;
        Ok((weights, eval.energies_detached))
    }

    pub fn compute_we(
        &self,
        states: &[State],
        reference: &[Vector3<f64>],
        embeddings: &[Vec<usize>],
    ) -> Result<WeightedObservable> {
        self.compute_we_with_mode(states, reference, embeddings, EvalMode::Tracked)
    }

    fn compute_we_with_mode(
        &self,
        states: &[State],
        reference: &[Vector3<f64>],
        embeddings: &[Vec<usize>],
        mode: EvalMode,
    ) -> Result<WeightedObservable> {
        let (weights, _) = self.weights_with_mode(states, embeddings, mode)?;

        let mut obs = Vec::with_capacity(states.len());
        for state in states {
            if state.len() != reference.len() {
                return Err(CgweError::shape(format!(
                    "state has {} beads but the reference has {}",
                    state.len(),
                    reference.len()
                )));
            }
            let value = self.metric.compute(state, reference);
            if value.is_nan() {
                return Err(CgweError::numerical(format!(
                    "metric is NaN for state {} of {}",
                    obs.len(),
                    states.len()
                )));
            }
            obs.push(if value > METRIC_CLAMP { METRIC_CLAMP } else { value });
        }
        let avg_metric = obs.iter().sum::<f64>() / obs.len() as f64;

        let terms: Vec<(f64, &Tracked)> = obs.iter().cloned().zip(weights.iter()).collect();
        let value = Tracked::linear_combination(&terms);
        let plain: Vec<f64> = weights.iter().map(|w| w.value).collect();

        Ok(WeightedObservable {
            value,
            avg_metric,
            neff: effective_sample_size(&plain),
            weights: plain,
        })
    }

    pub fn compute_loss(
        &self,
        reference: &[Vector3<f64>],
        states: &[State],
        embeddings: &[Vec<usize>],
        val: bool,
    ) -> Result<(Tracked, Diagnostics)> {
        let mode = if val { EvalMode::ValueOnly } else { EvalMode::Tracked };
        let we = self.compute_we_with_mode(states, reference, embeddings, mode)?;
        let loss = self.loss_fn.apply(&we.value);

        let prefix = if val { "val_" } else { "" };
        let mut diagnostics = Diagnostics::new();
        diagnostics.insert(format!("{}loss_1", prefix), Some(loss.value));
        diagnostics.insert(format!("{}loss_2", prefix), None);
        diagnostics.insert("avg_metric".to_string(), Some(we.avg_metric));
        diagnostics.insert("neff".to_string(), Some(we.neff));

        Ok((loss, diagnostics))
    }

    /// One forward (and, in train mode, backward) pass.
    ///
    /// A loss of exactly zero skips the backward pass and leaves every
    /// gradient slot untouched.
    pub fn compute_gradients(
        &mut self,
        reference: &[Vector3<f64>],
        states: &[State],
        embeddings: &[Vec<usize>],
        mode: Mode,
    ) -> Result<GradientResult> {
        let (loss, mut diagnostics, gradients) = match mode {
            Mode::Train => {
                let (loss, mut diagnostics) = self.compute_loss(reference, states, embeddings, false)?;
                let avg = diagnostics.get("avg_metric").cloned().flatten();
                diagnostics.insert("train_avg_metric".to_string(), avg);

                let gradients = if loss.value != 0.0 {
                    self.optimizer.zero_grad();
                    self.backward(&loss)?;
                    Some(self.gradient_message())
                } else {
                    None
                };
                (loss.value, diagnostics, gradients)
            }
            Mode::Validation => {
                let (loss, mut diagnostics) = self.compute_loss(reference, states, embeddings, true)?;
                let avg = diagnostics.get("avg_metric").cloned().flatten();
                diagnostics.insert("val_avg_metric".to_string(), avg);
                (loss.detach().value, diagnostics, None)
            }
        };

        if let Some(m) = self.report_metric(states, reference) {
            diagnostics.insert("report_metric".to_string(), Some(m));
        }

        self.loss = loss;
        debug!("loss = {} {:?}", loss, diagnostics);
        Ok(GradientResult { gradients, loss, diagnostics })
    }

    /// Accumulate `loss.grad` into the parameter gradient slots.
    fn backward(&mut self, loss: &Tracked) -> Result<()> {
        let grad = match loss.grad.as_ref() {
            Some(g) => g,
            None => return Ok(()),
        };
        let mut params = self.optimizer.parameters_mut();
        if grad.len() != params.len() {
            return Err(CgweError::shape(format!(
                "loss gradient has {} blocks for {} parameters",
                grad.len(),
                params.len()
            )));
        }
        for (p, g) in params.iter_mut().zip(grad.iter()) {
            if g.len() != p.len() {
                return Err(CgweError::shape(format!(
                    "gradient for '{}' has {} entries, expected {}",
                    p.name,
                    g.len(),
                    p.len()
                )));
            }
            match p.grad.as_mut() {
                Some(acc) => *acc += g,
                None => p.grad = Some(g.clone()),
            }
        }
        Ok(())
    }

    fn gradient_message(&self) -> GradientMessage {
        GradientMessage {
            grads: self
                .optimizer
                .parameters()
                .iter()
                .map(|p| p.grad.as_ref().map(|g| g.as_slice().to_vec()))
                .collect(),
        }
    }

    /// Attach received gradients, clip, and take one optimizer step.
    ///
    /// Without a (non-empty) message the step uses whatever gradients are
    /// already attached and clipping is skipped.
    pub fn apply_gradients(&mut self, gradients: Option<&GradientMessage>) -> Result<()> {
        if let Some(msg) = gradients.filter(|m| !m.is_empty()) {
            let mut params = self.optimizer.parameters_mut();
            if msg.len() != params.len() {
                return Err(CgweError::shape(format!(
                    "gradient message has {} entries for {} parameters",
                    msg.len(),
                    params.len()
                )));
            }
            for (g, p) in msg.grads.iter().zip(params.iter()) {
                if let Some(g) = g {
                    if g.len() != p.len() {
                        return Err(CgweError::shape(format!(
                            "gradient for '{}' has {} entries, expected {}",
                            p.name,
                            g.len(),
                            p.len()
                        )));
                    }
                }
            }
            for (g, p) in msg.grads.iter().zip(params.iter_mut()) {
                if let Some(g) = g {
                    p.grad = Some(DVector::from_vec(g.clone()));
                }
            }
            self.clip_gradients();
        }
        self.optimizer.step();
        Ok(())
    }

    /// Clip to 1.5·mean + 2·std of the norm history and record the step.
    ///
    /// Returns the threshold that was applied.
    pub fn clip_gradients(&mut self) -> f64 {
        let dynamic_max_grad_norm = self.gradnorm_queue.dynamic_threshold();
        let grad_norm = clip_grad_norm(&mut self.optimizer.parameters_mut(), dynamic_max_grad_norm);

        if grad_norm > dynamic_max_grad_norm {
            self.gradnorm_queue.add(dynamic_max_grad_norm);
            info!(
                "Clipped gradient with value {:.1} while allowed {:.1}",
                grad_norm, dynamic_max_grad_norm
            );
        } else {
            self.gradnorm_queue.add(grad_norm);
        }
        dynamic_max_grad_norm
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.optimizer.set_lr(lr);
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Loss value of the last `compute_gradients` call.
    pub fn get_loss(&self) -> f64 {
        self.loss
    }

    /// Value-only energy of a single structure.
    pub fn state_energy(&self, state: &[Vector3<f64>], embedding: &[usize]) -> Result<f64> {
        let params = self.optimizer.parameters();
        let eval = evaluate_states(
            &self.potential,
            &params,
            &[state.to_vec()],
            &[embedding.to_vec()],
            1,
            EvalMode::ValueOnly,
        )?;
        Ok(eval.energies_detached[0])
    }

    /// Energy of the reference (native) structure under the current potential.
    pub fn native_energy(&self, reference: &[Vector3<f64>], embedding: &[usize]) -> Result<f64> {
        self.state_energy(reference, embedding)
    }

    /// L1 loss of the potential against supervised energies or forces.
    ///
    /// Force losses are additionally divided by 3·N (N beads per state).
    pub fn compute_energy_loss(
        &self,
        states: &[State],
        target: &EnergyTarget,
        embedding: &[usize],
    ) -> Result<f64> {
        if states.is_empty() {
            return Err(CgweError::shape("energy loss needs at least one state"));
        }
        let n_beads = embedding.len();
        let mut pos = Vec::with_capacity(states.len() * n_beads);
        let mut emb = Vec::with_capacity(states.len() * n_beads);
        let mut batch = Vec::with_capacity(states.len() * n_beads);
        for (idx, state) in states.iter().enumerate() {
            if state.len() != n_beads {
                return Err(CgweError::shape(format!(
                    "state has {} beads but the embedding has {}",
                    state.len(),
                    n_beads
                )));
            }
            pos.extend_from_slice(state);
            emb.extend_from_slice(embedding);
            batch.extend(std::iter::repeat(idx).take(n_beads));
        }

        let params = self.optimizer.parameters();
        let out = self.potential.evaluate(&params, &emb, &pos, &batch, EvalMode::ValueOnly)?;

        match target {
            EnergyTarget::Energies(y) => {
                if y.len() != out.energies.len() {
                    return Err(CgweError::shape(format!(
                        "{} target energies for {} states",
                        y.len(),
                        out.energies.len()
                    )));
                }
                Ok(y.iter().zip(out.energies.iter()).map(|(a, b)| (a - b).abs()).sum::<f64>() / y.len() as f64)
            }
            EnergyTarget::Forces(y) => {
                let flat: Vec<Vector3<f64>> = y.iter().flatten().cloned().collect();
                if flat.len() != out.forces.len() {
                    return Err(CgweError::shape(format!(
                        "{} target forces for {} beads",
                        flat.len(),
                        out.forces.len()
                    )));
                }
                let l1 = flat
                    .iter()
                    .zip(out.forces.iter())
                    .map(|(a, b)| (a - b).abs().sum())
                    .sum::<f64>()
                    / (3 * flat.len()) as f64;
                Ok(l1 / (3 * n_beads) as f64)
            }
        }
    }

    /// Mean of the validation function over `states`, if one is set.
    pub fn report_metric(&self, states: &[State], reference: &[Vector3<f64>]) -> Option<f64> {
        let val_fn = self.val_fn.as_ref()?;
        if states.is_empty() {
            return None;
        }
        Some(states.iter().map(|s| val_fn.compute(s, reference)).sum::<f64>() / states.len() as f64)
    }
}
