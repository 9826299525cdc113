//! Rust CGWE - weighted-ensemble training of coarse-grained potentials
//!
//! States sampled under one parameterization of a potential are reweighted
//! with Boltzmann importance weights toward the current parameterization.
//! The weighted average of a structural metric against a reference structure
//! is the training loss, and its analytic gradient drives a first-order
//! optimizer with dynamic gradient clipping.

pub mod error;
pub mod potential;
pub mod ensemble;
pub mod metrics;
pub mod optim;
pub mod sampling;
pub mod systems;
pub mod training;
pub mod io;

// Re-export commonly used types at crate root
pub use error::{CgweError, Result};
pub use potential::{State, Parameter, EvalMode, PotentialOutput, Potential, BeadPairPotential, Evaluation, evaluate_states};
pub use ensemble::{Tracked, BOLTZMANN, importance_weights, effective_sample_size, GradNormQueue, WeightedEnsemble, EnsembleConfig, Mode, GradientMessage, GradientResult, Diagnostics, WeightedObservable, EnergyTarget};
pub use metrics::{Metric, LossTransform, KabschRmsd, kabsch_rmsd, Log1pLoss, IdentityLoss};
pub use optim::{Optimizer, ParamGroup, AdamW, Sgd, LrScheduler, StepLr, ReduceLrOnPlateau};
pub use sampling::{EnergyCalculator, Sampler, SampleBatch, SamplingStats, ReplicaStats, MetropolisParams, MetropolisSampler};
pub use systems::{BeadKind, ideal_helix, sequence_embeddings, N_EMBEDDING_TYPES};
pub use training::{Learner, StepInfo, EpochStats};
pub use io::{read_config, read_params, write_params, TrainConfig, OptimizerKind, SchedulerKind, ParamSnapshot};

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{DVector, Vector3};
    use rand_distr::{Distribution, Normal};

    use crate::ensemble::{log_weight_args, softmax, EnsembleConfig, Mode, WeightedEnsemble, METRIC_CLAMP};
    use crate::error::Result;
    use crate::metrics::{IdentityLoss, KabschRmsd, Log1pLoss, Metric};
    use crate::optim::{AdamW, Sgd};
    use crate::potential::{BeadPairPotential, EvalMode, Parameter, Potential, PotentialOutput, State};
    use crate::systems::{ideal_helix, sequence_embeddings, BeadKind, N_EMBEDDING_TYPES};

    /// Every state has energy `offset`, the single parameter.
    struct Flat;

    impl Potential for Flat {
        fn evaluate(
            &self,
            params: &[&Parameter],
            _embeddings: &[usize],
            positions: &[Vector3<f64>],
            batch: &[usize],
            mode: EvalMode,
        ) -> Result<PotentialOutput> {
            let n = batch.iter().max().map_or(0, |b| b + 1);
            let offset = params[0].value[0];
            Ok(PotentialOutput {
                energies: vec![offset; n],
                forces: vec![Vector3::zeros(); positions.len()],
                param_grads: match mode {
                    EvalMode::Tracked => Some(vec![vec![DVector::from_element(1, 1.0)]; n]),
                    EvalMode::ValueOnly => None,
                },
            })
        }
    }

    fn first_x(state: &[Vector3<f64>], _reference: &[Vector3<f64>]) -> f64 {
        state[0].x
    }

    fn flat_ensemble() -> WeightedEnsemble<Flat, Sgd> {
        let params = vec![Parameter::new("offset", DVector::from_element(1, 0.0))];
        WeightedEnsemble::new(Flat, Sgd::new(params, 0.1), EnsembleConfig::default(), first_x, IdentityLoss)
    }

    fn states_with_metric(values: &[f64]) -> Vec<State> {
        values.iter().map(|&v| vec![Vector3::new(v, 0.0, 0.0)]).collect()
    }

    #[test]
    fn test_identical_energies_scenario() {
        let we = flat_ensemble();
        let states = states_with_metric(&[1.0, 2.0, 3.0, 4.0]);
        let out = we.compute_we(&states, &[Vector3::zeros()], &[vec![0]]).unwrap();
        assert_relative_eq!(out.value.value, 2.5, epsilon = 1e-12);
        assert_relative_eq!(out.neff, 4.0, epsilon = 1e-12);

        // A common energy offset does not change the weights
        assert_relative_eq!(out.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        // Dropping in a uniform potential makes the gradient vanish
        let g = out.value.grad.unwrap();
        assert_relative_eq!(g[0][0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clamped_outlier_scenario() {
        let we = flat_ensemble();
        let states = states_with_metric(&[1.0, 1.0, 1.0, 5e8]);
        let out = we.compute_we(&states, &[Vector3::zeros()], &[vec![0]]).unwrap();
        assert_relative_eq!(out.value.value, (3.0 + METRIC_CLAMP) / 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gradient_step_lowers_reweighted_metric() {
        let sequence = ["ALA", "GLY", "LEU", "LYS", "GLU", "ALA"];
        let embedding = sequence_embeddings(BeadKind::CA, &sequence[..]).unwrap();
        let reference = ideal_helix(sequence.len(), 2.3, 1.5, 3.6);
        let pot = BeadPairPotential::new(N_EMBEDDING_TYPES, 2.0);
        let params = pot.init_params(5.0, 3.8, 0.2);

        let mut rng = rand::thread_rng();
        let noise = Normal::new(0.0, 0.3).unwrap();
        let states: Vec<State> = (0..16)
            .map(|_| reference.iter().map(|p| p + Vector3::<f64>::from_distribution(&noise, &mut rng)).collect())
            .collect();
        let emb = vec![embedding];
        let temperature = 300.0;

        let mut we = WeightedEnsemble::new(
            pot,
            AdamW::new(params, 1e-3).with_weight_decay(0.0),
            EnsembleConfig::new().with_replicas(2).with_temperature(temperature),
            KabschRmsd,
            Log1pLoss,
        );
        let energies = |we: &WeightedEnsemble<BeadPairPotential, AdamW>| {
            we.evaluate(&states, &emb, EvalMode::ValueOnly).unwrap().energies_detached
        };
        let e0 = energies(&we);
        let obs: Vec<f64> = states.iter().map(|s| KabschRmsd.compute(s, &reference)).collect();

        let r = we.compute_gradients(&reference, &states, &emb, Mode::Train).unwrap();
        assert_relative_eq!(r.loss, (obs.iter().sum::<f64>() / 16.0).ln_1p(), epsilon = 1e-12);
        we.apply_gradients(r.gradients.as_ref()).unwrap();

        // The same batch reweighted to the updated potential
        let w = softmax(&log_weight_args(&energies(&we), &e0, temperature), true).unwrap();
        let reweighted: f64 = w.iter().zip(obs.iter()).map(|(w, o)| w * o).sum();
        assert!(reweighted < obs.iter().sum::<f64>() / 16.0);
        assert_eq!(we.grad_norm_history().len(), 2);
    }
}
