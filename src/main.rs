use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use rust_cgwe::{
    ideal_helix, read_config, sequence_embeddings, AdamW, BeadKind, BeadPairPotential, KabschRmsd,
    Learner, Log1pLoss, MetropolisSampler, Mode, Optimizer, OptimizerKind, Sgd, TrainConfig,
    WeightedEnsemble, N_EMBEDDING_TYPES,
};

#[derive(Parser, Debug)]
#[command(version, about = "Weighted-ensemble training of a coarse-grained chain potential", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    /// Run a validation step after every training step
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = read_config(&args.config).with_context(|| format!("reading {}", args.config))?;
    info!("loaded configuration from {}", args.config);

    let pot = BeadPairPotential::new(N_EMBEDDING_TYPES, config.repulsion_length);
    let params = pot.init_params(config.bond_k, config.bond_r0, config.repulsion);

    match config.optimizer {
        OptimizerKind::AdamW => {
            let opt = AdamW::new(params, config.lr).with_weight_decay(config.weight_decay);
            train(&config, pot, opt, args.validate)
        }
        OptimizerKind::Sgd => {
            let opt = Sgd::new(params, config.lr)
                .with_momentum(config.momentum)
                .with_weight_decay(config.weight_decay);
            train(&config, pot, opt, args.validate)
        }
    }
}

fn train<O: Optimizer>(config: &TrainConfig, pot: BeadPairPotential, optimizer: O, validate: bool) -> Result<()> {
    let kind: BeadKind = config.bead.parse()?;
    let embedding = sequence_embeddings(kind, &config.sequence[..])?;
    let reference = ideal_helix(
        config.sequence.len(),
        config.helix.radius,
        config.helix.rise,
        config.helix.residues_per_turn,
    );

    let ensemble = WeightedEnsemble::new(pot, optimizer, config.ensemble_config(), KabschRmsd, Log1pLoss)
        .with_val_fn(KabschRmsd);
    let sampler = MetropolisSampler::new(config.sampler_params(), config.seed)?;
    let mut learner = Learner::new(ensemble, sampler, reference, embedding, config.steps, config.output_period)?
        .with_scheduler(config.scheduler.build())
        .with_neff_threshold(config.neff_threshold);

    println!("Weighted-ensemble training");
    println!("--------------------------");
    println!("Residues: {}", config.sequence.len());
    println!("Replicas: {}", config.replicas);
    println!("Temperature: {:.1} K", config.temperature);

    for _ in 0..config.epochs {
        let step = learner.step(Mode::Train)?;
        info!(
            "train loss {:.4} avg_metric {:.3} acceptance {:.2} restarted {}",
            step.loss, step.avg_metric, step.sampling.acceptance_rate, step.restarted
        );
        if validate {
            learner.step(Mode::Validation)?;
        }
        let stats = learner.compute_epoch_stats();
        println!(
            "epoch {:4}  train_loss {:.4}  train_rmsd {:.3} Å  lr {:.2e}",
            stats.epoch,
            stats.train_loss.unwrap_or(f64::NAN),
            stats.train_avg_metric.unwrap_or(f64::NAN),
            stats.lr
        );
        if let Some(path) = config.params_output.as_ref() {
            learner
                .save_params(path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }
    Ok(())
}
