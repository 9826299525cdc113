//! IO module - configuration and parameter snapshots.

mod config;

pub use config::{
    read_config, read_params, write_params, HelixConfig, OptimizerKind, ParamSnapshot,
    SchedulerConfig, SchedulerKind, TrainConfig,
};
