//! Error types for weighted-ensemble training.

use thiserror::Error;

/// Errors raised by the estimator, its collaborators and the training driver.
#[derive(Error, Debug)]
pub enum CgweError {
    /// State/embedding/gradient shapes do not line up.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Invalid mode flag, embedding code or configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Importance weights or gradients became non-finite.
    #[error("numerical instability: {0}")]
    Numerical(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CgweError {
    pub fn shape(message: impl Into<String>) -> Self {
        CgweError::ShapeMismatch(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        CgweError::Config(message.into())
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        CgweError::Numerical(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CgweError>;
