use thiserror::Error;

use super::config::ConfigError;
use crate::core::energy::MinimizationFailure;
use crate::core::matrix::MatrixError;
use crate::core::space::SpaceError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Invalid design space: {source}")]
    Space {
        #[from]
        source: SpaceError,
    },

    #[error("Energy evaluation failed: {source}")]
    Energy {
        #[from]
        source: MinimizationFailure,
    },

    #[error("Energy matrix construction failed: {source}")]
    Matrix {
        #[from]
        source: MatrixError,
    },

    #[error("Failed to start minimization thread pool: {0}")]
    ThreadPool(String),

    #[error("Phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: &'static str, reason: String },
}
