//! Medallion CLI
//!
//! Runs the configured pipeline against its synthetic source, validates
//! pipeline definitions and inspects stored checkpoints.

pub mod commands;
pub mod output;

use medallion_config::ConfigError;
use medallion_processor::{GraphError, ProcessorError, StateError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline definition error: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error("storage error: {0}")]
    State(#[from] StateError),

    #[error("failed to encode output: {0}")]
    Encoding(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more nodes ended the run in the failed state
    #[error("nodes failed: {}", .0.join(", "))]
    NodesFailed(Vec<String>),
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Encoding(err.to_string())
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;
