//! Prometheus metrics for the pipeline engine
//!
//! All series are labelled by node (and expectation where relevant) and are
//! exported in the Prometheus text format through [`PipelineMetrics::encode`].

mod labels;
mod registry;

pub use labels::{ExpectationLabels, NodeLabels};
pub use registry::{BatchCounts, PipelineMetrics};

use thiserror::Error;

/// Errors that can occur in the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("metric encoding error: {0}")]
    EncodingError(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
