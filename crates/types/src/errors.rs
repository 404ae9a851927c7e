//! Error types for record access

use thiserror::Error;

/// Result type alias for record operations
pub type Result<T> = std::result::Result<T, RecordError>;

/// Errors raised when a record does not have the shape a consumer expects
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("field '{field}' has type {actual}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("field '{field}' is null")]
    NullField { field: String },
}
