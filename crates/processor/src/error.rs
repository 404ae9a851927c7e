//! Error types for the medallion processor
//!
//! Errors fall into three groups: startup errors raised while the pipeline
//! graph is built ([`GraphError`]), node-level errors that fail a single node
//! (`ValidationFatal`, [`TransformError`]), and transient I/O errors that are
//! retried from the last committed checkpoint ([`ProcessorError::is_transient`]).

use medallion_types::RecordError;
use thiserror::Error;

/// Main processor error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Pipeline definition errors, raised before execution starts
    #[error("graph definition error: {0}")]
    Graph(#[from] GraphError),

    /// Window assignment and snapshot errors
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Aggregation-related errors
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// State backend errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Event source errors
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Transform errors, including schema mismatches
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    /// A `fail` expectation was violated
    #[error("expectation '{expectation}' failed on node '{node}' at input offset {offset}")]
    ValidationFatal {
        node: String,
        expectation: String,
        offset: u64,
    },

    /// A source or storage call exceeded the configured timeout
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Configuration errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ProcessorError {
    /// Whether the failed micro-batch may be retried from the same checkpoint
    pub fn is_transient(&self) -> bool {
        match self {
            ProcessorError::Timeout { .. } => true,
            ProcessorError::Source(err) => err.is_transient(),
            ProcessorError::State(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Pipeline graph definition errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("duplicate node: '{name}' is already registered")]
    DuplicateNode { name: String },

    #[error("unknown upstream: node '{node}' references missing upstream '{upstream}'")]
    UnknownUpstream { node: String, upstream: String },

    #[error("node '{node}' lists upstream '{upstream}' more than once")]
    DuplicateUpstream { node: String, upstream: String },

    #[error("cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("unknown node: '{name}'")]
    UnknownNode { name: String },

    #[error("node '{node}' references unknown transform '{transform}'")]
    UnknownTransform { node: String, transform: String },

    #[error("node '{node}': invalid predicate '{name}': {reason}")]
    InvalidPredicate {
        node: String,
        name: String,
        reason: String,
    },

    #[error("node '{node}': invalid window: {reason}")]
    InvalidWindow { node: String, reason: String },
}

/// Predicate parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredicateError {
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },

    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("unexpected token '{found}', expected {expected}")]
    UnexpectedToken { found: String, expected: String },

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: String },

    #[error("invalid number literal '{literal}'")]
    InvalidNumber { literal: String },
}

/// Window assignment and management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// Window size is invalid
    #[error("invalid window size: {size}ms, must be greater than 0")]
    InvalidWindowSize { size: u64 },

    /// A derived field references an aggregate alias that does not exist
    #[error("derived field '{alias}' references unknown aggregate '{field}'")]
    UnknownDerivedInput { alias: String, field: String },

    /// Snapshot was taken with a different window/aggregation layout
    #[error("snapshot fingerprint mismatch: expected {expected:016x}, found {actual:016x}")]
    SnapshotMismatch { expected: u64, actual: u64 },
}

/// Aggregation computation errors
#[derive(Error, Debug)]
pub enum AggregationError {
    /// Type mismatch in aggregation
    #[error("type mismatch in {aggregation}: expected {expected}, got {actual}")]
    TypeMismatch {
        aggregation: String,
        expected: String,
        actual: String,
    },

    /// Sketch precision out of range
    #[error("invalid sketch precision {precision}, must be within {min}..={max}")]
    InvalidPrecision { precision: u8, min: u8, max: u8 },

    /// Aggregation state is corrupted
    #[error("corrupted aggregation state for {aggregation_type}: {details}")]
    CorruptedState {
        aggregation_type: String,
        details: String,
    },
}

/// State backend operation errors
#[derive(Error, Debug)]
pub enum StateError {
    /// State serialization failed
    #[error("state serialization failed for key '{key}': {reason}")]
    SerializationFailed { key: String, reason: String },

    /// State deserialization failed
    #[error("state deserialization failed for key '{key}': {reason}")]
    DeserializationFailed { key: String, reason: String },

    /// State backend storage error
    #[error("storage error in {backend_type}: {details}")]
    StorageError {
        backend_type: String,
        details: String,
    },

    /// Checkpoint failed integrity validation
    #[error("checkpoint for node '{node}' failed validation: {reason}")]
    CorruptedCheckpoint { node: String, reason: String },

    /// A commit tried to move a checkpoint offset backwards
    #[error("offset regression on node '{node}' for input '{input}': committed {committed}, attempted {attempted}")]
    OffsetRegression {
        node: String,
        input: String,
        committed: u64,
        attempted: u64,
    },
}

impl StateError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StateError::StorageError { .. })
    }
}

/// Event source errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// Source temporarily unable to serve records
    #[error("source '{source_name}' unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    /// Offset outside the range the source can replay
    #[error("source '{source_name}' cannot replay from offset {offset}: {reason}")]
    InvalidOffset {
        source_name: String,
        offset: u64,
        reason: String,
    },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. })
    }
}

/// Transform errors
#[derive(Error, Debug)]
pub enum TransformError {
    /// Input record is missing a field or carries a wrongly typed one
    #[error("schema mismatch in transform '{transform}': {source}")]
    SchemaMismatch {
        transform: String,
        #[source]
        source: RecordError,
    },
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Result type alias for graph construction
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Result type alias for predicate parsing
pub type PredicateResult<T> = std::result::Result<T, PredicateError>;

/// Result type alias for window operations
pub type WindowResult<T> = std::result::Result<T, WindowError>;

/// Result type alias for aggregation operations
pub type AggregationResult<T> = std::result::Result<T, AggregationError>;

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Result type alias for source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

impl From<bincode::Error> for ProcessorError {
    fn from(err: bincode::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        ProcessorError::Unexpected(err.to_string())
    }
}

impl From<medallion_config::ConfigError> for ProcessorError {
    fn from(err: medallion_config::ConfigError) -> Self {
        ProcessorError::Configuration {
            source: Box::new(err),
        }
    }
}
