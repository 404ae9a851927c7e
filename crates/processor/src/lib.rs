//! Incremental medallion pipeline engine
//!
//! Tables are declared as nodes of a DAG ([`graph::PipelineGraph`]) and
//! refined tier by tier: bronze nodes ingest raw events from an
//! [`source::EventSource`], silver nodes clean and validate them through
//! [`expectation`]s, and gold nodes fold them into tumbling event-time
//! windows ([`window::WindowAggregator`]). The
//! [`pipeline::IncrementalExecutor`] drives the graph in micro-batches and
//! commits every node's output together with its checkpoint, so a restart
//! resumes exactly where the last commit left off.

pub mod aggregation;
pub mod error;
pub mod expectation;
pub mod graph;
pub mod metrics;
pub mod pipeline;
pub mod source;
pub mod state;
pub mod transform;
pub mod watermark;
pub mod window;

pub use error::{
    AggregationError, GraphError, ProcessorError, Result as ProcessorResult, SourceError,
    StateError, TransformError, WindowError,
};
pub use expectation::{Evaluation, Expectation, ExpectationEngine, ExpectationStats, Predicate};
pub use graph::{PipelineGraph, TableNode};
pub use metrics::PipelineMetrics;
pub use pipeline::{
    IncrementalExecutor, NodeOutcome, NodeState, NodeStatus, PipelineBuilder, TickReport,
};
pub use source::{EventSource, MemoryEventSource, SourceBatch, SyntheticEventSource};
pub use state::{Checkpoint, CommitToken, StorageAdapter, TableStore};
pub use transform::{Transform, TransformRegistry};
pub use watermark::{BoundedLatenessWatermark, Watermark};
pub use window::{WindowAggregator, WindowBatch, WindowSpec};
