//! Pipeline construction and execution
//!
//! [`PipelineBuilder`] turns a declarative definition into a validated
//! [`PipelineGraph`](crate::graph::PipelineGraph); [`IncrementalExecutor`]
//! runs it in checkpointed micro-batches.

pub mod builder;
pub mod executor;
pub mod status;

pub use builder::{build_node, PipelineBuilder};
pub use executor::IncrementalExecutor;
pub use status::{NodeOutcome, NodeReport, NodeState, NodeStatus, TickReport};
