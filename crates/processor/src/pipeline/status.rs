//! Node lifecycle and tick reporting

use crate::expectation::ExpectationStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a table node
///
/// `Pending -> Running -> Succeeded` each tick, or `Running -> Failed`, which
/// holds until the failure is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Pending => write!(f, "pending"),
            NodeState::Running => write!(f, "running"),
            NodeState::Succeeded => write!(f, "succeeded"),
            NodeState::Failed => write!(f, "failed"),
        }
    }
}

/// What happened to a node during one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// A micro-batch was committed
    Committed { batch_id: u64 },
    /// No new input
    Idle,
    /// Not run because an upstream failed or did not commit
    Skipped { upstream: String },
    /// The node failed and stays failed until cleared
    Failed { error: String },
    /// Transient I/O retries were exhausted; retried next tick
    IoFailure { error: String },
}

impl NodeOutcome {
    /// Whether downstream nodes may run after this outcome
    pub fn unblocks_downstream(&self) -> bool {
        matches!(self, NodeOutcome::Committed { .. } | NodeOutcome::Idle)
    }
}

/// Per-node line of a [`TickReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: String,
    #[serde(flatten)]
    pub outcome: NodeOutcome,
    pub records_in: u64,
    pub records_out: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub late_dropped: u64,
    pub watermark: Option<i64>,
}

impl NodeReport {
    pub(crate) fn new(node: impl Into<String>, outcome: NodeOutcome) -> Self {
        Self {
            node: node.into(),
            outcome,
            records_in: 0,
            records_out: 0,
            filtered: 0,
            dropped: 0,
            late_dropped: 0,
            watermark: None,
        }
    }
}

/// Result of one executor tick, nodes in topological order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub nodes: Vec<NodeReport>,
}

impl TickReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node == name)
    }

    /// Total records committed across all nodes
    pub fn records_out(&self) -> u64 {
        self.nodes.iter().map(|n| n.records_out).sum()
    }

    pub fn committed(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.outcome, NodeOutcome::Committed { .. }))
            .count()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.outcome, NodeOutcome::Failed { .. }))
            .map(|n| n.node.as_str())
            .collect()
    }
}

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub state: NodeState,
    pub upstream: Vec<String>,
    pub input_offsets: BTreeMap<String, u64>,
    pub output_offset: u64,
    pub batch_id: u64,
    pub records_in: u64,
    pub records_out: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub late_dropped: u64,
    pub io_failures: u64,
    pub watermark: Option<i64>,
    pub open_windows: Option<usize>,
    pub last_error: Option<String>,
    pub expectations: Vec<ExpectationStats>,
}
