//! Declarative pipeline definitions
//!
//! A pipeline is a list of table nodes. Each node names its upstream tables,
//! the transform applied to every record, the expectations that gate its
//! output and, for windowed nodes, the window and aggregation layout.

use serde::{Deserialize, Serialize};

/// A complete pipeline: an ordered list of table nodes
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineDefinition {
    /// Pipeline name, used in logs and metrics
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    /// Table nodes in registration order
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
}

impl PipelineDefinition {
    pub fn node(&self, name: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// One table of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDefinition {
    pub name: String,

    #[serde(default)]
    pub comment: Option<String>,

    /// Upstream tables; an empty list reads from the event source
    #[serde(default)]
    pub upstream: Vec<String>,

    /// Registered transform applied to every input record
    #[serde(default = "default_transform")]
    pub transform: String,

    /// Optional row filter applied after the transform
    #[serde(default)]
    pub filter: Option<String>,

    /// Data quality expectations, evaluated in declared order
    #[serde(default)]
    pub expectations: Vec<ExpectationDefinition>,

    /// Window layout; present only on windowed nodes
    #[serde(default)]
    pub window: Option<WindowDefinition>,

    #[serde(default)]
    pub aggregations: Vec<AggregationDefinition>,

    /// Ratio fields computed from finalized aggregates at emission
    #[serde(default)]
    pub derived: Vec<DerivedDefinition>,
}

impl NodeDefinition {
    /// Row-wise node with the given name and transform
    pub fn new(name: impl Into<String>, transform: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            upstream: Vec::new(),
            transform: transform.into(),
            filter: None,
            expectations: Vec::new(),
            window: None,
            aggregations: Vec::new(),
            derived: Vec::new(),
        }
    }

    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream.push(upstream.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_expectation(
        mut self,
        name: impl Into<String>,
        expr: impl Into<String>,
        policy: ExpectationPolicy,
    ) -> Self {
        self.expectations.push(ExpectationDefinition {
            name: name.into(),
            expr: expr.into(),
            policy,
        });
        self
    }

    pub fn with_window(mut self, window: WindowDefinition) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_aggregation(
        mut self,
        kind: AggregationKind,
        field: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        self.aggregations.push(AggregationDefinition {
            kind,
            field: field.into(),
            alias: alias.into(),
            round: None,
        });
        self
    }

    pub fn with_derived(mut self, derived: DerivedDefinition) -> Self {
        self.derived.push(derived);
        self
    }

    pub fn is_windowed(&self) -> bool {
        self.window.is_some()
    }
}

/// Enforcement policy of an expectation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExpectationPolicy {
    /// Discard the violating record
    Drop,
    /// Abort the micro-batch and fail the node
    Fail,
    /// Log and keep the record
    Warn,
}

impl std::fmt::Display for ExpectationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectationPolicy::Drop => write!(f, "drop"),
            ExpectationPolicy::Fail => write!(f, "fail"),
            ExpectationPolicy::Warn => write!(f, "warn"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpectationDefinition {
    pub name: String,
    /// Predicate expression, e.g. `user_id > 0`
    pub expr: String,
    #[serde(default = "default_policy")]
    pub policy: ExpectationPolicy,
}

/// Tumbling window layout of a windowed node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowDefinition {
    /// Window length in milliseconds
    pub duration_ms: u64,

    /// Allowed lateness in milliseconds; the engine default applies when unset
    #[serde(default)]
    pub allowed_lateness_ms: Option<u64>,

    /// Grouping key fields
    #[serde(default)]
    pub group_by: Vec<String>,

    #[serde(default = "default_start_alias")]
    pub start_alias: String,

    #[serde(default = "default_end_alias")]
    pub end_alias: String,

    /// Cap on open groups per window; the engine default applies when unset
    #[serde(default)]
    pub max_groups: Option<usize>,
}

impl WindowDefinition {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            allowed_lateness_ms: None,
            group_by: Vec::new(),
            start_alias: default_start_alias(),
            end_alias: default_end_alias(),
            max_groups: None,
        }
    }

    pub fn with_lateness(mut self, allowed_lateness_ms: u64) -> Self {
        self.allowed_lateness_ms = Some(allowed_lateness_ms);
        self
    }

    pub fn with_group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn with_aliases(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start_alias = start.into();
        self.end_alias = end.into();
        self
    }
}

/// Accumulator kinds supported by windowed nodes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    First,
    #[serde(alias = "approx_count_distinct")]
    ApproxDistinct,
}

impl std::fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregationKind::Count => "count",
            AggregationKind::Sum => "sum",
            AggregationKind::Avg => "avg",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
            AggregationKind::First => "first",
            AggregationKind::ApproxDistinct => "approx_distinct",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationDefinition {
    pub kind: AggregationKind,

    /// Source field; `*` counts rows
    #[serde(default = "default_field")]
    pub field: String,

    pub alias: String,

    /// Decimal places applied to the emitted value
    #[serde(default)]
    pub round: Option<u32>,
}

/// `alias = numerator / denominator * scale`, computed from finalized
/// aggregates when the window is emitted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedDefinition {
    pub alias: String,
    pub numerator: String,
    pub denominator: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub round: Option<u32>,
}

fn default_pipeline_name() -> String {
    "pipeline".to_string()
}

fn default_transform() -> String {
    "identity".to_string()
}

fn default_policy() -> ExpectationPolicy {
    ExpectationPolicy::Drop
}

fn default_start_alias() -> String {
    "window_start".to_string()
}

fn default_end_alias() -> String {
    "window_end".to_string()
}

fn default_field() -> String {
    "*".to_string()
}

fn default_scale() -> f64 {
    1.0
}
