//! Data quality expectations
//!
//! An expectation is a named predicate with an enforcement policy. The
//! [`ExpectationEngine`] evaluates a node's expectations in declared order
//! and stops at the first `drop` or `fail` violation. Expectations gate
//! records; they never modify them.

mod predicate;

pub use predicate::{CompareOp, Expr, Predicate};

use crate::error::{GraphError, GraphResult};
use dashmap::DashMap;
use medallion_config::{ExpectationDefinition, ExpectationPolicy};
use medallion_types::Record;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// A named data quality rule
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub name: String,
    pub predicate: Predicate,
    pub policy: ExpectationPolicy,
}

impl Expectation {
    pub fn new(name: impl Into<String>, predicate: Predicate, policy: ExpectationPolicy) -> Self {
        Self {
            name: name.into(),
            predicate,
            policy,
        }
    }

    /// Parse an expectation from its definition; parse failures are graph
    /// definition errors attributed to `node`
    pub fn from_definition(node: &str, def: &ExpectationDefinition) -> GraphResult<Self> {
        let predicate = Predicate::parse(&def.expr).map_err(|e| GraphError::InvalidPredicate {
            node: node.to_string(),
            name: def.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(def.name.clone(), predicate, def.policy))
    }

    pub fn drop(name: &str, expr: &str) -> GraphResult<Self> {
        Self::parse(name, expr, ExpectationPolicy::Drop)
    }

    pub fn fail(name: &str, expr: &str) -> GraphResult<Self> {
        Self::parse(name, expr, ExpectationPolicy::Fail)
    }

    pub fn warn(name: &str, expr: &str) -> GraphResult<Self> {
        Self::parse(name, expr, ExpectationPolicy::Warn)
    }

    fn parse(name: &str, expr: &str, policy: ExpectationPolicy) -> GraphResult<Self> {
        Self::from_definition(
            "",
            &ExpectationDefinition {
                name: name.to_string(),
                expr: expr.to_string(),
                policy,
            },
        )
    }

    /// A record satisfies the expectation only if the predicate is TRUE
    pub fn is_satisfied_by(&self, record: &Record) -> bool {
        self.predicate.matches(record)
    }
}

/// Result of evaluating a record against a list of expectations
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Every drop/fail expectation held; the record is returned unchanged
    Passed(Record),
    /// A `drop` expectation was violated
    Dropped { expectation: String },
    /// A `fail` expectation was violated
    Fatal { expectation: String },
}

impl Evaluation {
    pub fn is_passed(&self) -> bool {
        matches!(self, Evaluation::Passed(_))
    }
}

#[derive(Debug, Default)]
struct Counters {
    evaluated: AtomicU64,
    dropped: AtomicU64,
    warned: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of one expectation's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationStats {
    pub name: String,
    pub policy: String,
    pub evaluated: u64,
    pub dropped: u64,
    pub warned: u64,
    pub failed: u64,
}

/// Evaluates expectations for one node and keeps per-expectation counters
#[derive(Debug)]
pub struct ExpectationEngine {
    node: String,
    counters: DashMap<String, (ExpectationPolicy, Counters)>,
}

impl ExpectationEngine {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            counters: DashMap::new(),
        }
    }

    /// Evaluate `record` against `expectations` in declared order.
    ///
    /// A `drop` or `fail` violation ends evaluation immediately, so a record
    /// violating a `drop` rule declared before a `fail` rule is dropped, not
    /// failed. A `warn` violation is logged and evaluation continues.
    pub fn evaluate(&self, record: Record, expectations: &[Expectation]) -> Evaluation {
        for expectation in expectations {
            let satisfied = expectation.is_satisfied_by(&record);
            self.with_counters(expectation, |c| {
                c.evaluated.fetch_add(1, Ordering::Relaxed);
            });

            if satisfied {
                continue;
            }

            match expectation.policy {
                ExpectationPolicy::Drop => {
                    self.with_counters(expectation, |c| {
                        c.dropped.fetch_add(1, Ordering::Relaxed);
                    });
                    trace!(
                        node = %self.node,
                        expectation = %expectation.name,
                        "Record dropped by expectation"
                    );
                    return Evaluation::Dropped {
                        expectation: expectation.name.clone(),
                    };
                }
                ExpectationPolicy::Fail => {
                    self.with_counters(expectation, |c| {
                        c.failed.fetch_add(1, Ordering::Relaxed);
                    });
                    return Evaluation::Fatal {
                        expectation: expectation.name.clone(),
                    };
                }
                ExpectationPolicy::Warn => {
                    self.with_counters(expectation, |c| {
                        c.warned.fetch_add(1, Ordering::Relaxed);
                    });
                    warn!(
                        node = %self.node,
                        expectation = %expectation.name,
                        predicate = %expectation.predicate,
                        "Expectation violated, record kept"
                    );
                }
            }
        }

        Evaluation::Passed(record)
    }

    fn with_counters(&self, expectation: &Expectation, f: impl FnOnce(&Counters)) {
        let entry = self
            .counters
            .entry(expectation.name.clone())
            .or_insert_with(|| (expectation.policy, Counters::default()));
        f(&entry.1);
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Records dropped by `expectation` so far
    pub fn dropped(&self, expectation: &str) -> u64 {
        self.counters
            .get(expectation)
            .map(|e| e.1.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Warnings raised by `expectation` so far
    pub fn warned(&self, expectation: &str) -> u64 {
        self.counters
            .get(expectation)
            .map(|e| e.1.warned.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of all counters, sorted by expectation name
    pub fn stats(&self) -> Vec<ExpectationStats> {
        let mut stats: Vec<ExpectationStats> = self
            .counters
            .iter()
            .map(|entry| {
                let (policy, counters) = entry.value();
                ExpectationStats {
                    name: entry.key().clone(),
                    policy: policy.to_string(),
                    evaluated: counters.evaluated.load(Ordering::Relaxed),
                    dropped: counters.dropped.load(Ordering::Relaxed),
                    warned: counters.warned.load(Ordering::Relaxed),
                    failed: counters.failed.load(Ordering::Relaxed),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
