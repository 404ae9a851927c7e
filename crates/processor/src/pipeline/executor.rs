//! Incremental micro-batch executor
//!
//! Each tick walks the pipeline graph level by level. Nodes of one level run
//! concurrently; each reads what is new since its checkpoint (from the event
//! source for root nodes, from upstream tables otherwise), applies its
//! transform, filter and expectations, folds windowed nodes into their
//! [`WindowAggregator`], and commits output plus the advanced checkpoint as
//! one atomic unit. A failed commit leaves the node exactly where it was, so
//! the next attempt replays the same input.

use super::status::{NodeOutcome, NodeReport, NodeState, NodeStatus, TickReport};
use crate::error::{GraphError, ProcessorError, Result};
use crate::expectation::{Evaluation, ExpectationEngine};
use crate::graph::{PipelineGraph, TableNode};
use crate::metrics::{BatchCounts, PipelineMetrics};
use crate::source::EventSource;
use crate::state::{Checkpoint, StorageAdapter, SOURCE_INPUT};
use crate::window::WindowAggregator;

use futures::future::join_all;
use medallion_config::{EngineConfig, ExpectationPolicy};
use medallion_types::Record;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Mutable per-node execution state
#[derive(Debug)]
struct NodeRuntime {
    checkpoint: Checkpoint,
    aggregator: Option<WindowAggregator>,
    expectations: ExpectationEngine,
    state: NodeState,
    totals: BatchCounts,
    io_failures: u64,
    last_error: Option<String>,
    truncated_before: u64,
    /// A commit failed without knowing whether it landed
    unconfirmed_commit: bool,
}

impl NodeRuntime {
    fn new(name: &str, checkpoint: Checkpoint, aggregator: Option<WindowAggregator>) -> Self {
        Self {
            checkpoint,
            aggregator,
            expectations: ExpectationEngine::new(name),
            state: NodeState::Pending,
            totals: BatchCounts::default(),
            io_failures: 0,
            last_error: None,
            truncated_before: 0,
            unconfirmed_commit: false,
        }
    }

    fn watermark(&self) -> Option<i64> {
        self.aggregator
            .as_ref()
            .map(WindowAggregator::watermark)
            .filter(|wm| !wm.is_min())
            .map(|wm| wm.timestamp)
    }
}

/// New input of one node, tagged with input offsets
struct NodeInput {
    records: Vec<(u64, Record)>,
    offsets: BTreeMap<String, u64>,
}

/// A computed but not yet committed micro-batch
struct MicroBatch {
    input_offsets: BTreeMap<String, u64>,
    output: Vec<Record>,
    counts: BatchCounts,
    expectation_drops: BTreeMap<String, u64>,
    expectation_warns: BTreeMap<String, u64>,
    aggregator: Option<WindowAggregator>,
}

/// Drives a [`PipelineGraph`] in micro-batches
///
/// # Example
///
/// ```rust,no_run
/// use medallion_config::MedallionConfig;
/// use medallion_processor::pipeline::{IncrementalExecutor, PipelineBuilder};
/// use medallion_processor::source::SyntheticEventSource;
/// use medallion_processor::state::open_store;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = MedallionConfig::clickstream()?;
/// let graph = PipelineBuilder::new(config.pipeline.clone())
///     .with_engine_config(config.engine.clone())
///     .build()?;
/// let store = Arc::new(open_store(&config.storage).await?);
/// let source = Arc::new(SyntheticEventSource::open(config.source.clone(), store.as_ref()).await?);
///
/// let mut executor = IncrementalExecutor::open(graph, source, store, config.engine).await?;
/// let report = executor.tick().await;
/// println!("committed {} records", report.records_out());
/// # Ok(())
/// # }
/// ```
pub struct IncrementalExecutor {
    graph: PipelineGraph,
    source: Arc<dyn EventSource>,
    store: Arc<dyn StorageAdapter>,
    config: EngineConfig,
    runtimes: HashMap<String, NodeRuntime>,
    metrics: Arc<PipelineMetrics>,
    ticks: u64,
}

impl std::fmt::Debug for IncrementalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalExecutor")
            .field("nodes", &self.graph.len())
            .field("source", &self.source.name())
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl IncrementalExecutor {
    /// Restore every node's checkpoint and window state from `store`
    pub async fn open(
        graph: PipelineGraph,
        source: Arc<dyn EventSource>,
        store: Arc<dyn StorageAdapter>,
        config: EngineConfig,
    ) -> Result<Self> {
        let metrics = Arc::new(PipelineMetrics::new());
        let mut runtimes = HashMap::with_capacity(graph.len());

        for name in graph.topological_order() {
            let node = graph.get(name).ok_or_else(|| GraphError::UnknownNode {
                name: name.to_string(),
            })?;

            let stored = with_retry(&config, &metrics, name, "checkpoint load", || {
                store.load_checkpoint(name)
            })
            .await?;

            let mut aggregator = node
                .window
                .clone()
                .map(|spec| WindowAggregator::new(name, spec));

            let checkpoint = match stored {
                Some(checkpoint) => {
                    if let (Some(aggregator), Some(state)) =
                        (aggregator.as_mut(), checkpoint.window_state.as_deref())
                    {
                        aggregator.restore(state)?;
                    }
                    info!(
                        node = name,
                        batch_id = checkpoint.batch_id,
                        output_offset = checkpoint.output_offset,
                        inputs = ?checkpoint.input_offsets,
                        "Restored checkpoint"
                    );
                    checkpoint
                }
                None => Checkpoint::initial(name),
            };

            runtimes.insert(name.to_string(), NodeRuntime::new(name, checkpoint, aggregator));
        }

        for orphan in store.checkpointed_nodes().await? {
            if !graph.contains(&orphan) {
                warn!(node = %orphan, "Ignoring checkpoint of a node missing from the pipeline");
            }
        }

        info!(
            nodes = graph.len(),
            levels = graph.levels().len(),
            source = source.name(),
            "Executor opened"
        );

        Ok(Self {
            graph,
            source,
            store,
            config,
            runtimes,
            metrics,
            ticks: 0,
        })
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn StorageAdapter> {
        &self.store
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Ticks executed since `open`
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one micro-batch on every node that can make progress
    pub async fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let tick = self.ticks;
        let mut outcomes: HashMap<String, NodeOutcome> = HashMap::new();
        let mut reports = Vec::with_capacity(self.graph.len());

        let levels: Vec<Vec<String>> = self
            .graph
            .levels()
            .into_iter()
            .map(|level| level.into_iter().map(str::to_string).collect())
            .collect();

        for level in levels {
            let committed: HashMap<String, u64> = self
                .runtimes
                .iter()
                .map(|(name, runtime)| (name.clone(), runtime.checkpoint.output_offset))
                .collect();

            let mut settled: HashMap<String, (NodeRuntime, NodeReport)> = HashMap::new();
            let mut work = Vec::new();

            for name in &level {
                let (Some(node), Some(mut runtime)) =
                    (self.graph.get(name), self.runtimes.remove(name))
                else {
                    continue;
                };

                if runtime.state == NodeState::Failed {
                    let error = runtime.last_error.clone().unwrap_or_default();
                    settled.insert(
                        name.clone(),
                        (runtime, NodeReport::new(name.clone(), NodeOutcome::Failed { error })),
                    );
                    continue;
                }

                let blocked = node.upstream.iter().find(|upstream| {
                    !outcomes
                        .get(upstream.as_str())
                        .is_some_and(NodeOutcome::unblocks_downstream)
                });
                if let Some(upstream) = blocked {
                    debug!(node = %name, upstream = %upstream, "Skipping node, upstream did not complete");
                    runtime.state = NodeState::Pending;
                    let outcome = NodeOutcome::Skipped {
                        upstream: upstream.clone(),
                    };
                    settled.insert(name.clone(), (runtime, NodeReport::new(name.clone(), outcome)));
                    continue;
                }

                work.push((node, runtime));
            }

            let ctx = TickContext {
                source: self.source.as_ref(),
                store: self.store.as_ref(),
                config: &self.config,
                metrics: &self.metrics,
                committed: &committed,
            };
            let results =
                join_all(work.into_iter().map(|(node, runtime)| ctx.run_node(node, runtime))).await;
            for (runtime, report) in results {
                settled.insert(report.node.clone(), (runtime, report));
            }

            for name in level {
                if let Some((runtime, report)) = settled.remove(&name) {
                    outcomes.insert(name.clone(), report.outcome.clone());
                    self.runtimes.insert(name, runtime);
                    reports.push(report);
                }
            }
        }

        if self.config.truncate_consumed {
            self.truncate_consumed().await;
        }
        self.update_lag();

        TickReport {
            tick,
            nodes: reports,
        }
    }

    /// Tick every `tick_interval` until `shutdown` turns true (or its sender
    /// is dropped) or `max_ticks` ticks have run. An in-flight tick always
    /// completes. Returns the number of ticks executed.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>, max_ticks: Option<u64>) -> u64 {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut executed = 0u64;

        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            max_ticks = ?max_ticks,
            "Executor running"
        );

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested");
                break;
            }
            if max_ticks.is_some_and(|max| executed >= max) {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed");
                        break;
                    }
                    continue;
                }
            }

            let report = self.tick().await;
            executed += 1;

            if report.committed() > 0 {
                info!(
                    tick = report.tick,
                    committed_nodes = report.committed(),
                    records_out = report.records_out(),
                    failed = ?report.failed(),
                    "Tick committed"
                );
            } else {
                debug!(tick = report.tick, "Tick idle");
            }
        }

        info!(ticks = executed, "Executor stopped");
        executed
    }

    pub fn node_status(&self, name: &str) -> Option<NodeStatus> {
        let node = self.graph.get(name)?;
        let runtime = self.runtimes.get(name)?;
        Some(NodeStatus {
            name: node.name.clone(),
            state: runtime.state,
            upstream: node.upstream.clone(),
            input_offsets: runtime.checkpoint.input_offsets.clone(),
            output_offset: runtime.checkpoint.output_offset,
            batch_id: runtime.checkpoint.batch_id,
            records_in: runtime.totals.records_in,
            records_out: runtime.totals.records_out,
            filtered: runtime.totals.filtered,
            dropped: runtime.totals.dropped,
            late_dropped: runtime.totals.late_dropped,
            io_failures: runtime.io_failures,
            watermark: runtime.watermark(),
            open_windows: runtime.aggregator.as_ref().map(WindowAggregator::open_windows),
            last_error: runtime.last_error.clone(),
            expectations: runtime.expectations.stats(),
        })
    }

    /// Status of every node, in topological order
    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.graph
            .topological_order()
            .into_iter()
            .filter_map(|name| self.node_status(name))
            .collect()
    }

    /// Return a failed node to `Pending` so the next tick retries it from
    /// its last committed checkpoint
    pub fn clear_failure(&mut self, name: &str) -> Result<()> {
        let runtime = self
            .runtimes
            .get_mut(name)
            .ok_or_else(|| GraphError::UnknownNode {
                name: name.to_string(),
            })?;

        if runtime.state == NodeState::Failed {
            info!(node = name, error = ?runtime.last_error, "Clearing node failure");
            runtime.state = NodeState::Pending;
            runtime.last_error = None;
        }
        Ok(())
    }

    /// Drop intermediate rows that every downstream has consumed. Leaf
    /// tables are kept.
    async fn truncate_consumed(&mut self) {
        for node in self.graph.nodes() {
            let downstream = self.graph.downstream(&node.name);
            if downstream.is_empty() {
                continue;
            }

            let consumed = downstream
                .iter()
                .map(|d| {
                    self.runtimes
                        .get(*d)
                        .map_or(0, |r| r.checkpoint.input_offset(&node.name))
                })
                .min()
                .unwrap_or(0);

            let Some(runtime) = self.runtimes.get_mut(&node.name) else {
                continue;
            };
            if consumed <= runtime.truncated_before {
                continue;
            }

            match tokio::time::timeout(
                self.config.io_timeout(),
                self.store.truncate(&node.name, consumed),
            )
            .await
            {
                Ok(Ok(removed)) => {
                    runtime.truncated_before = consumed;
                    trace!(node = %node.name, before = consumed, removed, "Truncated table");
                }
                Ok(Err(err)) => {
                    warn!(node = %node.name, error = %err, "Table truncation failed");
                }
                Err(_) => {
                    warn!(node = %node.name, "Table truncation timed out");
                }
            }
        }
    }

    fn update_lag(&self) {
        for node in self.graph.nodes() {
            let Some(runtime) = self.runtimes.get(&node.name) else {
                continue;
            };
            let lag: u64 = node
                .upstream
                .iter()
                .map(|upstream| {
                    self.runtimes.get(upstream).map_or(0, |u| {
                        u.checkpoint
                            .output_offset
                            .saturating_sub(runtime.checkpoint.input_offset(upstream))
                    })
                })
                .sum();
            self.metrics.set_lag(&node.name, lag);
        }
    }
}

/// Shared, read-only view used by the node tasks of one level
struct TickContext<'a> {
    source: &'a dyn EventSource,
    store: &'a dyn StorageAdapter,
    config: &'a EngineConfig,
    metrics: &'a PipelineMetrics,
    /// Committed output offset of every node when the level started
    committed: &'a HashMap<String, u64>,
}

impl TickContext<'_> {
    async fn run_node(
        &self,
        node: &TableNode,
        mut runtime: NodeRuntime,
    ) -> (NodeRuntime, NodeReport) {
        let name = node.name.as_str();
        runtime.state = NodeState::Running;

        if runtime.unconfirmed_commit {
            if let Err(err) = self.resync(node, &mut runtime).await {
                let outcome = self.settle_error(name, &mut runtime, err);
                return (runtime, NodeReport::new(name, outcome));
            }
        }

        let input = match self.read_input(node, &runtime.checkpoint).await {
            Ok(input) => input,
            Err(err) => {
                let outcome = self.settle_error(name, &mut runtime, err);
                return (runtime, NodeReport::new(name, outcome));
            }
        };

        if input.records.is_empty() {
            runtime.state = NodeState::Succeeded;
            let mut report = NodeReport::new(name, NodeOutcome::Idle);
            report.watermark = runtime.watermark();
            return (runtime, report);
        }

        debug!(
            node = name,
            batch_id = runtime.checkpoint.batch_id + 1,
            records = input.records.len(),
            "Processing micro-batch"
        );

        let batch = match self.compute(node, &runtime, input) {
            Ok(batch) => batch,
            Err(err) => {
                let outcome = self.settle_error(name, &mut runtime, err);
                return (runtime, NodeReport::new(name, outcome));
            }
        };

        match self.commit(name, &runtime, &batch).await {
            Ok(next) => {
                let batch_id = next.batch_id;
                runtime.checkpoint = next;
                runtime.aggregator = batch.aggregator;
                runtime.state = NodeState::Succeeded;
                runtime.totals.absorb(&batch.counts);

                self.metrics.record_commit(name, &batch.counts);
                for (expectation, count) in &batch.expectation_drops {
                    self.metrics.record_expectation_drop(name, expectation, *count);
                }
                for (expectation, count) in &batch.expectation_warns {
                    self.metrics.record_expectation_warn(name, expectation, *count);
                }
                let watermark = runtime.watermark();
                if let Some(watermark) = watermark {
                    self.metrics.set_watermark(name, watermark);
                }

                if batch.counts.late_dropped > 0 {
                    warn!(node = name, late = batch.counts.late_dropped, "Dropped late records");
                }
                debug!(
                    node = name,
                    batch_id,
                    records_in = batch.counts.records_in,
                    records_out = batch.counts.records_out,
                    dropped = batch.counts.dropped,
                    filtered = batch.counts.filtered,
                    "Micro-batch committed"
                );

                let report = NodeReport {
                    node: name.to_string(),
                    outcome: NodeOutcome::Committed { batch_id },
                    records_in: batch.counts.records_in,
                    records_out: batch.counts.records_out,
                    filtered: batch.counts.filtered,
                    dropped: batch.counts.dropped,
                    late_dropped: batch.counts.late_dropped,
                    watermark,
                };
                (runtime, report)
            }
            Err(err) => {
                // The write may have been applied before the failure surfaced
                runtime.unconfirmed_commit = err.is_transient();
                let outcome = self.settle_error(name, &mut runtime, err);
                (runtime, NodeReport::new(name, outcome))
            }
        }
    }

    /// Adopt a checkpoint that reached storage even though its commit
    /// reported a failure, together with the window state stored in it
    async fn resync(&self, node: &TableNode, runtime: &mut NodeRuntime) -> Result<()> {
        let name = node.name.as_str();
        let stored = with_retry(self.config, self.metrics, name, "checkpoint load", || {
            self.store.load_checkpoint(name)
        })
        .await?;

        if let Some(stored) = stored.filter(|s| s.batch_id > runtime.checkpoint.batch_id) {
            let mut aggregator = node
                .window
                .clone()
                .map(|spec| WindowAggregator::new(name, spec));
            if let (Some(aggregator), Some(state)) =
                (aggregator.as_mut(), stored.window_state.as_deref())
            {
                aggregator.restore(state)?;
            }
            info!(
                node = name,
                batch_id = stored.batch_id,
                output_offset = stored.output_offset,
                "Adopted checkpoint of a commit reported as failed"
            );
            runtime.checkpoint = stored;
            runtime.aggregator = aggregator;
        }
        runtime.unconfirmed_commit = false;
        Ok(())
    }

    async fn read_input(&self, node: &TableNode, checkpoint: &Checkpoint) -> Result<NodeInput> {
        let max_rows = self.config.max_batch_rows;
        let mut offsets = checkpoint.input_offsets.clone();
        let mut records = Vec::new();

        if node.is_root() {
            let since = checkpoint.input_offset(SOURCE_INPUT);
            let batch = with_retry(self.config, self.metrics, &node.name, "source pull", || {
                self.source.pull(since, max_rows)
            })
            .await?;
            offsets.insert(SOURCE_INPUT.to_string(), batch.next_offset);
            records.extend((since..).zip(batch.records));
        } else {
            for upstream in &node.upstream {
                let since = checkpoint.input_offset(upstream);
                let until = self.committed.get(upstream).copied().unwrap_or(0);
                if until <= since {
                    continue;
                }
                let rows = with_retry(self.config, self.metrics, &node.name, "table read", || {
                    self.store.read_since(upstream, since, until, max_rows)
                })
                .await?;
                offsets.insert(upstream.clone(), since + rows.len() as u64);
                records.extend((since..).zip(rows));
            }
        }

        Ok(NodeInput { records, offsets })
    }

    /// Transform, filter, check and (for windowed nodes) aggregate one
    /// micro-batch. Works on a copy of the window state.
    fn compute(&self, node: &TableNode, runtime: &NodeRuntime, input: NodeInput) -> Result<MicroBatch> {
        let engine = &runtime.expectations;
        let warned_before: Vec<(String, u64)> = node
            .expectations
            .iter()
            .filter(|e| e.policy == ExpectationPolicy::Warn)
            .map(|e| (e.name.clone(), engine.warned(&e.name)))
            .collect();

        let mut counts = BatchCounts {
            records_in: input.records.len() as u64,
            ..BatchCounts::default()
        };
        let mut expectation_drops: BTreeMap<String, u64> = BTreeMap::new();
        let mut passed = Vec::with_capacity(input.records.len());

        for (offset, record) in input.records {
            let record = node.transform.apply(record)?;

            if let Some(filter) = &node.filter {
                if !filter.matches(&record) {
                    counts.filtered += 1;
                    continue;
                }
            }

            match engine.evaluate(record, &node.expectations) {
                Evaluation::Passed(record) => passed.push(record),
                Evaluation::Dropped { expectation } => {
                    counts.dropped += 1;
                    *expectation_drops.entry(expectation).or_default() += 1;
                }
                Evaluation::Fatal { expectation } => {
                    return Err(ProcessorError::ValidationFatal {
                        node: node.name.clone(),
                        expectation,
                        offset,
                    });
                }
            }
        }

        let expectation_warns = warned_before
            .into_iter()
            .filter_map(|(name, before)| {
                let delta = engine.warned(&name).saturating_sub(before);
                (delta > 0).then_some((name, delta))
            })
            .collect();

        let (output, aggregator) = match &runtime.aggregator {
            Some(current) => {
                let mut aggregator = current.clone();
                let window_batch = aggregator.process_batch(&passed)?;
                counts.late_dropped = window_batch.late_dropped;
                counts.overflow_dropped = window_batch.overflow_dropped;
                (window_batch.output, Some(aggregator))
            }
            None => (passed, None),
        };
        counts.records_out = output.len() as u64;

        Ok(MicroBatch {
            input_offsets: input.offsets,
            output,
            counts,
            expectation_drops,
            expectation_warns,
            aggregator,
        })
    }

    /// Atomically write the batch output and the advanced checkpoint
    async fn commit(&self, name: &str, runtime: &NodeRuntime, batch: &MicroBatch) -> Result<Checkpoint> {
        let window_state = batch
            .aggregator
            .as_ref()
            .map(WindowAggregator::snapshot)
            .transpose()?;
        let next = runtime.checkpoint.advance(
            batch.input_offsets.clone(),
            batch.output.len() as u64,
            window_state,
        );

        with_retry(self.config, self.metrics, name, "commit", || {
            self.store.commit(&batch.output, &next)
        })
        .await?;
        Ok(next)
    }

    fn settle_error(&self, name: &str, runtime: &mut NodeRuntime, err: ProcessorError) -> NodeOutcome {
        if err.is_transient() {
            runtime.state = NodeState::Pending;
            runtime.io_failures += 1;
            self.metrics.record_io_failure(name);
            warn!(node = name, error = %err, "I/O retries exhausted, node retries next tick");
            NodeOutcome::IoFailure {
                error: err.to_string(),
            }
        } else {
            runtime.state = NodeState::Failed;
            runtime.last_error = Some(err.to_string());
            self.metrics.record_failure(name);
            error!(node = name, error = %err, "Node failed");
            NodeOutcome::Failed {
                error: err.to_string(),
            }
        }
    }
}

/// Run `op` under the I/O timeout, retrying transient failures with
/// exponential backoff
async fn with_retry<T, E, F, Fut>(
    config: &EngineConfig,
    metrics: &PipelineMetrics,
    node: &str,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<ProcessorError>,
{
    let max_attempts = config.retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(config.io_timeout(), op()).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(ProcessorError::Timeout {
                operation: operation.to_string(),
                timeout_ms: config.io_timeout_ms,
            }),
        };

        match result {
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = config.retry.delay_for_attempt(attempt);
                warn!(
                    node,
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient I/O failure, retrying"
                );
                metrics.record_retry(node);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::source::MemoryEventSource;
    use crate::error::StateResult;
    use crate::state::{MemoryStateBackend, StateBackend, TableStore, WriteBatch};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use medallion_config::{NodeDefinition, PipelineDefinition, RetryConfig};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn engine() -> EngineConfig {
        EngineConfig {
            tick_interval_ms: 10,
            io_timeout_ms: 1_000,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
            },
            ..EngineConfig::default()
        }
    }

    fn records(ids: impl IntoIterator<Item = i64>) -> Vec<Record> {
        ids.into_iter()
            .map(|id| {
                Record::new(Utc.timestamp_millis_opt(id * 1000).unwrap()).with_field("id", id)
            })
            .collect()
    }

    async fn executor(
        nodes: Vec<NodeDefinition>,
        source: Arc<MemoryEventSource>,
    ) -> (IncrementalExecutor, Arc<MemoryStateBackend>) {
        let graph = PipelineBuilder::new(PipelineDefinition {
            name: "test".into(),
            nodes,
        })
        .build()
        .unwrap();
        let backend = Arc::new(MemoryStateBackend::new());
        let store = Arc::new(TableStore::new(backend.clone()));
        let executor = IncrementalExecutor::open(graph, source, store, engine())
            .await
            .unwrap();
        (executor, backend)
    }

    fn chain() -> Vec<NodeDefinition> {
        vec![
            NodeDefinition::new("bronze", "identity"),
            NodeDefinition::new("silver", "identity")
                .with_upstream("bronze")
                .with_filter("id < 5")
                .with_expectation("not_three", "id <> 3", ExpectationPolicy::Drop),
        ]
    }

    #[tokio::test]
    async fn test_tick_flows_through_levels() {
        let source = Arc::new(MemoryEventSource::with_records("mem", records(0..10)));
        let (mut executor, _) = executor(chain(), source).await;

        let report = executor.tick().await;
        assert_eq!(report.node("bronze").unwrap().records_out, 10);
        let silver = report.node("silver").unwrap();
        assert_eq!(silver.records_in, 10);
        assert_eq!(silver.filtered, 5);
        assert_eq!(silver.dropped, 1);
        assert_eq!(silver.records_out, 4);

        let status = executor.node_status("silver").unwrap();
        assert_eq!(status.state, NodeState::Succeeded);
        assert_eq!(status.input_offsets["bronze"], 10);
        assert_eq!(status.output_offset, 4);

        let report = executor.tick().await;
        assert_eq!(report.node("bronze").unwrap().outcome, NodeOutcome::Idle);
        assert_eq!(report.node("silver").unwrap().outcome, NodeOutcome::Idle);
    }

    #[tokio::test]
    async fn test_drop_expectation_counts() {
        let source = Arc::new(MemoryEventSource::with_records("mem", records([1, 3, 4])));
        let (mut executor, _) = executor(chain(), source).await;

        let report = executor.tick().await;
        let silver = report.node("silver").unwrap();
        assert_eq!(silver.dropped, 1);
        assert_eq!(silver.records_out, 2);
        assert_eq!(executor.node_status("silver").unwrap().expectations[0].dropped, 1);
    }

    #[tokio::test]
    async fn test_fatal_expectation_fails_node_until_cleared() {
        let nodes = vec![
            NodeDefinition::new("bronze", "identity"),
            NodeDefinition::new("silver", "identity")
                .with_upstream("bronze")
                .with_expectation("small", "id < 5", ExpectationPolicy::Fail),
            NodeDefinition::new("gold", "identity").with_upstream("silver"),
        ];
        let source = Arc::new(MemoryEventSource::with_records("mem", records(0..10)));
        let (mut executor, _) = executor(nodes, source).await;

        let report = executor.tick().await;
        assert!(matches!(
            report.node("silver").unwrap().outcome,
            NodeOutcome::Failed { .. }
        ));
        assert!(matches!(
            report.node("gold").unwrap().outcome,
            NodeOutcome::Skipped { .. }
        ));

        let status = executor.node_status("silver").unwrap();
        assert_eq!(status.state, NodeState::Failed);
        assert_eq!(status.output_offset, 0);
        assert!(status.last_error.unwrap().contains("offset 5"));

        // Stays failed on later ticks
        let report = executor.tick().await;
        assert!(matches!(
            report.node("silver").unwrap().outcome,
            NodeOutcome::Failed { .. }
        ));

        executor.clear_failure("silver").unwrap();
        assert_eq!(executor.node_status("silver").unwrap().state, NodeState::Pending);
        assert!(executor.clear_failure("missing").is_err());
    }

    #[tokio::test]
    async fn test_transient_source_failure_is_retried() {
        let source = Arc::new(MemoryEventSource::with_records("mem", records(0..4)));
        source.fail_next(2);
        let (mut executor, _) = executor(chain(), source).await;

        let report = executor.tick().await;
        assert_eq!(report.node("bronze").unwrap().records_out, 4);
        assert_eq!(executor.node_status("bronze").unwrap().io_failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_node_pending() {
        let source = Arc::new(MemoryEventSource::with_records("mem", records(0..4)));
        let (mut executor, backend) = executor(chain(), source).await;
        backend.fail_next_writes(3);

        let report = executor.tick().await;
        assert!(matches!(
            report.node("bronze").unwrap().outcome,
            NodeOutcome::IoFailure { .. }
        ));
        assert!(matches!(
            report.node("silver").unwrap().outcome,
            NodeOutcome::Skipped { .. }
        ));
        let status = executor.node_status("bronze").unwrap();
        assert_eq!(status.state, NodeState::Pending);
        assert_eq!(status.io_failures, 1);
        assert_eq!(status.output_offset, 0);

        let report = executor.tick().await;
        assert_eq!(report.node("bronze").unwrap().records_out, 4);
        assert_eq!(report.node("silver").unwrap().records_out, 3);
    }

    #[tokio::test]
    async fn test_consumed_rows_are_truncated() {
        let source = Arc::new(MemoryEventSource::with_records("mem", records(0..6)));
        let (mut executor, _) = executor(chain(), source).await;
        executor.tick().await;

        let store = executor.store();
        assert!(store.read_since("bronze", 0, 6, 10).await.unwrap().is_empty());
        assert_eq!(store.read_since("silver", 0, 3, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = Arc::new(MemoryEventSource::with_records("mem", records(0..3)));
        let (mut executor, _) = executor(chain(), source).await;

        let (tx, rx) = watch::channel(false);
        assert_eq!(executor.run(rx.clone(), Some(3)).await, 3);

        tx.send(true).unwrap();
        assert_eq!(executor.run(rx, None).await, 0);
        assert_eq!(executor.ticks(), 3);
        assert_eq!(executor.node_status("silver").unwrap().records_out, 3);
    }

    /// Applies writes at once but stalls the first `slow` flushes
    struct StallingFlush {
        inner: MemoryStateBackend,
        slow: AtomicU32,
    }

    #[async_trait]
    impl StateBackend for StallingFlush {
        fn backend_type(&self) -> &'static str {
            "stalling"
        }

        async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()> {
            self.inner.put(key, value).await
        }

        async fn delete(&self, key: &[u8]) -> StateResult<()> {
            self.inner.delete(key).await
        }

        async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>> {
            self.inner.list_keys(prefix).await
        }

        async fn scan(
            &self,
            prefix: &[u8],
            from: &[u8],
            limit: usize,
        ) -> StateResult<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.scan(prefix, from, limit).await
        }

        async fn apply_batch(&self, batch: WriteBatch) -> StateResult<()> {
            self.inner.apply_batch(batch).await
        }

        async fn flush(&self) -> StateResult<()> {
            let stalled = self
                .slow
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if stalled {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commit_that_landed_before_timeout_is_adopted() {
        let source = Arc::new(MemoryEventSource::with_records("mem", records(0..4)));
        let backend = Arc::new(StallingFlush {
            inner: MemoryStateBackend::new(),
            slow: AtomicU32::new(2),
        });
        let store = Arc::new(TableStore::new(backend).with_flush_on_commit(true));
        let graph = PipelineBuilder::new(PipelineDefinition {
            name: "test".into(),
            nodes: vec![NodeDefinition::new("bronze", "identity")],
        })
        .build()
        .unwrap();
        let config = EngineConfig {
            io_timeout_ms: 50,
            retry: RetryConfig {
                max_attempts: 2,
                ..engine().retry
            },
            ..engine()
        };
        let mut executor = IncrementalExecutor::open(graph, source.clone(), store.clone(), config)
            .await
            .unwrap();

        // Both attempts write the batch, then time out while flushing
        let report = executor.tick().await;
        assert!(matches!(
            report.node("bronze").unwrap().outcome,
            NodeOutcome::IoFailure { .. }
        ));
        assert_eq!(executor.node_status("bronze").unwrap().output_offset, 0);

        source.extend(records(4..6));
        let report = executor.tick().await;
        let bronze = report.node("bronze").unwrap();
        assert_eq!(bronze.outcome, NodeOutcome::Committed { batch_id: 2 });
        assert_eq!(bronze.records_in, 2);

        let status = executor.node_status("bronze").unwrap();
        assert_eq!(status.state, NodeState::Succeeded);
        assert_eq!(status.output_offset, 6);
        assert_eq!(status.input_offsets[SOURCE_INPUT], 6);
        assert_eq!(
            store.read_since("bronze", 0, u64::MAX, usize::MAX).await.unwrap(),
            records(0..6)
        );
    }
}
