//! Registry of pipeline metrics

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use super::labels::{ExpectationLabels, NodeLabels};
use super::{MetricsError, Result};

/// Per-node counters and gauges of one pipeline
pub struct PipelineMetrics {
    registry: Registry,
    records_in: Family<NodeLabels, Counter>,
    records_out: Family<NodeLabels, Counter>,
    filtered: Family<NodeLabels, Counter>,
    dropped: Family<NodeLabels, Counter>,
    failed: Family<NodeLabels, Counter>,
    late_dropped: Family<NodeLabels, Counter>,
    overflow_dropped: Family<NodeLabels, Counter>,
    io_failures: Family<NodeLabels, Counter>,
    retries: Family<NodeLabels, Counter>,
    commits: Family<NodeLabels, Counter>,
    expectation_dropped: Family<ExpectationLabels, Counter>,
    expectation_warned: Family<ExpectationLabels, Counter>,
    watermark: Family<NodeLabels, Gauge>,
    lag: Family<NodeLabels, Gauge>,
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish_non_exhaustive()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("medallion");

        let records_in = Family::<NodeLabels, Counter>::default();
        registry.register("records_in", "Records read by a node", records_in.clone());

        let records_out = Family::<NodeLabels, Counter>::default();
        registry.register(
            "records_out",
            "Records committed to a node's output table",
            records_out.clone(),
        );

        let filtered = Family::<NodeLabels, Counter>::default();
        registry.register("filtered", "Records removed by a node filter", filtered.clone());

        let dropped = Family::<NodeLabels, Counter>::default();
        registry.register(
            "dropped",
            "Records dropped by drop expectations",
            dropped.clone(),
        );

        let failed = Family::<NodeLabels, Counter>::default();
        registry.register("failed", "Micro-batches aborted by fatal errors", failed.clone());

        let late_dropped = Family::<NodeLabels, Counter>::default();
        registry.register(
            "late_dropped",
            "Records dropped because their window had closed",
            late_dropped.clone(),
        );

        let overflow_dropped = Family::<NodeLabels, Counter>::default();
        registry.register(
            "overflow_dropped",
            "Records dropped because a window reached its group limit",
            overflow_dropped.clone(),
        );

        let io_failures = Family::<NodeLabels, Counter>::default();
        registry.register(
            "io_failures",
            "Micro-batches abandoned after exhausting I/O retries",
            io_failures.clone(),
        );

        let retries = Family::<NodeLabels, Counter>::default();
        registry.register("retries", "Transient I/O retries", retries.clone());

        let commits = Family::<NodeLabels, Counter>::default();
        registry.register("commits", "Committed micro-batches", commits.clone());

        let expectation_dropped = Family::<ExpectationLabels, Counter>::default();
        registry.register(
            "expectation_dropped",
            "Records dropped per expectation",
            expectation_dropped.clone(),
        );

        let expectation_warned = Family::<ExpectationLabels, Counter>::default();
        registry.register(
            "expectation_warned",
            "Warnings raised per expectation",
            expectation_warned.clone(),
        );

        let watermark = Family::<NodeLabels, Gauge>::default();
        registry.register(
            "watermark_ms",
            "Current event-time watermark of a windowed node",
            watermark.clone(),
        );

        let lag = Family::<NodeLabels, Gauge>::default();
        registry.register(
            "checkpoint_lag",
            "Input records available but not yet committed by a node",
            lag.clone(),
        );

        Self {
            registry,
            records_in,
            records_out,
            filtered,
            dropped,
            failed,
            late_dropped,
            overflow_dropped,
            io_failures,
            retries,
            commits,
            expectation_dropped,
            expectation_warned,
            watermark,
            lag,
        }
    }

    /// Account a committed micro-batch
    pub fn record_commit(&self, node: &str, batch: &BatchCounts) {
        let labels = NodeLabels::new(node);
        self.records_in.get_or_create(&labels).inc_by(batch.records_in);
        self.records_out.get_or_create(&labels).inc_by(batch.records_out);
        self.filtered.get_or_create(&labels).inc_by(batch.filtered);
        self.dropped.get_or_create(&labels).inc_by(batch.dropped);
        self.late_dropped.get_or_create(&labels).inc_by(batch.late_dropped);
        self.overflow_dropped
            .get_or_create(&labels)
            .inc_by(batch.overflow_dropped);
        self.commits.get_or_create(&labels).inc();
    }

    pub fn record_failure(&self, node: &str) {
        self.failed.get_or_create(&NodeLabels::new(node)).inc();
    }

    pub fn record_io_failure(&self, node: &str) {
        self.io_failures.get_or_create(&NodeLabels::new(node)).inc();
    }

    pub fn record_retry(&self, node: &str) {
        self.retries.get_or_create(&NodeLabels::new(node)).inc();
    }

    pub fn record_expectation_drop(&self, node: &str, expectation: &str, count: u64) {
        self.expectation_dropped
            .get_or_create(&ExpectationLabels::new(node, expectation))
            .inc_by(count);
    }

    pub fn record_expectation_warn(&self, node: &str, expectation: &str, count: u64) {
        self.expectation_warned
            .get_or_create(&ExpectationLabels::new(node, expectation))
            .inc_by(count);
    }

    pub fn set_watermark(&self, node: &str, watermark_ms: i64) {
        self.watermark
            .get_or_create(&NodeLabels::new(node))
            .set(watermark_ms);
    }

    pub fn set_lag(&self, node: &str, lag: u64) {
        self.lag
            .get_or_create(&NodeLabels::new(node))
            .set(i64::try_from(lag).unwrap_or(i64::MAX));
    }

    /// Records committed to `node`'s output so far
    pub fn records_out(&self, node: &str) -> u64 {
        self.records_out.get_or_create(&NodeLabels::new(node)).get()
    }

    pub fn io_failures(&self, node: &str) -> u64 {
        self.io_failures.get_or_create(&NodeLabels::new(node)).get()
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;
        Ok(buffer)
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Record counts of one committed micro-batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub records_in: u64,
    pub records_out: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub late_dropped: u64,
    pub overflow_dropped: u64,
}

impl BatchCounts {
    /// Add `other` into these totals
    pub fn absorb(&mut self, other: &BatchCounts) {
        self.records_in += other.records_in;
        self.records_out += other.records_out;
        self.filtered += other.filtered;
        self.dropped += other.dropped;
        self.late_dropped += other.late_dropped;
        self.overflow_dropped += other.overflow_dropped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_empty_registry() {
        let metrics = PipelineMetrics::new();
        assert!(metrics.encode().is_ok());
    }

    #[test]
    fn test_commit_counters() {
        let metrics = PipelineMetrics::new();
        let batch = BatchCounts {
            records_in: 10,
            records_out: 8,
            dropped: 2,
            ..Default::default()
        };
        metrics.record_commit("silver", &batch);
        metrics.record_commit("silver", &batch);
        metrics.set_watermark("gold", 1_000);

        assert_eq!(metrics.records_out("silver"), 16);
        assert_eq!(metrics.records_out("gold"), 0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("medallion_records_out_total{node=\"silver\"} 16"));
        assert!(text.contains("medallion_watermark_ms{node=\"gold\"} 1000"));
    }

    #[test]
    fn test_expectation_labels() {
        let metrics = PipelineMetrics::new();
        metrics.record_expectation_drop("silver", "valid_user_id", 3);
        let text = metrics.encode().unwrap();
        assert!(text.contains("expectation=\"valid_user_id\""));
    }
}
