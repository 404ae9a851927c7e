//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use medallion_config::{
    AggregationKind, EngineConfig, NodeDefinition, PipelineDefinition, RetryConfig, SourceConfig,
    WindowDefinition,
};
use medallion_processor::pipeline::{IncrementalExecutor, PipelineBuilder};
use medallion_processor::source::EventSource;
use medallion_processor::state::StorageAdapter;
use medallion_processor::PipelineGraph;
use medallion_types::{Record, Value};
use std::sync::Arc;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn at_ms(ms: i64) -> DateTime<Utc> {
    epoch() + chrono::Duration::milliseconds(ms)
}

pub fn engine(max_batch_rows: usize) -> EngineConfig {
    EngineConfig {
        tick_interval_ms: 5,
        max_batch_rows,
        io_timeout_ms: 2_000,
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        },
        ..EngineConfig::default()
    }
}

pub fn synthetic(rows_per_second: f64, max_out_of_order_ms: u64) -> SourceConfig {
    SourceConfig {
        rows_per_second,
        seed: 42,
        start_time: Some(epoch()),
        null_amount_ratio: 0.05,
        max_out_of_order_ms,
        throttle: false,
    }
}

/// A full raw clickstream event
pub fn click_event(i: i64, event_type: &str, amount: Value) -> Record {
    let ts = at_ms(i * 1000);
    Record::new(ts)
        .with_field("event_id", format!("evt-{i}"))
        .with_field("user_id", i % 17 + 1)
        .with_field("session_id", format!("session_{}", i % 5))
        .with_field("event_type", event_type)
        .with_field("event_timestamp", ts)
        .with_field("page_url", "/page/1")
        .with_field("product_id", format!("prod_{}", i % 3))
        .with_field("quantity", 2i64)
        .with_field("amount", amount)
        .with_field("device_type", "mobile")
        .with_field("country", "US")
        .with_field("browser", "Chrome")
        .with_field("is_logged_in", true)
        .with_field("referrer_source", "direct")
}

/// `count` records one second apart with `key = i % 3` and `v = i`
pub fn keyed_events(range: std::ops::Range<i64>) -> Vec<Record> {
    range
        .map(|i| {
            Record::new(at_ms(i * 1000))
                .with_field("id", i)
                .with_field("key", i % 3)
                .with_field("v", i)
        })
        .collect()
}

/// `bronze -> gold` with ten second windows grouped by `key`
pub fn counting_pipeline() -> PipelineDefinition {
    PipelineDefinition {
        name: "counting".into(),
        nodes: vec![
            NodeDefinition::new("bronze", "identity"),
            NodeDefinition::new("gold", "identity")
                .with_upstream("bronze")
                .with_window(WindowDefinition::new(10_000).with_lateness(0).with_group_by("key"))
                .with_aggregation(AggregationKind::Count, "*", "n")
                .with_aggregation(AggregationKind::Sum, "v", "total")
                .with_aggregation(AggregationKind::Max, "v", "largest")
                .with_aggregation(AggregationKind::ApproxDistinct, "v", "distinct_v"),
        ],
    }
}

pub fn build(definition: PipelineDefinition, engine: &EngineConfig) -> PipelineGraph {
    PipelineBuilder::new(definition)
        .with_engine_config(engine.clone())
        .build()
        .unwrap()
}

pub async fn open(
    definition: PipelineDefinition,
    source: Arc<dyn EventSource>,
    store: Arc<dyn StorageAdapter>,
    engine: EngineConfig,
) -> IncrementalExecutor {
    let graph = build(definition, &engine);
    IncrementalExecutor::open(graph, source, store, engine)
        .await
        .unwrap()
}

/// Tick until no node commits anything, at most `limit` times
pub async fn drain(executor: &mut IncrementalExecutor, limit: usize) -> usize {
    for ticks in 1..=limit {
        if executor.tick().await.committed() == 0 {
            return ticks;
        }
    }
    limit
}

/// Every committed record of `node`
pub async fn read_table(store: &dyn StorageAdapter, node: &str) -> Vec<Record> {
    store
        .read_since(node, 0, u64::MAX, usize::MAX)
        .await
        .unwrap()
}

pub fn int(record: &Record, field: &str) -> i64 {
    record
        .value(field)
        .as_i64()
        .unwrap_or_else(|| panic!("{field} is not an integer in {record:?}"))
}
