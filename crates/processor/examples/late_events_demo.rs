//! Demonstration of watermark-driven window emission and late events
//!
//! A single windowed node counts page views per country in five minute
//! windows with one minute of allowed lateness. Events are pushed one tick
//! at a time so the watermark and emitted windows can be followed.

use chrono::{Duration, TimeZone, Utc};
use medallion_config::{
    AggregationKind, EngineConfig, NodeDefinition, PipelineDefinition, WindowDefinition,
};
use medallion_processor::pipeline::{IncrementalExecutor, PipelineBuilder};
use medallion_processor::source::MemoryEventSource;
use medallion_processor::state::{MemoryStateBackend, StorageAdapter, TableStore};
use medallion_types::Record;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Late Event Demo ===\n");

    let definition = PipelineDefinition {
        name: "late_events".into(),
        nodes: vec![NodeDefinition::new("views_per_country", "identity")
            .with_window(
                WindowDefinition::new(300_000)
                    .with_lateness(60_000)
                    .with_group_by("country"),
            )
            .with_aggregation(AggregationKind::Count, "*", "views")],
    };

    let engine = EngineConfig::default();
    let graph = PipelineBuilder::new(definition)
        .with_engine_config(engine.clone())
        .build()?;

    let source = Arc::new(MemoryEventSource::new("views"));
    let store = Arc::new(TableStore::new(Arc::new(MemoryStateBackend::new())));
    let mut executor =
        IncrementalExecutor::open(graph, source.clone(), store.clone(), engine).await?;

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let arrivals = [
        ("US", 30),  // opens [00:00, 00:05)
        ("DE", 200), // same window
        ("US", 421), // watermark 00:06:01 closes [00:00, 00:05)
        ("FR", 299), // too late, its window was emitted
        ("US", 330), // on time for [00:05, 00:10)
    ];

    for (country, seconds) in arrivals {
        let event_time = start + Duration::seconds(seconds);
        source.push(Record::new(event_time).with_field("country", country));

        let report = executor.tick().await;
        let node = report
            .node("views_per_country")
            .expect("node is part of the graph");
        println!("   Event: {country} at {}", event_time.format("%H:%M:%S"));
        println!(
            "   -> outcome={:?} emitted={} late={} watermark={:?}\n",
            node.outcome, node.records_out, node.late_dropped, node.watermark
        );
    }

    println!("Emitted windows:");
    for row in store.read_since("views_per_country", 0, u64::MAX, usize::MAX).await? {
        println!("   {}", row.to_json());
    }

    println!("\nMetrics:\n{}", executor.metrics().encode()?);
    Ok(())
}
