//! End-to-end scenarios over the incremental executor

mod common;

use common::*;
use medallion_config::{
    AggregationKind, ExpectationPolicy, MedallionConfig, NodeDefinition, PipelineDefinition,
    WindowDefinition,
};
use medallion_processor::pipeline::{NodeOutcome, NodeState};
use medallion_processor::source::{MemoryEventSource, SyntheticEventSource};
use medallion_processor::state::{MemoryStateBackend, StorageAdapter, TableStore};
use medallion_types::{Record, Value};
use std::sync::Arc;

fn memory_store() -> Arc<TableStore> {
    Arc::new(TableStore::new(Arc::new(MemoryStateBackend::new())))
}

#[tokio::test]
async fn null_amounts_pass_silver_with_has_amount_zero() {
    let events: Vec<Record> = (0..100)
        .map(|i| {
            let amount = if i % 20 == 0 { Value::Null } else { Value::Float(25.5) };
            click_event(i, "purchase", amount)
        })
        .collect();
    let source = Arc::new(MemoryEventSource::with_records("clicks", events));
    let store = memory_store();

    let definition = PipelineDefinition {
        name: "silver".into(),
        nodes: vec![
            NodeDefinition::new("bronze_events", "bronze_events"),
            NodeDefinition::new("silver_events_cleaned", "silver_clean")
                .with_upstream("bronze_events")
                .with_expectation("valid_event_id", "event_id IS NOT NULL", ExpectationPolicy::Drop)
                .with_expectation("valid_user_id", "user_id > 0", ExpectationPolicy::Drop)
                .with_expectation(
                    "valid_timestamp",
                    "event_timestamp IS NOT NULL",
                    ExpectationPolicy::Fail,
                ),
        ],
    };
    let mut executor = open(definition, source, store.clone(), engine(1_000)).await;

    let report = executor.tick().await;
    assert_eq!(
        report.node("silver_events_cleaned").unwrap().outcome,
        NodeOutcome::Committed { batch_id: 1 }
    );

    let silver = read_table(store.as_ref(), "silver_events_cleaned").await;
    assert_eq!(silver.len(), 100);
    let without_amount: Vec<&Record> = silver
        .iter()
        .filter(|r| r.value("has_amount") == &Value::Int(0))
        .collect();
    assert_eq!(without_amount.len(), 5);
    assert!(without_amount
        .iter()
        .all(|r| r.value("total_value").is_null()));
}

#[tokio::test]
async fn late_record_dropped_after_window_emitted() {
    let source = Arc::new(MemoryEventSource::new("events"));
    let store = memory_store();
    let definition = PipelineDefinition {
        name: "late".into(),
        nodes: vec![NodeDefinition::new("gold", "identity")
            .with_window(WindowDefinition::new(300_000).with_lateness(60_000))
            .with_aggregation(AggregationKind::Count, "*", "n")],
    };
    let mut executor = open(definition, source.clone(), store.clone(), engine(100)).await;

    // 00:00:30 opens [00:00, 00:05)
    source.push(Record::new(at_ms(30_000)).with_field("id", 1i64));
    let report = executor.tick().await;
    assert_eq!(report.node("gold").unwrap().records_out, 0);

    // 00:07:01 moves the watermark to 00:06:01, closing [00:00, 00:05)
    source.push(Record::new(at_ms(421_000)).with_field("id", 2i64));
    let report = executor.tick().await;
    let gold = report.node("gold").unwrap();
    assert_eq!(gold.records_out, 1);
    assert_eq!(gold.watermark, Some(at_ms(361_000).timestamp_millis()));

    // 00:04:59 belongs to the emitted window
    source.push(Record::new(at_ms(299_000)).with_field("id", 3i64));
    let report = executor.tick().await;
    let gold = report.node("gold").unwrap();
    assert_eq!(gold.late_dropped, 1);
    assert_eq!(gold.records_out, 0);

    let output = read_table(store.as_ref(), "gold").await;
    assert_eq!(output.len(), 1);
    assert_eq!(output[0].value("window_start"), &Value::Timestamp(at_ms(0)));
    assert_eq!(output[0].value("window_end"), &Value::Timestamp(at_ms(300_000)));
    assert_eq!(output[0].value("n"), &Value::Int(1));
    assert_eq!(executor.node_status("gold").unwrap().late_dropped, 1);
}

#[tokio::test]
async fn gold_counts_match_silver_records_in_closed_windows() {
    let mut config = MedallionConfig::clickstream().unwrap();
    config.source = synthetic(1.0, 0);
    config.engine = engine(1_000);
    config.engine.truncate_consumed = false;

    let source = Arc::new(SyntheticEventSource::new(config.source.clone()));
    let store = memory_store();
    let mut executor = open(config.pipeline, source, store.clone(), config.engine).await;

    let report = executor.tick().await;
    assert_eq!(report.node("bronze_events").unwrap().records_out, 1_000);
    assert!(report.failed().is_empty());

    let watermark = report
        .node("gold_hourly_metrics")
        .unwrap()
        .watermark
        .expect("watermark after 1000 records");
    let window_ms = 300_000;
    let silver = read_table(store.as_ref(), "silver_events_enriched").await;
    let in_closed_windows = silver
        .iter()
        .filter(|r| {
            let ts = r.event_time_millis();
            ts.div_euclid(window_ms) * window_ms + window_ms <= watermark
        })
        .count() as i64;
    assert_eq!(in_closed_windows, 900);

    let hourly = read_table(store.as_ref(), "gold_hourly_metrics").await;
    let total: i64 = hourly.iter().map(|r| int(r, "event_count")).sum();
    assert_eq!(total, in_closed_windows);

    // Every aggregator saw the same upstream micro-batch
    for node in [
        "gold_country_performance",
        "gold_user_behavior",
        "gold_traffic_source_analysis",
        "gold_device_browser_metrics",
    ] {
        let rows = read_table(store.as_ref(), node).await;
        let total: i64 = rows.iter().map(|r| int(r, "total_events")).sum();
        assert_eq!(total, in_closed_windows, "{node}");
        let status = executor.node_status(node).unwrap();
        assert_eq!(status.input_offsets["silver_events_enriched"], 1_000);
    }
}

#[tokio::test]
async fn fatal_expectation_fails_only_its_branch() {
    let events: Vec<Record> = (0..100)
        .map(|i| Record::new(at_ms(i * 1000)).with_field("id", i))
        .collect();
    let source = Arc::new(MemoryEventSource::with_records("events", events));
    let store = memory_store();

    let definition = PipelineDefinition {
        name: "branches".into(),
        nodes: vec![
            NodeDefinition::new("bronze", "identity"),
            NodeDefinition::new("strict", "identity")
                .with_upstream("bronze")
                .with_expectation("not_fiftieth", "id <> 49", ExpectationPolicy::Fail),
            NodeDefinition::new("strict_gold", "identity").with_upstream("strict"),
            NodeDefinition::new("lenient", "identity").with_upstream("bronze"),
        ],
    };
    let mut executor = open(definition, source.clone(), store.clone(), engine(1_000)).await;

    let report = executor.tick().await;
    assert!(matches!(
        &report.node("strict").unwrap().outcome,
        NodeOutcome::Failed { error } if error.contains("not_fiftieth")
    ));
    assert!(matches!(
        report.node("strict_gold").unwrap().outcome,
        NodeOutcome::Skipped { .. }
    ));
    assert_eq!(report.node("lenient").unwrap().records_out, 100);

    assert!(read_table(store.as_ref(), "strict").await.is_empty());
    assert_eq!(store.load_checkpoint("strict").await.unwrap(), None);
    assert_eq!(executor.node_status("strict").unwrap().state, NodeState::Failed);

    // The healthy branch keeps consuming
    source.extend((100..110).map(|i| Record::new(at_ms(i * 1000)).with_field("id", i)));
    let report = executor.tick().await;
    assert_eq!(report.node("lenient").unwrap().records_out, 10);
    assert!(matches!(
        report.node("strict").unwrap().outcome,
        NodeOutcome::Failed { .. }
    ));
}
