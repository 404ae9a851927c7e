//! Restart and replay behaviour against persistent checkpoints

mod common;

use common::*;
use medallion_config::{
    NodeDefinition, PipelineDefinition, SourceConfig, StorageBackendKind, StorageConfig,
};
use medallion_processor::pipeline::NodeOutcome;
use medallion_processor::source::{MemoryEventSource, SyntheticEventSource};
use medallion_processor::state::{self, MemoryStateBackend, StorageAdapter, TableStore};
use medallion_types::Record;
use std::sync::Arc;

/// Gold output of `counting_pipeline` over 100 events in a single tick
async fn reference_gold() -> Vec<Record> {
    let source = Arc::new(MemoryEventSource::with_records("events", keyed_events(0..100)));
    let store = Arc::new(TableStore::new(Arc::new(MemoryStateBackend::new())));
    let mut executor = open(counting_pipeline(), source, store.clone(), engine(1_000)).await;
    executor.tick().await;
    read_table(store.as_ref(), "gold").await
}

#[tokio::test]
async fn chunked_restarts_match_single_batch() {
    let expected = reference_gold().await;
    // Windows up to the 90s boundary are closed by the 99s watermark
    assert_eq!(expected.len(), 27);

    let source = Arc::new(MemoryEventSource::with_records("events", keyed_events(0..100)));
    let store = Arc::new(TableStore::new(Arc::new(MemoryStateBackend::new())));

    let mut executor = open(counting_pipeline(), source.clone(), store.clone(), engine(7)).await;
    for _ in 0..4 {
        executor.tick().await;
    }
    let before_restart = executor.node_status("gold").unwrap();
    assert!(before_restart.open_windows.unwrap_or(0) > 0);
    drop(executor);

    // A fresh executor resumes from the stored checkpoints and window state
    let mut executor = open(counting_pipeline(), source, store.clone(), engine(7)).await;
    let resumed = executor.node_status("gold").unwrap();
    assert_eq!(resumed.batch_id, before_restart.batch_id);
    assert_eq!(resumed.open_windows, before_restart.open_windows);
    drain(&mut executor, 50).await;

    assert_eq!(read_table(store.as_ref(), "gold").await, expected);
    assert_eq!(expected.iter().map(|r| int(r, "n")).sum::<i64>(), 90);
    for row in &expected {
        assert_eq!(int(row, "distinct_v"), int(row, "n"));
    }
}

#[tokio::test]
async fn failed_commit_replays_without_duplicates() {
    let expected = reference_gold().await;

    let backend = Arc::new(MemoryStateBackend::new());
    let store = Arc::new(TableStore::new(backend.clone()));
    let source = Arc::new(MemoryEventSource::with_records("events", keyed_events(0..100)));
    let mut executor = open(counting_pipeline(), source, store.clone(), engine(1_000)).await;

    // Bronze exhausts its retries, so nothing downstream runs this tick
    backend.fail_next_writes(3);
    let report = executor.tick().await;
    assert!(matches!(
        report.node("bronze").unwrap().outcome,
        NodeOutcome::IoFailure { .. }
    ));
    assert!(matches!(
        report.node("gold").unwrap().outcome,
        NodeOutcome::Skipped { .. }
    ));
    assert!(read_table(store.as_ref(), "bronze").await.is_empty());

    drain(&mut executor, 10).await;
    assert_eq!(read_table(store.as_ref(), "gold").await, expected);
    assert_eq!(executor.node_status("bronze").unwrap().io_failures, 1);
}

#[tokio::test]
async fn sled_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        backend: StorageBackendKind::Sled,
        path: dir.path().join("state"),
        ..StorageConfig::default()
    };
    let source = Arc::new(MemoryEventSource::with_records("events", keyed_events(0..40)));

    {
        let store: Arc<dyn StorageAdapter> = Arc::new(state::open_store(&config).await.unwrap());
        let mut executor = open(counting_pipeline(), source.clone(), store.clone(), engine(1_000)).await;
        let report = executor.tick().await;
        assert_eq!(report.node("gold").unwrap().records_out, 9);
    }

    source.extend(keyed_events(40..60));
    let store: Arc<dyn StorageAdapter> = Arc::new(state::open_store(&config).await.unwrap());
    let checkpoint = store.load_checkpoint("gold").await.unwrap().unwrap();
    assert_eq!(checkpoint.batch_id, 1);
    assert!(checkpoint.window_state.is_some());

    let mut executor = open(counting_pipeline(), source, store.clone(), engine(1_000)).await;
    let report = executor.tick().await;
    let gold = report.node("gold").unwrap();
    assert_eq!(gold.records_in, 20);
    assert_eq!(gold.records_out, 6);

    let rows = read_table(store.as_ref(), "gold").await;
    assert_eq!(rows.len(), 15);
    // The window open across the restart kept its earlier rows
    let thirty = rows
        .iter()
        .filter(|r| r.event_time_millis() == at_ms(30_000).timestamp_millis())
        .map(|r| int(r, "n"))
        .sum::<i64>();
    assert_eq!(thirty, 10);
}

#[tokio::test]
async fn synthetic_start_time_is_stable_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        backend: StorageBackendKind::Sled,
        path: dir.path().join("state"),
        ..StorageConfig::default()
    };
    let unset = SourceConfig {
        start_time: None,
        ..synthetic(10.0, 2_000)
    };
    let bronze_only = || PipelineDefinition {
        name: "bronze".into(),
        nodes: vec![NodeDefinition::new("bronze", "identity")],
    };

    let first_start = {
        let store: Arc<dyn StorageAdapter> = Arc::new(state::open_store(&config).await.unwrap());
        let source = Arc::new(SyntheticEventSource::open(unset.clone(), store.as_ref()).await.unwrap());
        let mut executor = open(bronze_only(), source.clone(), store, engine(50)).await;
        assert_eq!(executor.tick().await.node("bronze").unwrap().records_out, 50);
        source.start_time()
    };

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let store: Arc<dyn StorageAdapter> = Arc::new(state::open_store(&config).await.unwrap());
    let source = Arc::new(SyntheticEventSource::open(unset, store.as_ref()).await.unwrap());
    assert_eq!(source.start_time(), first_start);

    let mut executor = open(bronze_only(), source.clone(), store.clone(), engine(50)).await;
    assert_eq!(executor.tick().await.node("bronze").unwrap().records_out, 50);

    // Rows written before and after the restart come from one timeline
    let rows = read_table(store.as_ref(), "bronze").await;
    assert_eq!(rows.len(), 100);
    for (offset, row) in rows.iter().enumerate() {
        assert_eq!(row, &source.generate(offset as u64), "offset {offset}");
    }
}
