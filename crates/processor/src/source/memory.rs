//! In-memory event source

use super::{EventSource, SourceBatch};
use crate::error::{SourceError, SourceResult};

use async_trait::async_trait;
use medallion_types::Record;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Event source over an in-memory log
///
/// Useful for tests and for replaying captured events. Records can be
/// appended while the pipeline runs, and transient failures can be injected
/// to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryEventSource {
    name: String,
    log: RwLock<Vec<Record>>,
    failures: AtomicU32,
    delay: RwLock<Option<Duration>>,
}

impl MemoryEventSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_records(name: impl Into<String>, records: Vec<Record>) -> Self {
        let source = Self::new(name);
        source.extend(records);
        source
    }

    pub fn push(&self, record: Record) {
        self.log.write().push(record);
    }

    pub fn extend(&self, records: impl IntoIterator<Item = Record>) {
        self.log.write().extend(records);
    }

    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }

    /// Make the next `count` pulls fail with `Unavailable`
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Delay every pull, to exercise timeouts
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pull(&self, since: u64, max_rows: usize) -> SourceResult<SourceBatch> {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SourceError::Unavailable {
                source_name: self.name.clone(),
                reason: "injected failure".to_string(),
            });
        }

        let log = self.log.read();
        let len = log.len() as u64;
        if since > len {
            return Err(SourceError::InvalidOffset {
                source_name: self.name.clone(),
                offset: since,
                reason: format!("log holds only {} records", len),
            });
        }

        let end = len.min(since.saturating_add(max_rows as u64));
        Ok(SourceBatch {
            records: log[since as usize..end as usize].to_vec(),
            next_offset: end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn records(n: i64) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(Utc::now()).with_field("i", i))
            .collect()
    }

    #[tokio::test]
    async fn test_pull_bounded_by_max_rows() {
        let source = MemoryEventSource::with_records("mem", records(10));

        let batch = source.pull(0, 4).await.unwrap();
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.next_offset, 4);

        let batch = source.pull(8, 4).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.next_offset, 10);

        let batch = source.pull(10, 4).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.next_offset, 10);
    }

    #[tokio::test]
    async fn test_offset_past_end() {
        let source = MemoryEventSource::with_records("mem", records(3));
        let err = source.pull(5, 1).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidOffset { .. }));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let source = MemoryEventSource::with_records("mem", records(3));
        source.fail_next(2);

        assert!(source.pull(0, 3).await.unwrap_err().is_transient());
        assert!(source.pull(0, 3).await.is_err());
        assert_eq!(source.pull(0, 3).await.unwrap().len(), 3);
    }
}
