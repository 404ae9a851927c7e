//! Event sources feeding the root nodes of a pipeline
//!
//! A source is an append-only, replayable log addressed by offset. Pulling
//! from the same offset always yields the same records, which is what lets
//! the executor recover by replaying from its last committed checkpoint.

mod memory;
mod synthetic;

pub use memory::MemoryEventSource;
pub use synthetic::{SyntheticEventSource, START_TIME_KEY};

use crate::error::SourceResult;
use async_trait::async_trait;
use medallion_types::Record;

/// Records pulled from a source, and the offset to resume from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub records: Vec<Record>,
    /// Offset after the last returned record
    pub next_offset: u64,
}

impl SourceBatch {
    pub fn empty(offset: u64) -> Self {
        Self {
            records: Vec::new(),
            next_offset: offset,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Replayable source of raw events
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Return at most `max_rows` records starting at offset `since`.
    ///
    /// Offsets are dense and increase by one per record. Records that are
    /// not available yet are simply not returned; the batch is then shorter
    /// than `max_rows` or empty.
    async fn pull(&self, since: u64, max_rows: usize) -> SourceResult<SourceBatch>;
}
