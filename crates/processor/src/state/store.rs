//! Materialized table storage
//!
//! [`TableStore`] lays node output tables and checkpoints out over any
//! [`StateBackend`]:
//!
//! - `table/{node}/{offset:020}` holds one output record, so a replayed
//!   append at the same offsets overwrites identically
//! - `checkpoint/{node}` holds the node's [`Checkpoint`]
//! - `meta/{key}` holds small engine-wide values such as the synthetic
//!   source's start time
//!
//! [`StorageAdapter::commit`] writes both in a single backend batch.

use async_trait::async_trait;
use medallion_types::Record;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::{StateBackend, WriteBatch};
use super::checkpoint::Checkpoint;
use crate::error::{StateError, StateResult};

const TABLE_PREFIX: &str = "table/";
const CHECKPOINT_PREFIX: &str = "checkpoint/";
const META_PREFIX: &str = "meta/";

/// Acknowledgement of a durable append or commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitToken {
    pub node: String,
    pub batch_id: u64,
    /// Offset of the first appended record
    pub first_offset: u64,
    /// Offset the next append will start at
    pub next_offset: u64,
}

impl CommitToken {
    pub fn records(&self) -> u64 {
        self.next_offset - self.first_offset
    }
}

/// Durable storage of node output tables and checkpoints
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Write `records` to `node`'s table starting at `start_offset`
    async fn append(
        &self,
        node: &str,
        start_offset: u64,
        records: &[Record],
    ) -> StateResult<CommitToken>;

    /// Read committed records of `node` with offsets in `offset..until`,
    /// at most `max_rows` of them
    async fn read_since(
        &self,
        node: &str,
        offset: u64,
        until: u64,
        max_rows: usize,
    ) -> StateResult<Vec<Record>>;

    async fn load_checkpoint(&self, node: &str) -> StateResult<Option<Checkpoint>>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> StateResult<()>;

    /// Append `records` at the previous checkpoint's output offset and store
    /// `checkpoint`, all or nothing
    async fn commit(&self, records: &[Record], checkpoint: &Checkpoint)
        -> StateResult<CommitToken>;

    /// Delete records of `node` below `before`
    async fn truncate(&self, node: &str, before: u64) -> StateResult<usize>;

    /// Names of every node holding a checkpoint
    async fn checkpointed_nodes(&self) -> StateResult<Vec<String>>;

    async fn load_metadata(&self, key: &str) -> StateResult<Option<Vec<u8>>>;

    /// Store an engine-wide value that must survive restarts
    async fn save_metadata(&self, key: &str, value: &[u8]) -> StateResult<()>;
}

/// [`StorageAdapter`] over a key-value [`StateBackend`]
pub struct TableStore {
    backend: Arc<dyn StateBackend>,
    flush_on_commit: bool,
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("backend", &self.backend.backend_type())
            .field("flush_on_commit", &self.flush_on_commit)
            .finish()
    }
}

impl TableStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            backend,
            flush_on_commit: false,
        }
    }

    /// Flush the backend after every commit
    pub fn with_flush_on_commit(mut self, flush: bool) -> Self {
        self.flush_on_commit = flush;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    fn table_prefix(node: &str) -> Vec<u8> {
        format!("{TABLE_PREFIX}{node}/").into_bytes()
    }

    fn record_key(node: &str, offset: u64) -> Vec<u8> {
        format!("{TABLE_PREFIX}{node}/{offset:020}").into_bytes()
    }

    fn checkpoint_key(node: &str) -> Vec<u8> {
        format!("{CHECKPOINT_PREFIX}{node}").into_bytes()
    }

    fn meta_key(key: &str) -> Vec<u8> {
        format!("{META_PREFIX}{key}").into_bytes()
    }

    fn parse_offset(node: &str, key: &[u8]) -> StateResult<u64> {
        let prefix_len = TABLE_PREFIX.len() + node.len() + 1;
        std::str::from_utf8(&key[prefix_len.min(key.len())..])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StateError::DeserializationFailed {
                key: String::from_utf8_lossy(key).into_owned(),
                reason: "malformed table key".to_string(),
            })
    }

    fn encode_records(
        batch: &mut WriteBatch,
        node: &str,
        start_offset: u64,
        records: &[Record],
    ) -> StateResult<()> {
        for (i, record) in records.iter().enumerate() {
            let offset = start_offset + i as u64;
            let key = Self::record_key(node, offset);
            let value =
                bincode::serialize(record).map_err(|e| StateError::SerializationFailed {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    reason: e.to_string(),
                })?;
            batch.put(key, value);
        }
        Ok(())
    }

    async fn flush_if_configured(&self) -> StateResult<()> {
        if self.flush_on_commit {
            self.backend.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for TableStore {
    async fn append(
        &self,
        node: &str,
        start_offset: u64,
        records: &[Record],
    ) -> StateResult<CommitToken> {
        let mut batch = WriteBatch::new();
        Self::encode_records(&mut batch, node, start_offset, records)?;
        self.backend.apply_batch(batch).await?;
        self.flush_if_configured().await?;

        trace!(node, start_offset, records = records.len(), "Appended records");
        Ok(CommitToken {
            node: node.to_string(),
            batch_id: 0,
            first_offset: start_offset,
            next_offset: start_offset + records.len() as u64,
        })
    }

    async fn read_since(
        &self,
        node: &str,
        offset: u64,
        until: u64,
        max_rows: usize,
    ) -> StateResult<Vec<Record>> {
        if offset >= until || max_rows == 0 {
            return Ok(Vec::new());
        }
        let limit = max_rows.min((until - offset) as usize);
        let entries = self
            .backend
            .scan(
                &Self::table_prefix(node),
                &Self::record_key(node, offset),
                limit,
            )
            .await?;

        let mut records = Vec::with_capacity(entries.len());
        for (expected, (key, value)) in (offset..until).zip(entries) {
            let found = Self::parse_offset(node, &key)?;
            if found != expected {
                return Err(StateError::StorageError {
                    backend_type: self.backend.backend_type().to_string(),
                    details: format!(
                        "table '{node}' has a gap: expected offset {expected}, found {found}"
                    ),
                });
            }
            let record: Record =
                bincode::deserialize(&value).map_err(|e| StateError::DeserializationFailed {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    reason: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn load_checkpoint(&self, node: &str) -> StateResult<Option<Checkpoint>> {
        match self.backend.get(&Self::checkpoint_key(node)).await? {
            Some(bytes) => Checkpoint::decode(node, &bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> StateResult<()> {
        self.backend
            .put(&Self::checkpoint_key(&checkpoint.node), &checkpoint.encode()?)
            .await?;
        self.flush_if_configured().await
    }

    async fn commit(
        &self,
        records: &[Record],
        checkpoint: &Checkpoint,
    ) -> StateResult<CommitToken> {
        checkpoint.validate()?;
        let node = checkpoint.node.as_str();
        let previous = self
            .load_checkpoint(node)
            .await?
            .unwrap_or_else(|| Checkpoint::initial(node));

        // Retrying a commit that already landed is a no-op
        let replayed = previous.batch_id == checkpoint.batch_id
            && previous.input_offsets == checkpoint.input_offsets
            && previous.output_offset == checkpoint.output_offset;
        if !replayed {
            previous.ensure_progress(checkpoint)?;
        }

        let first_offset = checkpoint
            .output_offset
            .checked_sub(records.len() as u64)
            .filter(|first| replayed || *first == previous.output_offset)
            .ok_or_else(|| StateError::OffsetRegression {
                node: node.to_string(),
                input: "$output".to_string(),
                committed: previous.output_offset,
                attempted: checkpoint.output_offset.saturating_sub(records.len() as u64),
            })?;

        let mut batch = WriteBatch::new();
        Self::encode_records(&mut batch, node, first_offset, records)?;
        batch.put(Self::checkpoint_key(node), checkpoint.encode()?);
        self.backend.apply_batch(batch).await?;
        self.flush_if_configured().await?;

        debug!(
            node,
            batch_id = checkpoint.batch_id,
            records = records.len(),
            output_offset = checkpoint.output_offset,
            "Committed micro-batch"
        );

        Ok(CommitToken {
            node: node.to_string(),
            batch_id: checkpoint.batch_id,
            first_offset,
            next_offset: checkpoint.output_offset,
        })
    }

    async fn truncate(&self, node: &str, before: u64) -> StateResult<usize> {
        let prefix = Self::table_prefix(node);
        let keys = self.backend.list_keys(&prefix).await?;

        let mut batch = WriteBatch::new();
        for key in keys {
            if Self::parse_offset(node, &key)? >= before {
                break;
            }
            batch.delete(key);
        }
        let removed = batch.len();
        if removed > 0 {
            self.backend.apply_batch(batch).await?;
            trace!(node, before, removed, "Truncated consumed records");
        }
        Ok(removed)
    }

    async fn checkpointed_nodes(&self) -> StateResult<Vec<String>> {
        let keys = self.backend.list_keys(CHECKPOINT_PREFIX.as_bytes()).await?;
        Ok(keys
            .into_iter()
            .map(|key| String::from_utf8_lossy(&key[CHECKPOINT_PREFIX.len()..]).into_owned())
            .collect())
    }

    async fn load_metadata(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        self.backend.get(&Self::meta_key(key)).await
    }

    async fn save_metadata(&self, key: &str, value: &[u8]) -> StateResult<()> {
        self.backend.put(&Self::meta_key(key), value).await?;
        self.flush_if_configured().await
    }
}
