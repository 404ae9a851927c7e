//! In-memory state backend implementation

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

use super::backend::{StateBackend, WriteBatch, WriteOp};
use crate::error::{StateError, StateResult};

/// Volatile backend over an ordered map
///
/// State is lost when the process exits. Write failures can be injected to
/// exercise the executor's retry path.
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    failing_writes: AtomicU32,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` batch writes fail with a transient storage error
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Approximate memory held by keys and values
    pub async fn memory_usage(&self) -> usize {
        self.data
            .read()
            .await
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn injected_failure(&self) -> StateResult<()> {
        let fail = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StateError::StorageError {
                backend_type: self.backend_type().to_string(),
                details: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()> {
        self.injected_failure()?;
        self.data.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StateResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>> {
        Ok(self
            .data
            .read()
            .await
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn scan(
        &self,
        prefix: &[u8],
        from: &[u8],
        limit: usize,
    ) -> StateResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = if from > prefix { from } else { prefix };
        Ok(self
            .data
            .read()
            .await
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn apply_batch(&self, batch: WriteBatch) -> StateResult<()> {
        self.injected_failure()?;
        let ops = batch.into_ops();
        trace!(ops = ops.len(), "Applying batch to memory backend");

        // One write guard for the whole batch makes it atomic for readers
        let mut data = self.data.write().await;
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    data.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn count(&self) -> StateResult<usize> {
        Ok(self.data.read().await.len())
    }
}
