//! State backend trait definition
//!
//! A backend is an ordered byte key-value store. Besides single-key
//! operations it must apply a [`WriteBatch`] atomically: either every write
//! of the batch is visible afterwards or none is. The table store relies on
//! this to commit a node's output together with its checkpoint.

use async_trait::async_trait;

use crate::error::StateResult;

/// A single write of a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Writes applied as one atomic unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Core trait for state backend implementations
///
/// Implementations must be safe to share between the concurrently running
/// node workers of one tick.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Name used in error messages and logs
    fn backend_type(&self) -> &'static str;

    /// Retrieve a value for the given key
    async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>>;

    /// Store a value, overwriting any previous value
    async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()>;

    /// Delete a key; deleting a missing key is not an error
    async fn delete(&self, key: &[u8]) -> StateResult<()>;

    /// Keys starting with `prefix`, in ascending byte order
    async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>>;

    /// Entries whose key starts with `prefix` and is `>= from`, in ascending
    /// key order, at most `limit` of them
    async fn scan(
        &self,
        prefix: &[u8],
        from: &[u8],
        limit: usize,
    ) -> StateResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply every write of `batch` atomically
    async fn apply_batch(&self, batch: WriteBatch) -> StateResult<()>;

    /// Persist pending writes; a no-op for volatile backends
    async fn flush(&self) -> StateResult<()> {
        Ok(())
    }

    /// Clear all state from the backend
    async fn clear(&self) -> StateResult<()> {
        let mut batch = WriteBatch::new();
        for key in self.list_keys(b"").await? {
            batch.delete(key);
        }
        self.apply_batch(batch).await
    }

    /// Get the number of keys in the backend
    async fn count(&self) -> StateResult<usize> {
        Ok(self.list_keys(b"").await?.len())
    }

    /// Check if a key exists
    async fn contains(&self, key: &[u8]) -> StateResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn test_key(id: u32) -> Vec<u8> {
        format!("test:{}", id).into_bytes()
    }

    // Generic tests that any StateBackend implementation should pass
    pub async fn test_backend_basic_ops<B: StateBackend>(backend: B) {
        backend.put(&test_key(1), b"value1").await.unwrap();
        let value = backend.get(&test_key(1)).await.unwrap();
        assert_eq!(value, Some(b"value1".to_vec()));

        let value = backend.get(&test_key(999)).await.unwrap();
        assert_eq!(value, None);

        backend.put(&test_key(1), b"new_value").await.unwrap();
        let value = backend.get(&test_key(1)).await.unwrap();
        assert_eq!(value, Some(b"new_value".to_vec()));

        backend.delete(&test_key(1)).await.unwrap();
        assert_eq!(backend.get(&test_key(1)).await.unwrap(), None);

        // Deleting a missing key is fine
        backend.delete(&test_key(999)).await.unwrap();
    }

    pub async fn test_backend_list_keys<B: StateBackend>(backend: B) {
        backend.clear().await.unwrap();

        backend.put(b"table/b/2", b"w2").await.unwrap();
        backend.put(b"table/b/1", b"w1").await.unwrap();
        backend.put(b"table/bb/1", b"x").await.unwrap();
        backend.put(b"checkpoint/b", b"c").await.unwrap();

        let keys = backend.list_keys(b"table/b/").await.unwrap();
        assert_eq!(keys, vec![b"table/b/1".to_vec(), b"table/b/2".to_vec()]);

        assert_eq!(backend.list_keys(b"").await.unwrap().len(), 4);
    }

    pub async fn test_backend_scan<B: StateBackend>(backend: B) {
        backend.clear().await.unwrap();
        for i in 0..10u32 {
            backend
                .put(format!("seg/{:04}", i).as_bytes(), &i.to_le_bytes())
                .await
                .unwrap();
        }
        backend.put(b"seh/0000", b"other").await.unwrap();

        let entries = backend.scan(b"seg/", b"seg/0004", 3).await.unwrap();
        let keys: Vec<Vec<u8>> = entries.into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                b"seg/0004".to_vec(),
                b"seg/0005".to_vec(),
                b"seg/0006".to_vec()
            ]
        );

        let tail = backend.scan(b"seg/", b"seg/0008", 100).await.unwrap();
        assert_eq!(tail.len(), 2);
    }

    pub async fn test_backend_batch<B: StateBackend>(backend: B) {
        backend.clear().await.unwrap();
        backend.put(b"old", b"1").await.unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"old".to_vec());
        backend.apply_batch(batch).await.unwrap();

        assert_eq!(backend.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.get(b"b").await.unwrap(), Some(b"2".to_vec()));
        assert!(!backend.contains(b"old").await.unwrap());
        assert_eq!(backend.count().await.unwrap(), 2);
    }

    pub async fn test_backend_clear<B: StateBackend>(backend: B) {
        backend.put(b"key1", b"val1").await.unwrap();
        backend.put(b"key2", b"val2").await.unwrap();

        assert_eq!(backend.count().await.unwrap(), 2);
        backend.clear().await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 0);
    }
}
