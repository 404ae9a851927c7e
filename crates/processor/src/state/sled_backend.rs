//! Sled-based persistent state backend

use async_trait::async_trait;
use sled::Db;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace};

use super::backend::{StateBackend, WriteBatch, WriteOp};
use crate::error::{StateError, StateResult};

/// Configuration for the Sled backend
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Database directory
    pub path: PathBuf,
    /// Page cache size in bytes
    pub cache_capacity: u64,
    /// Temporary databases are removed when dropped
    pub temporary: bool,
}

impl SledConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache_capacity: 64 * 1024 * 1024,
            temporary: false,
        }
    }

    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

fn storage_error(action: &str, err: sled::Error) -> StateError {
    StateError::StorageError {
        backend_type: "sled".to_string(),
        details: format!("{} failed: {}", action, err),
    }
}

/// Sled-based persistent state backend
///
/// State survives process restarts. Batches go through
/// [`sled::Db::apply_batch`], which is atomic with respect to crashes.
///
/// ## Example
///
/// ```rust,no_run
/// use medallion_processor::state::{SledConfig, SledStateBackend, StateBackend};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = SledConfig::new("./data/medallion").with_cache_capacity(256 * 1024 * 1024);
///     let backend = SledStateBackend::open(config).await?;
///
///     backend.put(b"checkpoint/silver", b"...").await?;
///     backend.flush().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct SledStateBackend {
    db: Db,
    config: SledConfig,
}

impl SledStateBackend {
    /// Open (or create) a Sled database
    pub async fn open(config: SledConfig) -> StateResult<Self> {
        info!(path = ?config.path, "Opening Sled database");

        if let Some(parent) = config.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::StorageError {
                    backend_type: "sled".to_string(),
                    details: format!("Failed to create directory: {}", e),
                })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .temporary(config.temporary)
            .open()
            .map_err(|e| storage_error("Open", e))?;

        info!(path = ?config.path, keys = db.len(), "Sled database opened");

        Ok(Self { db, config })
    }

    /// Create a temporary Sled backend for testing
    pub async fn temporary() -> StateResult<Self> {
        let path = std::env::temp_dir().join(format!("medallion_sled_{}", uuid::Uuid::new_v4()));
        let mut config = SledConfig::new(path);
        config.temporary = true;
        Self::open(config).await
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Approximate on-disk size in bytes
    pub fn size_on_disk(&self) -> StateResult<u64> {
        self.db.size_on_disk().map_err(|e| storage_error("Size query", e))
    }

    fn collect(
        iter: impl Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>,
    ) -> StateResult<Vec<(Vec<u8>, Vec<u8>)>> {
        iter.map(|entry| {
            entry
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(|e| storage_error("Scan", e))
        })
        .collect()
    }
}

#[async_trait]
impl StateBackend for SledStateBackend {
    fn backend_type(&self) -> &'static str {
        "sled"
    }

    async fn get(&self, key: &[u8]) -> StateResult<Option<Vec<u8>>> {
        trace!(key = ?String::from_utf8_lossy(key), "Getting key from Sled");
        Ok(self
            .db
            .get(key)
            .map_err(|e| storage_error("Get", e))?
            .map(|v| v.to_vec()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> StateResult<()> {
        self.db
            .insert(key, value)
            .map_err(|e| storage_error("Put", e))?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StateResult<()> {
        self.db.remove(key).map_err(|e| storage_error("Delete", e))?;
        Ok(())
    }

    async fn list_keys(&self, prefix: &[u8]) -> StateResult<Vec<Vec<u8>>> {
        self.db
            .scan_prefix(prefix)
            .keys()
            .map(|key| {
                key.map(|k| k.to_vec())
                    .map_err(|e| storage_error("Prefix scan", e))
            })
            .collect()
    }

    async fn scan(
        &self,
        prefix: &[u8],
        from: &[u8],
        limit: usize,
    ) -> StateResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = if from > prefix { from } else { prefix };
        Self::collect(
            self.db
                .range(start..)
                .take_while(|entry| match entry {
                    Ok((k, _)) => k.starts_with(prefix),
                    Err(_) => true,
                })
                .take(limit),
        )
    }

    async fn apply_batch(&self, batch: WriteBatch) -> StateResult<()> {
        let mut sled_batch = sled::Batch::default();
        let ops = batch.into_ops();
        let len = ops.len();
        for op in ops {
            match op {
                WriteOp::Put { key, value } => sled_batch.insert(key, value),
                WriteOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.db
            .apply_batch(sled_batch)
            .map_err(|e| storage_error("Batch", e))?;
        trace!(ops = len, "Applied batch to Sled");
        Ok(())
    }

    async fn flush(&self) -> StateResult<()> {
        let flushed = self
            .db
            .flush_async()
            .await
            .map_err(|e| storage_error("Flush", e))?;
        debug!(bytes = flushed, "Flushed Sled database");
        Ok(())
    }

    async fn clear(&self) -> StateResult<()> {
        debug!("Clearing Sled database");
        self.db.clear().map_err(|e| storage_error("Clear", e))?;
        self.flush().await
    }

    async fn count(&self) -> StateResult<usize> {
        Ok(self.db.len())
    }

    async fn contains(&self, key: &[u8]) -> StateResult<bool> {
        self.db
            .contains_key(key)
            .map_err(|e| storage_error("Contains", e))
    }
}

impl Drop for SledStateBackend {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush Sled database on drop: {}", e);
        }
    }
}
