//! State and table storage
//!
//! Byte-oriented [`StateBackend`]s (in-memory and Sled) sit under the
//! [`TableStore`], which implements the [`StorageAdapter`] the executor
//! talks to: node output tables, per-node [`Checkpoint`]s and the atomic
//! commit that advances both together.

pub mod backend;
pub mod checkpoint;
pub mod memory;
pub mod sled_backend;
pub mod store;

pub use backend::{StateBackend, WriteBatch, WriteOp};
pub use checkpoint::{Checkpoint, SOURCE_INPUT};
pub use memory::MemoryStateBackend;
pub use sled_backend::{SledConfig, SledStateBackend};
pub use store::{CommitToken, StorageAdapter, TableStore};

use crate::error::StateResult;
use medallion_config::{StorageBackendKind, StorageConfig};
use std::sync::Arc;

/// Open the backend selected by `config`
pub async fn open_backend(config: &StorageConfig) -> StateResult<Arc<dyn StateBackend>> {
    Ok(match config.backend {
        StorageBackendKind::Memory => Arc::new(MemoryStateBackend::new()),
        StorageBackendKind::Sled => {
            let sled_config = SledConfig::new(&config.path)
                .with_cache_capacity(config.cache_capacity_bytes);
            Arc::new(SledStateBackend::open(sled_config).await?)
        }
    })
}

/// Open a [`TableStore`] over the backend selected by `config`
pub async fn open_store(config: &StorageConfig) -> StateResult<TableStore> {
    let backend = open_backend(config).await?;
    Ok(TableStore::new(backend).with_flush_on_commit(config.flush_on_commit))
}
