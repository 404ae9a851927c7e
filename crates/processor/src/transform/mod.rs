//! Row transforms applied by table nodes
//!
//! A transform is a pure function of its input record. Replaying a
//! micro-batch from a checkpoint must rebuild byte-identical output, so
//! transforms never read clocks, random sources or shared mutable state.

mod clickstream;

pub use clickstream::{BronzeEvents, SilverClean, SilverEnrich, BRONZE_FIELDS};

use crate::error::TransformError;
use medallion_types::Record;
use std::collections::HashMap;
use std::sync::Arc;

/// A record-to-record transformation
pub trait Transform: Send + Sync {
    /// Name the transform is registered under
    fn name(&self) -> &str;

    /// Transform one record. A record missing a required field fails with
    /// `TransformError::SchemaMismatch`.
    fn apply(&self, record: Record) -> Result<Record, TransformError>;
}

/// Pass-through transform
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, record: Record) -> Result<Record, TransformError> {
        Ok(record)
    }
}

/// Transforms addressable by name from a pipeline definition
#[derive(Clone)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Registry with the identity and clickstream transforms
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Identity));
        registry.register(Arc::new(BronzeEvents));
        registry.register(Arc::new(SilverClean));
        registry.register(Arc::new(SilverEnrich));
        registry
    }

    /// Register a transform, replacing any previous one with the same name
    pub fn register(&mut self, transform: Arc<dyn Transform>) {
        self.transforms.insert(transform.name().to_string(), transform);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_builtin_registry() {
        let registry = TransformRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["bronze_events", "identity", "silver_clean", "silver_enrich"]
        );
        assert!(registry.get("silver_clean").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_identity_passes_record() {
        let record = Record::new(Utc::now()).with_field("a", 1i64);
        assert_eq!(Identity.apply(record.clone()).unwrap(), record);
    }
}
