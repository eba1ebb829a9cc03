//! Storage backends behind the selection-set cache.

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;

use super::cache::{CacheEntry, CacheKey, EntryMeta};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cache store lock poisoned")]
    Poisoned,
}

/// Keyed storage of cached panels.
///
/// Stores only move bytes. Expiry and key derivation belong to
/// `SelectionCache`.
pub trait PanelStore: Send + Sync {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    fn save(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Metadata of every stored entry, ordered by key.
    fn entries(&self) -> Result<Vec<EntryMeta>, CacheError>;
}

/// Process-local store used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryPanelStore {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
}

impl MemoryPanelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PanelStore for MemoryPanelStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let map = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(map.get(key.as_str()).cloned())
    }

    fn save(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut map = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        map.insert(entry.meta.key.as_str().to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut map = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        Ok(map.remove(key.as_str()).is_some())
    }

    fn entries(&self) -> Result<Vec<EntryMeta>, CacheError> {
        let map = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(map.values().map(|e| e.meta.clone()).collect())
    }
}
