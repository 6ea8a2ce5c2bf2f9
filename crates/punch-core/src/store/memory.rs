// # Memory Log Store
//
// In-memory implementation of LogStore.
//
// ## Crash Behavior
//
// - Everything is lost on restart
// - The first poll after a restart re-delivers the device's whole history
//
// ## When to Use
//
// - Testing environments
// - Consumers that deduplicate downstream anyway

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use super::KeySet;
use crate::Error;
use crate::key::LogKey;
use crate::model::Device;
use crate::traits::log_store::{LogStore, LogStoreFactory};

/// In-memory processed-log store
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    inner: Arc<RwLock<KeySet>>,
}

impl MemoryLogStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with keys
    pub fn with_keys(keys: impl IntoIterator<Item = LogKey>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(KeySet::from_processed(keys.into_iter().collect()))),
        }
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    fn contains(&self, key: &LogKey) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn claim(&self, key: &LogKey) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .claim(key)
    }

    fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .processed()
            .len()
    }

    fn keys(&self) -> Vec<LogKey> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .processed()
            .iter()
            .cloned()
            .collect()
    }

    async fn add_and_persist(&self, keys: HashSet<LogKey>) -> Result<(), Error> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .commit(keys);
        Ok(())
    }
}

/// Gives every device its own fresh in-memory store
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryLogStoreFactory;

#[async_trait]
impl LogStoreFactory for MemoryLogStoreFactory {
    async fn open(&self, _device: &Device) -> Arc<dyn LogStore> {
        Arc::new(MemoryLogStore::new())
    }
}
