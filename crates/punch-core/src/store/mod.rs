//! Processed-log store implementations
//!
//! This module provides the concrete implementations of the LogStore trait,
//! plus the read-only query used by search front-ends.

pub mod file;
pub mod memory;
pub mod query;

pub use file::{FileLogStore, FileLogStoreFactory};
pub use memory::{MemoryLogStore, MemoryLogStoreFactory};

use std::collections::HashSet;

use crate::key::LogKey;

/// In-memory bookkeeping shared by the store implementations
///
/// `processed` is what gets persisted. `claimed` holds keys a session has
/// taken for emission but not yet committed; they block other sessions
/// from emitting the same punch but never reach storage, so a crash before
/// commit re-delivers them instead of losing them.
#[derive(Debug, Default)]
pub(crate) struct KeySet {
    processed: HashSet<LogKey>,
    claimed: HashSet<LogKey>,
}

impl KeySet {
    pub(crate) fn from_processed(processed: HashSet<LogKey>) -> Self {
        Self {
            processed,
            claimed: HashSet::new(),
        }
    }

    pub(crate) fn contains(&self, key: &LogKey) -> bool {
        self.processed.contains(key) || self.claimed.contains(key)
    }

    pub(crate) fn claim(&mut self, key: &LogKey) -> bool {
        if self.contains(key) {
            return false;
        }
        self.claimed.insert(key.clone())
    }

    pub(crate) fn commit(&mut self, keys: HashSet<LogKey>) {
        for key in keys {
            self.claimed.remove(&key);
            self.processed.insert(key);
        }
    }

    pub(crate) fn processed(&self) -> &HashSet<LogKey> {
        &self.processed
    }
}
