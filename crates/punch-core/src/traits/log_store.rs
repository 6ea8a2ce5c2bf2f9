// # Log Store Trait
//
// Defines the interface for the durable set of processed log keys.
//
// ## Purpose
//
// The store is what makes a full-snapshot SDK look like a change stream:
// a punch is new exactly when its key is not in the store. Every key is
// persisted after the punch has been reported, so a crash between
// reporting and persisting re-delivers a batch but never drops one.
//
// ## Sharing
//
// With global deduplication one store is shared by every session. Two
// sessions may see the same punch in the same instant, so taking a key
// for emission is an atomic `claim`, not a `contains` check followed by
// a later write. Claims live in memory only; `add_and_persist` turns
// them into processed keys and serializes concurrent writers.
//
// ## Implementations
//
// - File-based: JSON array of key strings (`FileLogStore`)
// - In-memory: no durability (`MemoryLogStore`)

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::key::LogKey;
use crate::model::Device;

/// Trait for processed-log store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple sessions.
/// `add_and_persist` calls must not interleave: the persisted file must
/// always be the full union of every batch added so far.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Whether a key has been processed or is claimed by a session
    fn contains(&self, key: &LogKey) -> bool;

    /// Atomically take a key for emission
    ///
    /// Returns `false` when the key is already processed or claimed. A
    /// claimed key is not persisted until it is passed to
    /// [`LogStore::add_and_persist`].
    fn claim(&self, key: &LogKey) -> bool;

    /// Number of processed (committed) keys
    fn len(&self) -> usize;

    /// Whether no key has been processed yet
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every processed (committed) key, in no particular order
    fn keys(&self) -> Vec<LogKey>;

    /// Union `keys` into the processed set and persist the full set
    ///
    /// Keys claimed earlier are committed. The in-memory union happens
    /// even when persisting fails, so a running session does not
    /// re-deliver; only a restart before the next successful write can.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Set persisted
    /// - `Err(Error::Persistence)`: Storage write failed
    async fn add_and_persist(&self, keys: HashSet<LogKey>) -> Result<(), crate::Error>;
}

/// Builds one store per device when deduplication is scoped per device
#[async_trait]
pub trait LogStoreFactory: Send + Sync {
    /// Open the store for a device
    ///
    /// Must not fail: missing or corrupt storage yields an empty store.
    async fn open(&self, device: &Device) -> Arc<dyn LogStore>;
}
