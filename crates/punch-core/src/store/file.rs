// # File Log Store
//
// File-based implementation of LogStore with crash recovery.
//
// ## Purpose
//
// Remembers which punches have been reported across restarts, so a full
// attendance snapshot from a device is not re-delivered after the daemon
// comes back up.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of the previous state
// - Recovery: Falls back to backup, then to an empty set
//
// A store that cannot be read is never a startup failure: at worst every
// punch still on the devices is delivered once more.
//
// ## File Format
//
// ```json
// ["1042_2024-03-01 08:30:00", "7_2024-03-01 08:31:12"]
// ```

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::KeySet;
use crate::Error;
use crate::key::LogKey;
use crate::model::Device;
use crate::traits::log_store::{LogStore, LogStoreFactory};

/// File-based processed-log store
///
/// Lookups are served from an in-memory set. Every `add_and_persist`
/// rewrites the whole file while holding a write lock, so concurrent
/// sessions sharing the store cannot interleave load-modify-write cycles.
///
/// # Example
///
/// ```rust,no_run
/// use punch_core::store::FileLogStore;
/// use punch_core::traits::LogStore;
/// use punch_core::LogKey;
/// use std::collections::HashSet;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileLogStore::open("/var/lib/punchd/processed_logs.json").await;
///
///     let key = LogKey::encode("1042", "2024-03-01T08:30:00".parse()?);
///     store.add_and_persist(HashSet::from([key.clone()])).await?;
///
///     assert!(store.contains(&key));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileLogStore {
    path: PathBuf,
    keys: RwLock<KeySet>,
    write_lock: Mutex<()>,
}

impl FileLogStore {
    /// Open a store, loading whatever is on disk
    ///
    /// Never fails; see [`FileLogStore::load`].
    pub async fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let keys = Self::load(&path).await;

        Self {
            path,
            keys: RwLock::new(KeySet::from_processed(keys)),
            write_lock: Mutex::new(()),
        }
    }

    /// Read the set of processed keys from a file
    ///
    /// Recovery strategy:
    /// 1. Missing file: empty set
    /// 2. Unreadable or corrupt file: try the backup
    /// 3. Backup missing or corrupt too: empty set
    pub async fn load(path: &Path) -> HashSet<LogKey> {
        let keys = match Self::read_keys(path).await {
            Ok(Some(keys)) => keys,
            Ok(None) => {
                tracing::debug!("Log store does not exist yet: {}", path.display());
                return HashSet::new();
            }
            Err(e) => {
                tracing::warn!("Log store unreadable: {}. Attempting recovery from backup.", e);
                let backup_path = Self::backup_path(path);
                match Self::read_keys(&backup_path).await {
                    Ok(Some(keys)) => {
                        tracing::info!("Recovered log store from backup: {} keys", keys.len());
                        keys
                    }
                    Ok(None) => {
                        tracing::warn!("No backup found. Treating every punch as unprocessed.");
                        return HashSet::new();
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Treating every punch as unprocessed.",
                            backup_err
                        );
                        return HashSet::new();
                    }
                }
            }
        };

        let legacy = keys.iter().filter(|k| !k.is_canonical()).count();
        if legacy > 0 {
            tracing::warn!(
                "{} of {} stored keys are not in canonical form and will never match a new punch",
                legacy,
                keys.len()
            );
        }

        tracing::debug!("Loaded {} processed keys from {}", keys.len(), path.display());
        keys
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_keys(path: &Path) -> Result<Option<HashSet<LogKey>>, Error> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::persistence(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let raw: Vec<String> = serde_json::from_str(&content).map_err(|e| {
            Error::persistence(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        Ok(Some(raw.into_iter().map(LogKey::from).collect()))
    }

    /// Write the full set atomically
    async fn write_keys(&self, sorted: &[String]) -> Result<(), Error> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let json = serde_json::to_vec(sorted)?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(&json).await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::persistence(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::persistence(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Log store written: {} ({} keys)", self.path.display(), sorted.len());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }

    fn backup_path(path: &Path) -> PathBuf {
        with_suffix(path, ".backup")
    }
}

/// `processed_logs.json` + `.backup` = `processed_logs.json.backup`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[async_trait]
impl LogStore for FileLogStore {
    fn contains(&self, key: &LogKey) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn claim(&self, key: &LogKey) -> bool {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .claim(key)
    }

    fn len(&self) -> usize {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .processed()
            .len()
    }

    fn keys(&self) -> Vec<LogKey> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .processed()
            .iter()
            .cloned()
            .collect()
    }

    async fn add_and_persist(&self, keys: HashSet<LogKey>) -> Result<(), Error> {
        let _writer = self.write_lock.lock().await;

        let sorted = {
            let mut set = self.keys.write().unwrap_or_else(PoisonError::into_inner);
            set.commit(keys);
            let mut all: Vec<String> = set.processed().iter().map(LogKey::to_string).collect();
            all.sort_unstable();
            all
        };

        self.write_keys(&sorted).await
    }
}

/// Opens one file per device next to a base path
///
/// `/var/lib/punchd/processed_logs.json` becomes
/// `/var/lib/punchd/processed_logs.10.0.0.5_4370.json` for device
/// `10.0.0.5:4370`.
#[derive(Debug, Clone)]
pub struct FileLogStoreFactory {
    dir: PathBuf,
    stem: String,
}

impl FileLogStoreFactory {
    /// Derive per-device file names from a shared store path
    pub fn beside<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        let dir = base.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "processed_logs".to_string());

        Self { dir, stem }
    }

    /// File backing a given device's store
    pub fn path_for(&self, device: &Device) -> PathBuf {
        self.dir
            .join(format!("{}.{}_{}.json", self.stem, device.ip, device.port))
    }
}

#[async_trait]
impl LogStoreFactory for FileLogStoreFactory {
    async fn open(&self, device: &Device) -> Arc<dyn LogStore> {
        Arc::new(FileLogStore::open(self.path_for(device)).await)
    }
}
