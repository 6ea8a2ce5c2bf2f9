//! Replay device connector
//!
//! Serves device snapshots from JSON files instead of real terminals, one
//! file per device named `<ip>_<port>.json`:
//!
//! ```json
//! {
//!   "users": [{ "user_id": "1", "name": "Ann" }],
//!   "attendance": [
//!     { "user_id": "1", "timestamp": "2024-03-01 08:00:00", "punch": 1, "status": 0 }
//!   ]
//! }
//! ```
//!
//! The file is re-read on every call, so editing it while the daemon runs
//! behaves like punches arriving on the device. A missing file looks like
//! an unreachable device.

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use punch_core::key::TIMESTAMP_FORMAT;
use punch_core::traits::{DeviceConnection, DeviceConnector};
use punch_core::{AttendanceLog, Device, Error, Result, User};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    attendance: Vec<RawRecord>,
}

/// Attendance record as the device SDK reports it
#[derive(Debug, Deserialize)]
struct RawRecord {
    user_id: String,
    timestamp: String,
    #[serde(default)]
    punch: u8,
    #[serde(default)]
    status: u8,
}

impl RawRecord {
    fn into_log(self) -> anyhow::Result<AttendanceLog> {
        let ts = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT)
            .with_context(|| format!("bad timestamp '{}' for user {}", self.timestamp, self.user_id))?;
        Ok(AttendanceLog::from_raw(self.user_id, ts, self.punch, self.status))
    }
}

/// Connects to "devices" that are snapshot files in a directory
#[derive(Debug, Clone)]
pub struct ReplayConnector {
    dir: PathBuf,
}

impl ReplayConnector {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Snapshot file serving `device`
    pub fn snapshot_path(&self, device: &Device) -> PathBuf {
        self.dir.join(format!("{}_{}.json", device.ip, device.port))
    }
}

#[async_trait]
impl DeviceConnector for ReplayConnector {
    async fn connect(&self, device: &Device, _timeout: Duration) -> Result<Box<dyn DeviceConnection>> {
        let path = self.snapshot_path(device);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::network(format!(
                "{} unreachable: no snapshot at {}",
                device,
                path.display()
            )));
        }

        debug!("Replaying {} from {}", device, path.display());
        Ok(Box::new(ReplayConnection { path }))
    }
}

struct ReplayConnection {
    path: PathBuf,
}

impl ReplayConnection {
    async fn read(&self) -> Result<Snapshot> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::network(format!("{}: {}", self.path.display(), e)))?;

        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("invalid snapshot {}", self.path.display()))?;
        Ok(snapshot)
    }
}

#[async_trait]
impl DeviceConnection for ReplayConnection {
    async fn get_users(&mut self) -> Result<Vec<User>> {
        Ok(self.read().await?.users)
    }

    async fn get_attendance(&mut self) -> Result<Vec<AttendanceLog>> {
        let records = self.read().await?.attendance;
        let logs = records
            .into_iter()
            .map(RawRecord::into_log)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(logs)
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}
