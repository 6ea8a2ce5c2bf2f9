//! Configuration types for the punch engine
//!
//! This module defines the engine tuning knobs and the device list format.
//! Loading configuration files is the embedding application's job, except
//! for [`load_devices`], whose missing-file behavior is part of the engine's
//! contract.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::model::Device;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pause between two poll cycles on a connected device (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before reconnecting after a failure (ms)
    ///
    /// With exponential backoff this is the first delay.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// How the reconnect delay grows with consecutive failures
    #[serde(default)]
    pub backoff: BackoffStrategy,

    /// Upper bound for the connect handshake (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound for closing a connection (ms)
    ///
    /// A device that never acknowledges the disconnect must not keep its
    /// session from stopping.
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,

    /// Whether the same punch on two devices is reported once or twice
    #[serde(default)]
    pub dedup_scope: DedupScope,
}

impl EngineConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            backoff_ms: default_backoff_ms(),
            backoff: BackoffStrategy::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            dedup_scope: DedupScope::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_ms == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.backoff_ms == 0 {
            return Err(crate::Error::config("Backoff delay must be > 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(crate::Error::config("Connect timeout must be > 0"));
        }
        if self.disconnect_timeout_ms == 0 {
            return Err(crate::Error::config("Disconnect timeout must be > 0"));
        }
        if let BackoffStrategy::Exponential { max_ms } = self.backoff
            && max_ms < self.backoff_ms
        {
            return Err(crate::Error::config(format!(
                "Exponential backoff cap ({}ms) is below the base delay ({}ms)",
                max_ms, self.backoff_ms
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Delay before the next connect attempt
    ///
    /// `attempt` counts consecutive failures, starting at 0.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffStrategy::Constant => Duration::from_millis(self.backoff_ms),
            BackoffStrategy::Exponential { max_ms } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let delay = self.backoff_ms.saturating_mul(factor).min(max_ms);
                Duration::from_millis(delay)
            }
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconnect delay policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay after every failure
    #[default]
    Constant,

    /// Delay doubles per consecutive failure, capped
    Exponential {
        /// Longest delay (ms)
        max_ms: u64,
    },
}

/// Scope of punch deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// One store shared by every device: a punch reported by two devices
    /// is delivered once
    #[default]
    Global,

    /// One store per device: each device delivers its own copy
    PerDevice,
}

/// Device descriptor as found in the devices file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl From<DeviceConfig> for Device {
    fn from(config: DeviceConfig) -> Self {
        Device::new(config.name, config.ip, config.port)
    }
}

/// Load the device list from a JSON array of descriptors
///
/// A missing or unparsable file yields an empty list (logged), never an
/// error: a misconfigured host should come up idle, not crash-loop.
pub async fn load_devices<P: AsRef<Path>>(path: P) -> Vec<Device> {
    let path = path.as_ref();

    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Devices file {} not found, no devices configured", path.display());
            return Vec::new();
        }
        Err(e) => {
            tracing::error!("Failed to read devices file {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<DeviceConfig>>(&content) {
        Ok(devices) => devices.into_iter().map(Device::from).collect(),
        Err(e) => {
            tracing::error!("Failed to parse devices file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_backoff_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_disconnect_timeout_ms() -> u64 {
    5_000
}

fn default_port() -> u16 {
    4370
}
