//! Data model shared by every component
//!
//! - [`Device`]: a configured attendance terminal, identified by `(ip, port)`
//! - [`User`]: one entry of a device's user directory
//! - [`AttendanceLog`]: one punch as recorded by a device
//! - [`SessionState`] / [`DeviceStatus`]: what a session publishes about itself

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a device: the `(ip, port)` pair
///
/// Two configured devices with the same IP but different ports are
/// distinct devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A configured attendance terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Human-readable name
    pub name: String,
    /// Network address
    pub ip: String,
    /// TCP/UDP port of the device protocol
    pub port: u16,
}

impl Device {
    /// Create a new device descriptor
    pub fn new(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            port,
        }
    }

    /// Identity key used by the supervisor and the per-device stores
    pub fn id(&self) -> DeviceId {
        DeviceId {
            ip: self.ip.clone(),
            port: self.port,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.ip, self.port)
    }
}

/// One entry of a device's user directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
}

impl User {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
        }
    }
}

/// How the user identified themselves at the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunchMethod {
    Unknown,
    Finger,
    Card,
    Face,
    Password,
    Palm,
}

impl PunchMethod {
    /// Map a raw device verification code
    ///
    /// Codes `0`, `1` and `255` are all fingerprint on the terminals we
    /// talk to; anything unlisted is `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 | 1 | 255 => Self::Finger,
            2 => Self::Card,
            3 => Self::Face,
            4 => Self::Password,
            5 => Self::Palm,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PunchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Finger => "Finger",
            Self::Card => "Card",
            Self::Face => "Face",
            Self::Password => "Password",
            Self::Palm => "Palm",
        };
        f.write_str(name)
    }
}

/// Clock-in or clock-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Map a raw device status code
    ///
    /// Only `0` is documented (`In`). Every other code, including the
    /// break/overtime codes some firmwares emit, is reported as `Out`.
    pub fn from_status(status: u8) -> Self {
        if status == 0 { Self::In } else { Self::Out }
    }
}

/// A single punch as recorded by a device
///
/// Timestamps are the device's local wall-clock time; the engine never
/// converts or synchronizes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceLog {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub punch_method: PunchMethod,
    pub direction: Direction,
}

impl AttendanceLog {
    pub fn new(
        user_id: impl Into<String>,
        timestamp: NaiveDateTime,
        punch_method: PunchMethod,
        direction: Direction,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            timestamp,
            punch_method,
            direction,
        }
    }

    /// Build a log from the raw codes a device SDK reports
    pub fn from_raw(
        user_id: impl Into<String>,
        timestamp: NaiveDateTime,
        punch_code: u8,
        status_code: u8,
    ) -> Self {
        Self::new(
            user_id,
            timestamp,
            PunchMethod::from_code(punch_code),
            Direction::from_status(status_code),
        )
    }
}

/// Lifecycle state of one device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Snapshot of a session, published after every transition and poll
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Current state
    pub state: SessionState,
    /// Size of the last user directory snapshot
    pub users: usize,
    /// Size of the last attendance snapshot
    pub records: usize,
    /// Punches reported to the observer during this run
    pub emitted: u64,
    /// Unexpected (non-network) failures during this run
    pub failures: u64,
    /// Detail of the most recent failure of either kind
    pub last_error: Option<String>,
    /// When the last poll cycle completed
    pub last_poll: Option<DateTime<Utc>>,
}
