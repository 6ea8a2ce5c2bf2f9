//! Log key codec
//!
//! A [`LogKey`] identifies one punch occurrence independently of the device
//! that reported it. It is the user id and the punch time truncated to the
//! second, joined by [`KEY_SEPARATOR`]:
//!
//! ```text
//! 1042_2024-03-01 08:30:00
//! ```
//!
//! Two logs with the same user id and the same timestamp-to-the-second are
//! the same event, whatever else the device reports about them. Sub-second
//! repeats from a terminal collapse into one punch.
//!
//! Keys are persisted as plain strings, so the format is part of the store's
//! on-disk contract. Stores written with a different timestamp rendering are
//! not compatible without a migration.

use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::model::AttendanceLog;

/// Separator between user id and timestamp
pub const KEY_SEPARATOR: char = '_';

/// Canonical, zero-padded, second-precision timestamp format
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Deduplication identity of a punch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogKey(String);

impl LogKey {
    /// Encode a key from its parts
    ///
    /// Pure and deterministic; sub-second precision is dropped.
    pub fn encode(user_id: &str, timestamp: NaiveDateTime) -> Self {
        let ts = timestamp.trunc_subsecs(0).format(TIMESTAMP_FORMAT);
        Self(format!("{}{}{}", user_id, KEY_SEPARATOR, ts))
    }

    /// Key of an attendance log
    pub fn of(log: &AttendanceLog) -> Self {
        Self::encode(&log.user_id, log.timestamp)
    }

    /// Split the key back into `(user_id, timestamp)`
    ///
    /// The timestamp never contains the separator, so splitting on the
    /// last one is exact even when the user id contains it.
    pub fn decode(&self) -> Result<(String, NaiveDateTime)> {
        let (user_id, ts) = self
            .0
            .rsplit_once(KEY_SEPARATOR)
            .ok_or_else(|| Error::invalid_key(self.0.clone()))?;

        let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
            .map_err(|e| Error::invalid_key(format!("{}: {}", self.0, e)))?;

        Ok((user_id.to_string(), timestamp))
    }

    /// Whether this key is in canonical form
    pub fn is_canonical(&self) -> bool {
        match self.decode() {
            Ok((user_id, timestamp)) => Self::encode(&user_id, timestamp) == *self,
            Err(_) => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Wrap a string read from storage
///
/// No validation: legacy stores may hold keys in another format and those
/// are kept as opaque members of the set.
impl From<String> for LogKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
