//! Error types for the punch engine
//!
//! This module defines all error types used throughout the crate.
//!
//! ## Classification
//!
//! The device session only distinguishes two kinds of SDK failure:
//!
//! - **Network** ([`Error::is_network`]): transient, expected, recovered by
//!   reconnecting after a backoff delay. Reported at warning level.
//! - **Everything else**: unexpected. Still retried, but reported at error
//!   level and counted in the device's failure counter.
//!
//! Persistence failures never leave the store/session boundary as fatal
//! errors: reads degrade to an empty set, writes are logged and skipped.

use thiserror::Error;

/// Result type alias for punch engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the punch engine
#[derive(Error, Debug)]
pub enum Error {
    /// Device unreachable, connection dropped, or call timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Raw socket I/O failure at the SDK boundary
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure reported by the device SDK
    #[error("Device error: {0}")]
    Device(String),

    /// Processed-log store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A string that is not a canonical log key
    #[error("Invalid log key: {0}")]
    InvalidKey(String),
}

impl Error {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a device (unexpected SDK) error
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Whether this failure is a transient network condition
    ///
    /// Socket-level I/O errors count as network failures: at the SDK
    /// boundary they mean the device went away mid-call.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Io(_))
    }
}

/// SDK adapters written with `anyhow` surface as unexpected device errors
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Device(format!("{:#}", err))
    }
}
