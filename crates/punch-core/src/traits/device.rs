// # Device SDK Boundary
//
// Defines the interface the engine consumes from a terminal SDK.
//
// ## Model
//
// The SDK is a request/response client that returns full snapshots:
// every `get_attendance()` call yields the device's entire punch history,
// there is no "since" cursor and no push notification. Deduplication is
// therefore entirely the engine's job.
//
// ## Error Mapping
//
// Implementations must map unreachable hosts, timeouts and dropped
// sockets to `Error::Network` (or `Error::Io`). Everything else is treated
// as unexpected and counted as a failure.
//
// ## Blocking SDKs
//
// Vendor SDKs are typically blocking. Wrap each call in
// `tokio::task::spawn_blocking` so one slow terminal never stalls the
// runtime threads other sessions run on.

use async_trait::async_trait;
use std::time::Duration;

use crate::model::{AttendanceLog, Device, User};

/// Opens connections to devices
///
/// One connector is shared by every session, so it must be thread-safe.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Connect to a device
    ///
    /// # Parameters
    ///
    /// - `device`: The device to connect to
    /// - `timeout`: Upper bound for the connection handshake
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn DeviceConnection>)`: An open connection
    /// - `Err(Error::Network)`: Device unreachable
    /// - `Err(Error)`: Any other failure
    async fn connect(
        &self,
        device: &Device,
        timeout: Duration,
    ) -> Result<Box<dyn DeviceConnection>, crate::Error>;
}

/// A live connection to one device
///
/// Owned exclusively by one session; never shared.
#[async_trait]
pub trait DeviceConnection: Send {
    /// Fetch the full user directory
    async fn get_users(&mut self) -> Result<Vec<User>, crate::Error>;

    /// Fetch the full attendance history, in device order
    async fn get_attendance(&mut self) -> Result<Vec<AttendanceLog>, crate::Error>;

    /// Close the connection
    ///
    /// Called exactly once by the session on every exit path. Errors are
    /// logged and otherwise ignored.
    async fn disconnect(&mut self) -> Result<(), crate::Error>;
}
