//! Device session
//!
//! A DeviceSession owns one device's connection and poll loop:
//! - Connecting, and reconnecting after failures
//! - Polling the user directory and attendance snapshot
//! - Claiming unseen punches and reporting them to the observer
//! - Persisting the keys of reported punches
//!
//! ## State Machine
//!
//! ```text
//!                   start
//!   Disconnected ──────────▶ Connecting ◀────────────────────┐
//!        ▲                    │      │                        │
//!        │             ok     │      │ fails                  │ backoff
//!        │                    ▼      ▼                        │
//!        │              Connected   Reconnecting / Error ─────┘
//!        │               │  ▲  │          ▲
//!        │               └──┘  └──────────┘
//!        │              poll ok   poll fails
//!        │
//!        └──── stop (from any state; the connection is always closed)
//! ```
//!
//! Network failures lead to `Reconnecting` (warning). Anything else leads to
//! `Error` (error, counted) and is retried all the same: a session never
//! gives up on its own.
//!
//! ## Poll Cycle
//!
//! 1. Fetch users, replace the cached directory, report the snapshot
//! 2. Fetch the full attendance snapshot
//! 3. Claim the punches whose keys are not in the store
//! 4. Report each claimed punch, in device order
//! 5. Persist the batch's keys in one write
//! 6. Sleep for the poll interval
//!
//! Keys are persisted only after their punches are reported, so a crash
//! can re-deliver the last batch but never lose it.

pub mod dedup;

pub use dedup::claim_unseen;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{Device, DeviceStatus, SessionState};
use crate::observer::Observer;
use crate::traits::{DeviceConnection, DeviceConnector, LogStore};

/// Name reported for punches whose user is missing from the directory
pub const UNKNOWN_USER: &str = "Unknown";

/// How a poll cycle ended
enum Cycle {
    Completed,
    Stopped,
}

/// Why the poll loop on an open connection ended
enum PollExit {
    Stopped,
    Failed(Error),
}

/// Worker owning one device's connection lifecycle
///
/// Created by the supervisor, consumed by [`DeviceSession::run`]. The
/// session is the only writer of its [`DeviceStatus`]; everyone else reads
/// it through the `watch` receiver returned by [`DeviceSession::new`].
pub struct DeviceSession {
    device: Device,
    connector: Arc<dyn DeviceConnector>,
    store: Arc<dyn LogStore>,
    observer: Arc<dyn Observer>,
    config: EngineConfig,
    status: watch::Sender<DeviceStatus>,
    /// user_id -> name, from the last successful directory fetch
    directory: HashMap<String, String>,
    /// Failures since the last successful connect, for backoff
    consecutive_failures: u32,
}

impl DeviceSession {
    /// Create a session
    ///
    /// # Returns
    ///
    /// A tuple of (session, status_receiver) where status_receiver always
    /// holds the latest status snapshot
    pub fn new(
        device: Device,
        connector: Arc<dyn DeviceConnector>,
        store: Arc<dyn LogStore>,
        observer: Arc<dyn Observer>,
        config: EngineConfig,
    ) -> (Self, watch::Receiver<DeviceStatus>) {
        let (status, status_rx) = watch::channel(DeviceStatus::default());

        let session = Self {
            device,
            connector,
            store,
            observer,
            config,
            status,
            directory: HashMap::new(),
            consecutive_failures: 0,
        };

        (session, status_rx)
    }

    /// Run until a stop is requested
    ///
    /// Setting `stop` to `true`, or dropping its sender, ends the session
    /// at the next suspension point. The connection is closed on every exit
    /// path and the final state is `Disconnected`.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("Starting session for {}", self.device);

        loop {
            if stop_requested(&stop) {
                break;
            }

            self.transition(SessionState::Connecting, None);

            let timeout = self.config.connect_timeout();
            let attempt = tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                result = tokio::time::timeout(timeout, self.connector.connect(&self.device, timeout)) => result,
            };

            let failure = match attempt {
                Err(_) => Error::network(format!("connect timed out after {:?}", timeout)),
                Ok(Err(e)) => e,
                Ok(Ok(mut conn)) => {
                    self.consecutive_failures = 0;
                    self.transition(SessionState::Connected, None);
                    info!("Connected to {}", self.device);

                    let exit = self.poll_loop(conn.as_mut(), &mut stop).await;
                    self.close(conn.as_mut()).await;

                    match exit {
                        PollExit::Stopped => break,
                        PollExit::Failed(e) => e,
                    }
                }
            };

            self.record_failure(&failure);

            let delay = self.config.backoff_delay(self.consecutive_failures);
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            debug!("Retrying {} in {:?}", self.device, delay);

            if !pause(delay, &mut stop).await {
                break;
            }
        }

        self.transition(SessionState::Disconnected, None);
        info!("Session for {} stopped", self.device);
    }

    /// Poll an open connection until it fails or a stop is requested
    async fn poll_loop(
        &mut self,
        conn: &mut dyn DeviceConnection,
        stop: &mut watch::Receiver<bool>,
    ) -> PollExit {
        loop {
            match self.poll_cycle(conn, stop).await {
                Ok(Cycle::Completed) => {}
                Ok(Cycle::Stopped) => return PollExit::Stopped,
                Err(e) => return PollExit::Failed(e),
            }

            if !pause(self.config.poll_interval(), stop).await {
                return PollExit::Stopped;
            }
        }
    }

    /// One fetch-diff-report-persist round
    async fn poll_cycle(
        &mut self,
        conn: &mut dyn DeviceConnection,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Cycle> {
        let Some(users) = interruptible(stop, conn.get_users()).await else {
            return Ok(Cycle::Stopped);
        };
        let users = users?;
        self.directory = users
            .iter()
            .map(|u| (u.user_id.clone(), u.name.clone()))
            .collect();
        self.observer.on_users_refreshed(&self.device, &users);

        let Some(logs) = interruptible(stop, conn.get_attendance()).await else {
            return Ok(Cycle::Stopped);
        };
        let logs = logs?;
        let records = logs.len();

        let fresh = claim_unseen(logs, self.store.as_ref());
        let emitted = fresh.len();

        let mut pending = HashSet::with_capacity(emitted);
        for (key, log) in fresh {
            let name = self
                .directory
                .get(&log.user_id)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_USER);
            self.observer.on_new_punch(&self.device, &log, name);
            pending.insert(key);
        }

        if !pending.is_empty() {
            debug!("{}: {} new punch(es)", self.device, emitted);
            if let Err(e) = self.store.add_and_persist(pending).await {
                error!(
                    "Failed to persist processed logs for {}: {}. \
                    These punches may be re-delivered after a restart.",
                    self.device, e
                );
            }
        }

        let user_count = users.len();
        self.status.send_modify(|status| {
            status.users = user_count;
            status.records = records;
            status.emitted += emitted as u64;
            status.last_poll = Some(Utc::now());
        });

        Ok(Cycle::Completed)
    }

    /// Close a connection, bounded by the disconnect timeout
    async fn close(&self, conn: &mut dyn DeviceConnection) {
        match tokio::time::timeout(self.config.disconnect_timeout(), conn.disconnect()).await {
            Ok(Ok(())) => debug!("Disconnected from {}", self.device),
            Ok(Err(e)) => warn!("Error while disconnecting from {}: {}", self.device, e),
            Err(_) => warn!("Timed out disconnecting from {}", self.device),
        }
    }

    /// Classify a failure, update the status and notify the observer
    fn record_failure(&self, failure: &Error) {
        let detail = failure.to_string();

        if failure.is_network() {
            warn!("Connection to {} lost: {}", self.device, failure);
            self.status
                .send_modify(|status| status.last_error = Some(detail.clone()));
            self.transition(SessionState::Reconnecting, Some(&detail));
        } else {
            error!("Unexpected error on {}: {}", self.device, failure);
            self.status.send_modify(|status| {
                status.failures += 1;
                status.last_error = Some(detail.clone());
            });
            self.transition(SessionState::Error, Some(&detail));
        }
    }

    /// Move to `state`, notifying the observer only on an actual change
    fn transition(&self, state: SessionState, detail: Option<&str>) {
        let changed = self.status.send_if_modified(|status| {
            if status.state == state {
                false
            } else {
                status.state = state;
                true
            }
        });

        if changed {
            debug!("{} -> {}", self.device, state);
            self.observer.on_status_change(&self.device, state, detail);
        }
    }
}

/// Whether a stop has been requested (or the supervisor went away)
fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

/// Resolves once a stop is requested
async fn stopped(stop: &mut watch::Receiver<bool>) {
    // a dropped sender counts as a stop request
    let _ = stop.wait_for(|requested| *requested).await;
}

/// Sleep, returning `false` if a stop was requested first
async fn pause(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = stopped(stop) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Run an in-flight device call, abandoning it if a stop is requested
async fn interruptible<F: Future>(stop: &mut watch::Receiver<bool>, call: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = stopped(stop) => None,
        output = call => Some(output),
    }
}
