//! Observer interface
//!
//! Sessions report everything they learn through an [`Observer`]:
//!
//! - state transitions ([`Observer::on_status_change`])
//! - user directory snapshots ([`Observer::on_users_refreshed`])
//! - new punches ([`Observer::on_new_punch`])
//!
//! Calls are made from the session's own task, in the order things happen
//! on that device. Implementations must return promptly; a consumer with
//! unbounded latency (a UI thread, a database) should sit behind a
//! [`ChannelObserver`] and drain its stream on its own schedule.
//!
//! ## Provided Observers
//!
//! - [`ChannelObserver`]: non-blocking, order-preserving queue
//! - [`TracingObserver`]: logs every event
//! - [`FanoutObserver`]: delivers to several observers in turn

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::model::{AttendanceLog, Device, SessionState, User};

/// Consumer of session events
///
/// Every method has an empty default so consumers implement only what
/// they care about.
pub trait Observer: Send + Sync {
    /// A session changed state
    ///
    /// `detail` carries the failure message for `Reconnecting` and `Error`.
    fn on_status_change(&self, device: &Device, state: SessionState, detail: Option<&str>) {
        let _ = (device, state, detail);
    }

    /// A fresh user directory snapshot was fetched (not a diff)
    fn on_users_refreshed(&self, device: &Device, users: &[User]) {
        let _ = (device, users);
    }

    /// A punch not seen before was found
    ///
    /// `resolved_name` is the user's name from the device directory, or
    /// `"Unknown"`.
    fn on_new_punch(&self, device: &Device, log: &AttendanceLog, resolved_name: &str) {
        let _ = (device, log, resolved_name);
    }
}

/// Observer events as values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    StatusChanged {
        device: Device,
        state: SessionState,
        detail: Option<String>,
    },
    UsersRefreshed {
        device: Device,
        users: Vec<User>,
    },
    NewPunch {
        device: Device,
        log: AttendanceLog,
        resolved_name: String,
    },
}

impl ObserverEvent {
    /// Device the event is about
    pub fn device(&self) -> &Device {
        match self {
            Self::StatusChanged { device, .. }
            | Self::UsersRefreshed { device, .. }
            | Self::NewPunch { device, .. } => device,
        }
    }
}

/// Queues events for a consumer running elsewhere
///
/// The queue is unbounded: a slow consumer costs memory, never a dropped
/// punch or a stalled poll loop. Sending never blocks.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ObserverEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its queue
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Create an observer whose queue is exposed as a stream
    pub fn with_stream() -> (Self, UnboundedReceiverStream<ObserverEvent>) {
        let (observer, rx) = Self::new();
        (observer, UnboundedReceiverStream::new(rx))
    }

    fn send(&self, event: ObserverEvent) {
        if self.tx.send(event).is_err() {
            debug!("Observer channel closed, dropping event");
        }
    }
}

impl Observer for ChannelObserver {
    fn on_status_change(&self, device: &Device, state: SessionState, detail: Option<&str>) {
        self.send(ObserverEvent::StatusChanged {
            device: device.clone(),
            state,
            detail: detail.map(str::to_string),
        });
    }

    fn on_users_refreshed(&self, device: &Device, users: &[User]) {
        self.send(ObserverEvent::UsersRefreshed {
            device: device.clone(),
            users: users.to_vec(),
        });
    }

    fn on_new_punch(&self, device: &Device, log: &AttendanceLog, resolved_name: &str) {
        self.send(ObserverEvent::NewPunch {
            device: device.clone(),
            log: log.clone(),
            resolved_name: resolved_name.to_string(),
        });
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_status_change(&self, device: &Device, state: SessionState, detail: Option<&str>) {
        match (state, detail) {
            (SessionState::Reconnecting | SessionState::Error, Some(detail)) => {
                warn!("{}: {} ({})", device, state, detail)
            }
            _ => info!("{}: {}", device, state),
        }
    }

    fn on_users_refreshed(&self, device: &Device, users: &[User]) {
        debug!("{}: {} users", device, users.len());
    }

    fn on_new_punch(&self, device: &Device, log: &AttendanceLog, resolved_name: &str) {
        info!(
            "New punch on {}: {} ({}) at {} via {} [{:?}]",
            device.name,
            log.user_id,
            resolved_name,
            log.timestamp,
            log.punch_method,
            log.direction
        );
    }
}

/// Delivers every event to each observer, in registration order
#[derive(Clone, Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn Observer>>,
}

impl FanoutObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl Observer for FanoutObserver {
    fn on_status_change(&self, device: &Device, state: SessionState, detail: Option<&str>) {
        for observer in &self.observers {
            observer.on_status_change(device, state, detail);
        }
    }

    fn on_users_refreshed(&self, device: &Device, users: &[User]) {
        for observer in &self.observers {
            observer.on_users_refreshed(device, users);
        }
    }

    fn on_new_punch(&self, device: &Device, log: &AttendanceLog, resolved_name: &str) {
        for observer in &self.observers {
            observer.on_new_punch(device, log, resolved_name);
        }
    }
}
