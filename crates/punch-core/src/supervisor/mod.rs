//! Device supervisor
//!
//! The Supervisor owns the configured device list and at most one running
//! [`DeviceSession`] per device identity. It is the only place sessions are
//! started or stopped.
//!
//! ## Operations
//!
//! - [`Supervisor::start`] / [`Supervisor::start_all`]: spawn sessions;
//!   starting a running device is a no-op, starting one whose session is
//!   still stopping waits for that session to end
//! - [`Supervisor::stop`]: stop one session and wait until its connection
//!   is closed; stopping an idle device is a no-op
//! - [`Supervisor::status_of`] / [`Supervisor::statuses`]: read status
//!   snapshots published by the sessions
//! - [`Supervisor::shutdown`]: stop everything
//!
//! ## Store Binding
//!
//! With [`DedupScope::Global`](crate::config::DedupScope) every session
//! shares one store, which is what lets a punch reported by two devices be
//! delivered once. With per-device scope each device gets its own store,
//! opened on first start and reused across restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{DedupScope, EngineConfig};
use crate::error::{Error, Result};
use crate::model::{Device, DeviceId, DeviceStatus, SessionState};
use crate::observer::Observer;
use crate::session::DeviceSession;
use crate::traits::{DeviceConnector, LogStore, LogStoreFactory};

/// Where sessions get their processed-log store from
#[derive(Clone)]
pub enum StoreBinding {
    /// One store for every device (cross-device deduplication)
    Shared(Arc<dyn LogStore>),

    /// One store per device, built on first use
    PerDevice(Arc<dyn LogStoreFactory>),
}

impl StoreBinding {
    /// Dedup scope this binding implements
    pub fn scope(&self) -> DedupScope {
        match self {
            Self::Shared(_) => DedupScope::Global,
            Self::PerDevice(_) => DedupScope::PerDevice,
        }
    }
}

/// A session as seen by the supervisor
///
/// The handle stays in the session map until its task has been joined, so
/// a device never has two live sessions.
struct SessionHandle {
    /// Tells apart successive sessions of one device
    generation: u64,
    device: Device,
    stop: watch::Sender<bool>,
    status: watch::Receiver<DeviceStatus>,
    /// Taken by the caller that stops the session
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    fn is_stopping(&self) -> bool {
        self.task.is_none()
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// The session dropped its status sender, which it does on return
    fn is_gone(&self) -> bool {
        self.status.has_changed().is_err()
    }

    /// Request a stop and take the task for joining
    ///
    /// `None` if someone else is already stopping this session.
    fn begin_stop(&mut self) -> Option<JoinHandle<()>> {
        let _ = self.stop.send(true);
        self.task.take()
    }
}

/// A stop in progress, detached from the session map
struct Stopping {
    generation: u64,
    device: Device,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<DeviceStatus>,
}

/// Starts, stops and observes device sessions
pub struct Supervisor {
    connector: Arc<dyn DeviceConnector>,
    stores: StoreBinding,
    observer: Arc<dyn Observer>,
    config: EngineConfig,

    /// Configured devices, in configuration order
    devices: Mutex<Vec<Device>>,

    /// Running and stopping sessions by device identity
    sessions: Mutex<HashMap<DeviceId, SessionHandle>>,

    /// Stores opened through a per-device binding
    device_stores: Mutex<HashMap<DeviceId, Arc<dyn LogStore>>>,

    next_generation: AtomicU64,
}

impl Supervisor {
    /// Create a supervisor
    ///
    /// Nothing is started until [`Supervisor::start`] or
    /// [`Supervisor::start_all`] is called. Devices sharing an identity
    /// with an earlier entry are dropped.
    ///
    /// # Returns
    ///
    /// - `Ok(Supervisor)`
    /// - `Err(Error::Config)`: Invalid engine configuration, or a store
    ///   binding that does not match `config.dedup_scope`
    pub fn new(
        devices: Vec<Device>,
        connector: Arc<dyn DeviceConnector>,
        stores: StoreBinding,
        observer: Arc<dyn Observer>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        if stores.scope() != config.dedup_scope {
            return Err(Error::config(format!(
                "Dedup scope {:?} needs a {} store binding",
                config.dedup_scope,
                match config.dedup_scope {
                    DedupScope::Global => "shared",
                    DedupScope::PerDevice => "per-device",
                }
            )));
        }

        let mut unique: Vec<Device> = Vec::with_capacity(devices.len());
        for device in devices {
            if unique.iter().any(|d| d.id() == device.id()) {
                error!("Ignoring duplicate device {}", device);
                continue;
            }
            unique.push(device);
        }

        Ok(Self {
            connector,
            stores,
            observer,
            config,
            devices: Mutex::new(unique),
            sessions: Mutex::new(HashMap::new()),
            device_stores: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    /// Start a session for `device`
    ///
    /// Unknown devices are added to the device list first. If a previous
    /// session of the device is still stopping, this waits until it is gone.
    ///
    /// # Returns
    ///
    /// `true` if a session was spawned, `false` if one was already running
    pub async fn start(&self, device: &Device) -> bool {
        self.add_device(device.clone()).await;

        let id = device.id();
        let store = self.store_for(device).await;

        loop {
            let mut sessions = self.sessions.lock().await;

            if let Some(handle) = sessions.get(&id) {
                if handle.is_stopping() && !handle.is_gone() {
                    let mut previous = handle.status.clone();
                    drop(sessions);
                    debug!("Waiting for the previous session of {} to stop", device);
                    session_gone(&mut previous).await;
                    continue;
                }
                if handle.is_running() {
                    debug!("Session for {} already running", device);
                    return false;
                }
            }

            let (stop_tx, stop_rx) = watch::channel(false);
            let (session, status_rx) = DeviceSession::new(
                device.clone(),
                Arc::clone(&self.connector),
                store,
                Arc::clone(&self.observer),
                self.config.clone(),
            );

            let task = tokio::spawn(session.run(stop_rx));
            sessions.insert(
                id,
                SessionHandle {
                    generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                    device: device.clone(),
                    stop: stop_tx,
                    status: status_rx,
                    task: Some(task),
                },
            );

            info!("Started session for {}", device);
            return true;
        }
    }

    /// Start every configured device that is not running yet
    ///
    /// # Returns
    ///
    /// Number of sessions spawned
    pub async fn start_all(&self) -> usize {
        let devices = self.devices().await;
        let mut started = 0;
        for device in &devices {
            if self.start(device).await {
                started += 1;
            }
        }
        started
    }

    /// Stop the session for `device` and wait for it to finish
    ///
    /// When this returns, the device's connection is closed and no further
    /// observer calls will be made for it. A concurrent second `stop` waits
    /// as well but reports `false`.
    ///
    /// # Returns
    ///
    /// `true` if this call stopped a session, `false` if none was running
    pub async fn stop(&self, device: &Device) -> bool {
        let stopping = {
            let mut sessions = self.sessions.lock().await;
            sessions.get_mut(&device.id()).map(Self::begin_stop)
        };

        match stopping {
            Some(stopping) => self.finish(stopping).await,
            None => {
                debug!("No session running for {}", device);
                false
            }
        }
    }

    /// Stop every session
    pub async fn shutdown(&self) {
        let stopping: Vec<Stopping> = self
            .sessions
            .lock()
            .await
            .values_mut()
            .map(Self::begin_stop)
            .collect();

        info!("Stopping {} session(s)", stopping.len());
        for stopping in stopping {
            self.finish(stopping).await;
        }
    }

    /// Current state of a device's session
    ///
    /// Devices without a session are `Disconnected`.
    pub async fn status_of(&self, device: &Device) -> SessionState {
        self.status(device)
            .await
            .map(|status| status.state)
            .unwrap_or_default()
    }

    /// Full status snapshot of a device's session, if it has one
    pub async fn status(&self, device: &Device) -> Option<DeviceStatus> {
        self.sessions
            .lock()
            .await
            .get(&device.id())
            .map(|handle| handle.status.borrow().clone())
    }

    /// Status of every configured device, in configuration order
    pub async fn statuses(&self) -> Vec<(Device, DeviceStatus)> {
        let devices = self.devices().await;
        let sessions = self.sessions.lock().await;

        devices
            .into_iter()
            .map(|device| {
                let status = sessions
                    .get(&device.id())
                    .map(|handle| handle.status.borrow().clone())
                    .unwrap_or_default();
                (device, status)
            })
            .collect()
    }

    /// Whether a session is running for `device` and not being stopped
    pub async fn is_running(&self, device: &Device) -> bool {
        self.sessions
            .lock()
            .await
            .get(&device.id())
            .is_some_and(SessionHandle::is_running)
    }

    /// Configured devices
    pub async fn devices(&self) -> Vec<Device> {
        self.devices.lock().await.clone()
    }

    /// Add a device to the configured list
    ///
    /// # Returns
    ///
    /// `false` if a device with the same identity is already configured
    pub async fn add_device(&self, device: Device) -> bool {
        let mut devices = self.devices.lock().await;
        if devices.iter().any(|d| d.id() == device.id()) {
            return false;
        }
        debug!("Adding device {}", device);
        devices.push(device);
        true
    }

    /// Stop a device's session and forget the device
    ///
    /// # Returns
    ///
    /// `true` if the device was configured
    pub async fn remove_device(&self, device: &Device) -> bool {
        self.stop(device).await;

        let id = device.id();
        self.device_stores.lock().await.remove(&id);

        let mut devices = self.devices.lock().await;
        let before = devices.len();
        devices.retain(|d| d.id() != id);
        before != devices.len()
    }

    /// Store for `device`, opening a per-device store on first use
    ///
    /// The factory runs without holding any supervisor lock.
    async fn store_for(&self, device: &Device) -> Arc<dyn LogStore> {
        let factory = match &self.stores {
            StoreBinding::Shared(store) => return Arc::clone(store),
            StoreBinding::PerDevice(factory) => factory,
        };

        let id = device.id();
        if let Some(store) = self.device_stores.lock().await.get(&id) {
            return Arc::clone(store);
        }

        let opened = factory.open(device).await;
        let mut stores = self.device_stores.lock().await;
        // a concurrent start may have opened it first
        Arc::clone(stores.entry(id).or_insert(opened))
    }

    fn begin_stop(handle: &mut SessionHandle) -> Stopping {
        Stopping {
            generation: handle.generation,
            device: handle.device.clone(),
            task: handle.begin_stop(),
            status: handle.status.clone(),
        }
    }

    /// Wait for a stopping session to end, then drop its handle
    ///
    /// Returns `true` if this caller joined the task.
    async fn finish(&self, mut stopping: Stopping) -> bool {
        let Some(task) = stopping.task.take() else {
            session_gone(&mut stopping.status).await;
            return false;
        };

        if let Err(e) = task.await {
            error!("Session for {} ended abnormally: {}", stopping.device, e);
        } else {
            info!("Stopped session for {}", stopping.device);
        }

        let mut sessions = self.sessions.lock().await;
        let id = stopping.device.id();
        if sessions
            .get(&id)
            .is_some_and(|handle| handle.generation == stopping.generation)
        {
            sessions.remove(&id);
        }
        true
    }
}

/// Resolves once the session behind `status` has returned
async fn session_gone(status: &mut watch::Receiver<DeviceStatus>) {
    while status.changed().await.is_ok() {}
}
