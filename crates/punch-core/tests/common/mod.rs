//! Test doubles and common utilities for engine contract tests
//!
//! - `ScriptedConnector`: devices whose snapshots and failures follow a script
//! - `RecordingObserver`: keeps every observer call for later assertions
//! - `CrashBeforePersist`: a store that never manages to write

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use punch_core::error::{Error, Result};
use punch_core::traits::{DeviceConnection, DeviceConnector, LogStore};
use punch_core::{
    AttendanceLog, Device, DeviceId, Direction, EngineConfig, LogKey, ObserverEvent, Observer,
    PunchMethod, SessionState, User,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a device does on one `get_attendance()` call
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this full history
    Snapshot(Vec<AttendanceLog>),
    /// Fail with a network error
    NetworkError,
    /// Fail with an unexpected device error
    DeviceError,
    /// Never answer
    Hang,
}

#[derive(Debug, Default)]
struct DeviceScript {
    users: Vec<User>,
    steps: VecDeque<Step>,
    /// Returned once the script is exhausted
    last_snapshot: Vec<AttendanceLog>,
    refuse_connects: usize,
    hang_connect: bool,
    disconnect_delay: Duration,
    connects: usize,
    disconnects: usize,
    /// Most connections open at once
    peak_open: usize,
    attendance_calls: usize,
}

/// Handle on one scripted device, shared with its connections
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    script: Arc<Mutex<DeviceScript>>,
}

impl ScriptedDevice {
    pub fn new(users: Vec<User>, steps: Vec<Step>) -> Self {
        let device = Self::default();
        {
            let mut script = device.script.lock().unwrap();
            script.users = users;
            script.steps = steps.into();
        }
        device
    }

    /// Device that always returns the same history
    pub fn steady(users: Vec<User>, history: Vec<AttendanceLog>) -> Self {
        Self::new(users, vec![Step::Snapshot(history)])
    }

    /// Refuse the next `n` connection attempts with a network error
    pub fn refusing(self, n: usize) -> Self {
        self.script.lock().unwrap().refuse_connects = n;
        self
    }

    /// Never complete a connection attempt
    pub fn hanging_on_connect(self) -> Self {
        self.script.lock().unwrap().hang_connect = true;
        self
    }

    /// Take `delay` to close each connection
    pub fn slow_to_disconnect(self, delay: Duration) -> Self {
        self.script.lock().unwrap().disconnect_delay = delay;
        self
    }

    /// Append steps to the script
    pub fn push(&self, steps: Vec<Step>) {
        self.script.lock().unwrap().steps.extend(steps);
    }

    pub fn connects(&self) -> usize {
        self.script.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.script.lock().unwrap().disconnects
    }

    pub fn open_connections(&self) -> usize {
        let script = self.script.lock().unwrap();
        script.connects - script.disconnects
    }

    pub fn peak_open_connections(&self) -> usize {
        self.script.lock().unwrap().peak_open
    }

    pub fn attendance_calls(&self) -> usize {
        self.script.lock().unwrap().attendance_calls
    }
}

/// A connector over a set of scripted devices
///
/// Devices not registered are unreachable.
#[derive(Default)]
pub struct ScriptedConnector {
    devices: HashMap<DeviceId, ScriptedDevice>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: &Device, script: ScriptedDevice) -> Self {
        self.devices.insert(device.id(), script);
        self
    }
}

#[async_trait]
impl DeviceConnector for ScriptedConnector {
    async fn connect(&self, device: &Device, _timeout: Duration) -> Result<Box<dyn DeviceConnection>> {
        let Some(scripted) = self.devices.get(&device.id()) else {
            return Err(Error::network(format!("no route to host {}", device.ip)));
        };

        let hang = {
            let mut script = scripted.script.lock().unwrap();
            if script.refuse_connects > 0 {
                script.refuse_connects -= 1;
                return Err(Error::network("connection refused"));
            }
            script.hang_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }

        {
            let mut script = scripted.script.lock().unwrap();
            script.connects += 1;
            script.peak_open = script.peak_open.max(script.connects - script.disconnects);
        }
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&scripted.script),
            closed: false,
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Mutex<DeviceScript>>,
    closed: bool,
}

#[async_trait]
impl DeviceConnection for ScriptedConnection {
    async fn get_users(&mut self) -> Result<Vec<User>> {
        Ok(self.script.lock().unwrap().users.clone())
    }

    async fn get_attendance(&mut self) -> Result<Vec<AttendanceLog>> {
        let step = {
            let mut script = self.script.lock().unwrap();
            script.attendance_calls += 1;
            match script.steps.pop_front() {
                Some(step) => step,
                None => Step::Snapshot(script.last_snapshot.clone()),
            }
        };

        match step {
            Step::Snapshot(history) => {
                self.script.lock().unwrap().last_snapshot = history.clone();
                Ok(history)
            }
            Step::NetworkError => Err(Error::network("connection reset by device")),
            Step::DeviceError => Err(Error::device("malformed attendance record")),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        assert!(!self.closed, "connection closed twice");
        self.closed = true;
        let delay = self.script.lock().unwrap().disconnect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

/// Keeps every observer call, in order
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// `(device name, user id, resolved name)` of every punch, in order
    pub fn punches(&self) -> Vec<(String, String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObserverEvent::NewPunch {
                    device,
                    log,
                    resolved_name,
                } => Some((device.name, log.user_id, resolved_name)),
                _ => None,
            })
            .collect()
    }

    pub fn punch_count(&self) -> usize {
        self.punches().len()
    }

    /// State transitions of one device, in order
    pub fn states(&self, device: &Device) -> Vec<SessionState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObserverEvent::StatusChanged { device: d, state, .. } if d.id() == device.id() => {
                    Some(state)
                }
                _ => None,
            })
            .collect()
    }

    /// Failure details reported with a given state
    pub fn details(&self, device: &Device, wanted: SessionState) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObserverEvent::StatusChanged {
                    device: d,
                    state,
                    detail,
                } if d.id() == device.id() && state == wanted => detail,
                _ => None,
            })
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn on_status_change(&self, device: &Device, state: SessionState, detail: Option<&str>) {
        self.events.lock().unwrap().push(ObserverEvent::StatusChanged {
            device: device.clone(),
            state,
            detail: detail.map(str::to_string),
        });
    }

    fn on_users_refreshed(&self, device: &Device, users: &[User]) {
        self.events.lock().unwrap().push(ObserverEvent::UsersRefreshed {
            device: device.clone(),
            users: users.to_vec(),
        });
    }

    fn on_new_punch(&self, device: &Device, log: &AttendanceLog, resolved_name: &str) {
        self.events.lock().unwrap().push(ObserverEvent::NewPunch {
            device: device.clone(),
            log: log.clone(),
            resolved_name: resolved_name.to_string(),
        });
    }
}

/// A store whose writes always fail, as if the process died before them
///
/// Claims and lookups go to the wrapped store; nothing is ever committed.
pub struct CrashBeforePersist<S> {
    pub inner: S,
}

#[async_trait]
impl<S: LogStore> LogStore for CrashBeforePersist<S> {
    fn contains(&self, key: &LogKey) -> bool {
        self.inner.contains(key)
    }

    fn claim(&self, key: &LogKey) -> bool {
        self.inner.claim(key)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn keys(&self) -> Vec<LogKey> {
        self.inner.keys()
    }

    async fn add_and_persist(&self, _keys: HashSet<LogKey>) -> Result<()> {
        Err(Error::persistence("simulated crash before write"))
    }
}

/// Short intervals so contract tests run in milliseconds
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 15,
        backoff_ms: 15,
        connect_timeout_ms: 1_000,
        disconnect_timeout_ms: 1_000,
        ..EngineConfig::default()
    }
}

pub fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

pub fn punch(user_id: &str, ts: NaiveDateTime) -> AttendanceLog {
    AttendanceLog::new(user_id, ts, PunchMethod::Finger, Direction::In)
}

pub fn staff() -> Vec<User> {
    vec![
        User::new("1", "Ann"),
        User::new("2", "Bob"),
        User::new("3", "Cyd"),
        User::new("4", "Dee"),
    ]
}

/// Poll `condition` until it holds or `within` elapses
pub async fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
