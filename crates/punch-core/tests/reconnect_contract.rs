//! Architectural Contract Test: Reconnection
//!
//! This test verifies that sessions survive any failure the device or the
//! network throws at them.
//!
//! Constraints verified:
//! - Network failures lead to Reconnecting, then a fresh connection
//! - Unexpected failures lead to Error, are counted, and are retried too
//! - Every opened connection is closed, whatever ended it
//! - A failing device never disturbs its neighbours
//!
//! If this test fails, someone has made a failure fatal to a session or
//! leaked a connection on an error path.

mod common;

use common::*;
use punch_core::{Device, MemoryLogStore, SessionState, StoreBinding, Supervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use SessionState::*;

const WAIT: Duration = Duration::from_secs(5);

fn device() -> Device {
    Device::new("Warehouse", "10.1.0.5", 4370)
}

fn supervisor_for(devices: &[(Device, ScriptedDevice)], observer: Arc<RecordingObserver>) -> Supervisor {
    let connector = devices
        .iter()
        .fold(ScriptedConnector::new(), |connector, (device, script)| {
            connector.with_device(device, script.clone())
        });

    Supervisor::new(
        devices.iter().map(|(d, _)| d.clone()).collect(),
        Arc::new(connector),
        StoreBinding::Shared(Arc::new(MemoryLogStore::new())),
        observer,
        fast_config(),
    )
    .expect("valid config")
}

#[tokio::test]
async fn network_failure_reconnects_and_resumes() {
    let device = device();
    let before = vec![punch("1", at(8, 0, 0))];
    let after = vec![punch("1", at(8, 0, 0)), punch("2", at(8, 5, 0))];
    let script = ScriptedDevice::new(
        staff(),
        vec![Step::Snapshot(before), Step::NetworkError, Step::Snapshot(after)],
    );
    let observer = RecordingObserver::new();
    let supervisor = supervisor_for(&[(device.clone(), script.clone())], observer.clone());

    supervisor.start_all().await;
    assert!(eventually(WAIT, || observer.punch_count() == 2).await);

    assert_eq!(
        observer.states(&device),
        vec![Connecting, Connected, Reconnecting, Connecting, Connected]
    );
    assert_eq!(observer.details(&device, Reconnecting).len(), 1);

    let status = supervisor.status(&device).await.expect("session running");
    assert_eq!(status.failures, 0);
    assert!(status.last_error.is_some());

    assert_ok!(tokio::time::timeout(WAIT, supervisor.shutdown()).await);
    assert_eq!(script.connects(), 2);
    assert_eq!(script.open_connections(), 0);
}

#[tokio::test]
async fn unexpected_failure_is_counted_and_retried() {
    let device = device();
    let script = ScriptedDevice::new(
        staff(),
        vec![Step::DeviceError, Step::Snapshot(vec![punch("3", at(9, 0, 0))])],
    );
    let observer = RecordingObserver::new();
    let supervisor = supervisor_for(&[(device.clone(), script.clone())], observer.clone());

    supervisor.start_all().await;
    assert!(eventually(WAIT, || observer.punch_count() == 1).await);
    // counters are published at the end of a cycle
    assert!(eventually(WAIT, || script.attendance_calls() >= 3).await);

    assert_eq!(
        observer.states(&device),
        vec![Connecting, Connected, Error, Connecting, Connected]
    );
    let details = observer.details(&device, Error);
    assert_eq!(details.len(), 1);
    assert!(details[0].contains("malformed attendance record"));

    let status = supervisor.status(&device).await.expect("session running");
    assert_eq!(status.failures, 1);
    assert_eq!(status.emitted, 1);

    supervisor.shutdown().await;
    assert_eq!(script.open_connections(), 0);
}

#[tokio::test]
async fn refused_connections_are_retried_until_the_device_answers() {
    let device = device();
    let script = ScriptedDevice::steady(staff(), vec![punch("1", at(7, 0, 0))]).refusing(3);
    let observer = RecordingObserver::new();
    let supervisor = supervisor_for(&[(device.clone(), script.clone())], observer.clone());

    supervisor.start_all().await;
    assert!(eventually(WAIT, || observer.punch_count() == 1).await);
    supervisor.shutdown().await;

    let states = observer.states(&device);
    assert_eq!(states.iter().filter(|s| **s == Reconnecting).count(), 3);
    assert_eq!(states.iter().filter(|s| **s == Connected).count(), 1);
    assert_eq!(states.last(), Some(&Disconnected));
    assert_eq!(script.connects(), 1);
}

#[tokio::test]
async fn repeated_failures_never_leak_connections() {
    let device = device();
    let script = ScriptedDevice::new(staff(), vec![Step::NetworkError; 200]);
    let observer = RecordingObserver::new();
    let supervisor = supervisor_for(&[(device.clone(), script.clone())], observer.clone());

    supervisor.start_all().await;
    assert!(eventually(WAIT, || script.connects() >= 4).await);
    assert_ne!(supervisor.status_of(&device).await, Disconnected);

    assert_ok!(tokio::time::timeout(WAIT, supervisor.shutdown()).await);
    assert_eq!(script.connects(), script.disconnects());
    assert_eq!(observer.punch_count(), 0);
}

#[tokio::test]
async fn an_unreachable_device_does_not_block_its_neighbours() {
    let healthy = device();
    let unreachable = Device::new("Basement", "10.1.0.99", 4370);
    let script = ScriptedDevice::steady(staff(), vec![punch("2", at(10, 0, 0))]);
    let observer = RecordingObserver::new();

    // the connector knows nothing about the basement terminal
    let supervisor = Supervisor::new(
        vec![unreachable.clone(), healthy.clone()],
        Arc::new(ScriptedConnector::new().with_device(&healthy, script.clone())),
        StoreBinding::Shared(Arc::new(MemoryLogStore::new())),
        observer.clone(),
        fast_config(),
    )
    .expect("valid config");
    assert_eq!(supervisor.start_all().await, 2);

    assert!(eventually(WAIT, || observer.punch_count() == 1).await);
    assert!(eventually(WAIT, || observer.details(&unreachable, Reconnecting).len() >= 2).await);

    let statuses = supervisor.statuses().await;
    assert_eq!(statuses[0].0, unreachable);
    assert_eq!(statuses[0].1.failures, 0);
    assert_eq!(statuses[1].1.state, Connected);

    supervisor.shutdown().await;
    for (_, status) in supervisor.statuses().await {
        assert_eq!(status.state, Disconnected);
    }
}
