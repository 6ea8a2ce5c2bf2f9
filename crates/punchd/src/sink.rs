//! Punch sink
//!
//! Drains the observer event stream and appends every new punch to a
//! JSON-lines file, one object per punch.

use anyhow::{Context, Result};
use punch_core::key::TIMESTAMP_FORMAT;
use punch_core::{AttendanceLog, Device, Direction, ObserverEvent, PunchMethod};
use serde::Serialize;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// One line of the punch log
#[derive(Debug, Serialize)]
struct PunchLine<'a> {
    device: &'a str,
    ip: &'a str,
    port: u16,
    user_id: &'a str,
    name: &'a str,
    timestamp: String,
    method: PunchMethod,
    direction: Direction,
}

impl<'a> PunchLine<'a> {
    fn new(device: &'a Device, log: &'a AttendanceLog, name: &'a str) -> Self {
        Self {
            device: &device.name,
            ip: &device.ip,
            port: device.port,
            user_id: &log.user_id,
            name,
            timestamp: log.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            method: log.punch_method,
            direction: log.direction,
        }
    }
}

/// Open the punch log for appending, creating it if needed
pub async fn open(path: &Path) -> Result<File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("cannot open punch log {}", path.display()))
}

/// Consume `events` until the stream ends
///
/// With no `file` punches are only drained (the tracing observer already
/// logs them). Every line is flushed as it is written, and a failed write
/// ends the sink with an error.
///
/// # Returns
///
/// Number of punches written
pub async fn run<S>(mut events: S, mut file: Option<File>) -> Result<usize>
where
    S: Stream<Item = ObserverEvent> + Unpin,
{
    let mut written = 0;
    while let Some(event) = events.next().await {
        let ObserverEvent::NewPunch {
            device,
            log,
            resolved_name,
        } = event
        else {
            continue;
        };

        let Some(file) = file.as_mut() else {
            continue;
        };

        let mut line = serde_json::to_string(&PunchLine::new(&device, &log, &resolved_name))?;
        line.push('\n');

        append(file, &line)
            .await
            .with_context(|| format!("failed to write punch for {} from {}", log.user_id, device))?;
        written += 1;
    }

    debug!("Punch sink drained, {} punch(es) written", written);
    Ok(written)
}

async fn append(file: &mut File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
