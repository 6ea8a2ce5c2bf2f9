// # punchd - Attendance Punch Daemon
//
// Thin integration layer around punch-core. All polling, deduplication and
// reconnect logic lives in the library; the daemon only:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Loads the device list and opens the processed-log store
// 4. Runs the supervisor until SIGTERM/SIGINT
// 5. Forwards every new punch to the log and to an optional JSON-lines file
//
// ## Configuration
//
// - `PUNCHD_DEVICES_FILE`: JSON array of `{name, ip, port}` (default: devices.json)
// - `PUNCHD_STORE_PATH`: Processed-log store (default: processed_logs.json)
// - `PUNCHD_DEDUP_SCOPE`: `global` (one store) or `per_device` (one file per device)
// - `PUNCHD_PUNCH_LOG`: Append new punches here as JSON lines (optional)
// - `PUNCHD_REPLAY_DIR`: Directory of device snapshot files (default: replay)
// - `PUNCHD_POLL_INTERVAL_MS`: Delay between polls of one device
// - `PUNCHD_BACKOFF_MS`: Delay before reconnecting after a failure
// - `PUNCHD_CONNECT_TIMEOUT_MS`: Bound on one connection attempt
// - `PUNCHD_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export PUNCHD_DEVICES_FILE=/etc/punchd/devices.json
// export PUNCHD_STORE_PATH=/var/lib/punchd/processed_logs.json
// export PUNCHD_PUNCH_LOG=/var/lib/punchd/punches.jsonl
//
// punchd
// ```

mod replay;
mod sink;

use anyhow::{Context, Result};
use punch_core::{
    ChannelObserver, DedupScope, EngineConfig, FanoutObserver, FileLogStore, FileLogStoreFactory,
    StoreBinding, Supervisor, TracingObserver, load_devices,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::fs::File;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::replay::ReplayConnector;

/// Exit codes, following systemd conventions
#[derive(Debug, Clone, Copy)]
enum PunchdExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<PunchdExitCode> for ExitCode {
    fn from(code: PunchdExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    devices_file: PathBuf,
    store_path: PathBuf,
    punch_log: Option<PathBuf>,
    replay_dir: PathBuf,
    engine: EngineConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut engine = EngineConfig::default();

        if let Some(ms) = env_millis("PUNCHD_POLL_INTERVAL_MS")? {
            engine.poll_interval_ms = ms;
        }
        if let Some(ms) = env_millis("PUNCHD_BACKOFF_MS")? {
            engine.backoff_ms = ms;
        }
        if let Some(ms) = env_millis("PUNCHD_CONNECT_TIMEOUT_MS")? {
            engine.connect_timeout_ms = ms;
        }
        if let Ok(scope) = env::var("PUNCHD_DEDUP_SCOPE") {
            engine.dedup_scope = match scope.to_lowercase().as_str() {
                "global" => DedupScope::Global,
                "per_device" => DedupScope::PerDevice,
                _ => anyhow::bail!(
                    "PUNCHD_DEDUP_SCOPE '{}' is not supported. \
                    Supported scopes: global, per_device",
                    scope
                ),
            };
        }

        Ok(Self {
            devices_file: env::var("PUNCHD_DEVICES_FILE")
                .unwrap_or_else(|_| "devices.json".to_string())
                .into(),
            store_path: env::var("PUNCHD_STORE_PATH")
                .unwrap_or_else(|_| "processed_logs.json".to_string())
                .into(),
            punch_log: env::var("PUNCHD_PUNCH_LOG")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            replay_dir: env::var("PUNCHD_REPLAY_DIR")
                .unwrap_or_else(|_| "replay".to_string())
                .into(),
            engine,
            log_level: env::var("PUNCHD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.store_path.as_os_str().is_empty() {
            anyhow::bail!("PUNCHD_STORE_PATH cannot be empty");
        }

        if let Some(parent) = self.store_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "PUNCHD_STORE_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "PUNCHD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Read an optional millisecond setting
fn env_millis(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a number of milliseconds. Got: {}", name, value)),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return PunchdExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return PunchdExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return PunchdExitCode::ConfigError.into();
    }

    info!("Starting punchd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return PunchdExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        let punch_log = match config.punch_log.as_deref() {
            Some(path) => match sink::open(path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    error!("Configuration error: {:#}", e);
                    return PunchdExitCode::ConfigError;
                }
            },
            None => None,
        };

        if let Err(e) = run_daemon(config, punch_log).await {
            error!("Daemon error: {:#}", e);
            PunchdExitCode::RuntimeError
        } else {
            PunchdExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal arrives or the punch sink fails
async fn run_daemon(config: Config, punch_log: Option<File>) -> Result<()> {
    let devices = load_devices(&config.devices_file).await;
    if devices.is_empty() {
        warn!(
            "No devices configured in {}, running idle",
            config.devices_file.display()
        );
    }
    info!("Configuration loaded: {} device(s)", devices.len());

    let stores = match config.engine.dedup_scope {
        DedupScope::Global => {
            let store = FileLogStore::open(&config.store_path).await;
            StoreBinding::Shared(Arc::new(store))
        }
        DedupScope::PerDevice => {
            StoreBinding::PerDevice(Arc::new(FileLogStoreFactory::beside(&config.store_path)))
        }
    };

    let (channel, events) = ChannelObserver::with_stream();
    let observer = FanoutObserver::new()
        .with(Arc::new(TracingObserver))
        .with(Arc::new(channel));

    let mut sink = tokio::spawn(sink::run(events, punch_log));

    info!("Replaying devices from {}", config.replay_dir.display());
    let supervisor = Supervisor::new(
        devices,
        Arc::new(ReplayConnector::new(&config.replay_dir)),
        stores,
        Arc::new(observer),
        config.engine.clone(),
    )?;

    let started = supervisor.start_all().await;
    info!("Started {} session(s)", started);

    tokio::select! {
        signal = wait_for_shutdown() => {
            info!("Received shutdown signal: {}", signal?);
        }
        ended = &mut sink => {
            error!("Punch sink stopped, shutting down");
            supervisor.shutdown().await;
            ended.context("punch sink task failed")??;
            anyhow::bail!("punch sink ended before shutdown");
        }
    }

    supervisor.shutdown().await;
    // the last observer sender goes away with the supervisor
    drop(supervisor);

    let written = sink.await.context("punch sink task failed")??;
    info!("Shut down cleanly, {} punch(es) written this run", written);

    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
