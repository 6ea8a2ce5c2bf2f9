// # punch-core
//
// Core library for polling attendance terminals and forwarding every new
// punch to downstream consumers.
//
// ## Architecture Overview
//
// - **LogKey**: Stable identity of a punch, `(user_id, second)`
// - **LogStore**: Durable set of punches already reported
// - **DeviceConnector**: Trait over the vendor SDK (full snapshots, no cursor)
// - **DeviceSession**: One device's connect/poll/reconnect loop
// - **Supervisor**: At most one session per device, start/stop/status
// - **Observer**: Where sessions report punches, directories and state
//
// ## Design Principles
//
// 1. **At-least-once**: A punch is persisted only after it was reported
// 2. **Isolation**: Devices poll on independent tasks and never block each other
// 3. **Availability**: Failures are retried forever, never fatal to the process
// 4. **Single writer**: Sessions share the store through one synchronized handle
// 5. **Library-First**: The daemon is a thin shell around this crate

pub mod config;
pub mod error;
pub mod key;
pub mod model;
pub mod observer;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod traits;

// Re-export core types for convenience
pub use config::{BackoffStrategy, DedupScope, DeviceConfig, EngineConfig, load_devices};
pub use error::{Error, Result};
pub use key::LogKey;
pub use model::{AttendanceLog, Device, DeviceId, DeviceStatus, Direction, PunchMethod, SessionState, User};
pub use observer::{ChannelObserver, FanoutObserver, Observer, ObserverEvent, TracingObserver};
pub use session::DeviceSession;
pub use store::{FileLogStore, FileLogStoreFactory, MemoryLogStore, MemoryLogStoreFactory};
pub use supervisor::{StoreBinding, Supervisor};
pub use traits::{DeviceConnection, DeviceConnector, LogStore, LogStoreFactory};
