//! Core traits for the punch engine
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DeviceConnector`] / [`DeviceConnection`]: the device SDK boundary
//! - [`LogStore`]: durable set of already-reported punches
//! - [`LogStoreFactory`]: per-device store construction

pub mod device;
pub mod log_store;

pub use device::{DeviceConnection, DeviceConnector};
pub use log_store::{LogStore, LogStoreFactory};
