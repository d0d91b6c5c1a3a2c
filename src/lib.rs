//! StrikeGuard lightning monitor library.
//!
//! Exposes the monitor core for integration testing and the firmware
//! binary.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod alerts;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod interrupt;
pub mod noise;
pub mod notify;
pub mod pins;
pub mod signal;
pub mod status;
pub mod supervisor;
pub mod timer;

pub use app::commands::MonitorCommand;
pub use app::service::{Monitor, MonitorTiming};
pub use config::MonitorConfig;
pub use error::{Error, Result};
