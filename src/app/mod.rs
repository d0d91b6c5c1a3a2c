//! Application core — the monitor's domain logic behind port traits.
//!
//! All interaction with hardware and the network happens through the
//! traits in [`ports`], keeping this layer testable on the host against
//! the simulated sensor.

pub mod commands;
pub mod ports;
pub mod service;
