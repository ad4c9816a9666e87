//! ble-prober - standalone BLE survey probe.
//!
//! Scans for nearby peripherals, connects to each to enumerate its
//! GATT services and characteristics, and appends one timestamped
//! report per probe to an append-only log.  The hard part lives here
//! in portable `no_std` code: the scan/probe state machine and the
//! radio-health monitor that detects a silently wedged stack and
//! recovers it without a reboot.
//!
//! Everything in this library runs on the host under `cargo test`;
//! the `embedded` feature adds the nRF52840 pieces (SoftDevice radio
//! adapter, flash log, status LED) used by the firmware binary.

#![cfg_attr(not(test), no_std)]

pub mod ble;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
#[cfg(feature = "embedded")]
pub mod flashlog;
#[cfg(feature = "embedded")]
pub mod led;
pub mod status;
pub mod store;

pub use ble::engine::{EngineState, ProbeEngine};
pub use ble::health::{HealthMonitor, Outcome};
pub use ble::transport::RadioTransport;
pub use ble::{ProbeOutcome, ProbeReport, Sighting};
pub use facade::{Command, Request};
pub use status::{StatusEmitter, StatusSignal};
pub use store::{LogSink, ResultStore};
