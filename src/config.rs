//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, radio policy knobs, and storage layout
//! constants live here so they can be tuned in one place.  Runtime
//! tunables are collected in [`EngineConfig`].

// BLE scan

/// Duration of a BLE scan window (milliseconds).
pub const SCAN_DURATION_MS: u32 = 10_000;

/// Ignore advertisements weaker than this (dBm).
pub const RSSI_THRESHOLD: i8 = -90;

/// When true, only peripherals advertising a Local Name enter the
/// sighting table.
pub const FILTER_NAMED_ONLY: bool = true;

/// Maximum number of distinct peripherals tracked in one scan window.
pub const MAX_SIGHTINGS: usize = 16;

/// Maximum service UUIDs remembered from one peripheral's
/// advertisement for later discovery.
pub const MAX_ADVERTISED_UUIDS: usize = 8;

// Probing

/// Per-connection attempt timeout (milliseconds).
pub const CONNECT_TIMEOUT_MS: u32 = 10_000;

/// How many times a candidate that failed with Timeout/Refused is
/// retried within the same scan pass (radio errors are never retried).
pub const CONNECT_RETRIES: u8 = 1;

/// Radio quiesce before a connection attempt (milliseconds).
pub const PRE_CONNECT_SETTLE_MS: u32 = 500;

/// Settle time after the link comes up, before GATT discovery starts.
pub const POST_CONNECT_SETTLE_MS: u32 = 1_000;

/// Pacing delay between per-service characteristic discoveries.
pub const ENUM_PACE_MS: u32 = 100;

/// Maximum services captured per probe report.
pub const MAX_SERVICES: usize = 8;

/// Maximum characteristics captured per service.
pub const MAX_CHARACTERISTICS: usize = 12;

// Radio health / recovery

/// Consecutive non-success outcomes before the radio is declared wedged.
pub const WEDGED_THRESHOLD: u8 = 3;

/// Cool-down after a radio reset before scanning resumes (milliseconds).
pub const RESET_COOLDOWN_MS: u32 = 2_000;

// Result store

/// Number of recent probe reports kept in memory for the snapshot.
/// The persistent log keeps everything.
pub const MAX_REPORTS: usize = 8;

// Probe log storage

/// Flash page size for nRF52840 (4 KB).
pub const FLASH_PAGE_SIZE: u32 = 4096;

/// Flash page index where the probe log starts.
pub const LOG_FLASH_PAGE_START: u32 = 224;

/// Number of flash pages reserved for the probe log.
pub const LOG_FLASH_PAGE_COUNT: u32 = 20;

/// Upper bound for one rendered probe-log record.  Sized so a record
/// always fits one `sequential-storage` queue element inside a single
/// 4 KB flash page (page and item headers take the remainder), and so
/// a full report at the service/characteristic capacities with 16-bit
/// UUIDs renders without truncation.  Larger reports get their
/// trailing characteristic lines truncated, never dropped.
pub const MAX_LOG_RECORD: usize = 4000;

/// Runtime tunables for the scan/probe engine.
///
/// Defaults come from the constants above; all durations and counts
/// must be positive (see [`EngineConfig::validate`]).
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub scan_duration_ms: u32,
    pub rssi_threshold: i8,
    pub filter_named_only: bool,
    pub connect_timeout_ms: u32,
    pub connect_retries: u8,
    pub pre_connect_settle_ms: u32,
    pub post_connect_settle_ms: u32,
    pub enum_pace_ms: u32,
    pub wedged_threshold: u8,
    pub reset_cooldown_ms: u32,
}

impl EngineConfig {
    /// Returns true if every duration and count is positive.
    ///
    /// `connect_retries` may be zero (retrying is a policy, not a
    /// liveness requirement); everything else bounds a radio operation
    /// and must not be.
    pub fn validate(&self) -> bool {
        self.scan_duration_ms > 0
            && self.connect_timeout_ms > 0
            && self.pre_connect_settle_ms > 0
            && self.post_connect_settle_ms > 0
            && self.enum_pace_ms > 0
            && self.wedged_threshold > 0
            && self.reset_cooldown_ms > 0
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_duration_ms: SCAN_DURATION_MS,
            rssi_threshold: RSSI_THRESHOLD,
            filter_named_only: FILTER_NAMED_ONLY,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            connect_retries: CONNECT_RETRIES,
            pre_connect_settle_ms: PRE_CONNECT_SETTLE_MS,
            post_connect_settle_ms: POST_CONNECT_SETTLE_MS,
            enum_pace_ms: ENUM_PACE_MS,
            wedged_threshold: WEDGED_THRESHOLD,
            reset_cooldown_ms: RESET_COOLDOWN_MS,
        }
    }
}

// GPIO pin assignments (nRF52840-DK defaults)
//
// These are logical names; actual `embassy_nrf::peripherals::*` types are
// selected in `main.rs` via type aliases.  Adjust for your custom PCB.
//
//   Status LED → P0.06

/// Slow-blink half period for the status LED (scan window pace).
pub const LED_SLOW_BLINK_MS: u64 = 1_000;

/// Fast-blink half period for the status LED (scan/probe activity).
pub const LED_FAST_BLINK_MS: u64 = 100;

/// Error pattern: double-flash burst period.
pub const LED_ERROR_FLASH_MS: u64 = 60;
pub const LED_ERROR_GAP_MS: u64 = 700;
