//! Bluetooth Low Energy subsystem.
//!
//! This module drives the survey pipeline in **Central** role:
//!
//! 1. **Transport** - the capability trait over the underlying radio
//!    stack (scan, connect, discover, disconnect, reset).
//! 2. **Health Monitor** - failure accounting that decides when the
//!    stack is wedged and must be reset.
//! 3. **Engine** - the scan → select → connect → enumerate → disconnect
//!    state machine, with timeout/retry policy and the anti-zombie
//!    escape hatch.
//!
//! Everything here is `no_std` and host-testable; the SoftDevice
//! adapter behind the `embedded` feature is the only hardware-facing
//! piece.

pub mod adv_parser;
pub mod engine;
pub mod health;
#[cfg(feature = "embedded")]
pub mod softdevice;
pub mod transport;

use core::fmt::{self, Write};

use heapless::String;

use crate::config::{MAX_CHARACTERISTICS, MAX_SERVICES};

/// BLE address kind, mirroring the GAP address types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddrKind {
    Public,
    RandomStatic,
    RandomPrivateResolvable,
    RandomPrivateNonResolvable,
    Anonymous,
}

/// Opaque peripheral identifier: 6 address bytes plus the GAP kind.
///
/// This is the dedup key for the sighting table and the target key for
/// connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Addr {
    pub kind: AddrKind,
    pub bytes: [u8; 6],
}

impl Addr {
    pub const fn new(kind: AddrKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }

    /// Render as `aa:bb:cc:dd:ee:ff` (most significant byte first,
    /// the usual over-the-air presentation).
    pub fn to_hex(&self) -> String<17> {
        let mut s = String::new();
        for (i, b) in self.bytes.iter().rev().enumerate() {
            if i > 0 {
                let _ = s.push(':');
            }
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

/// A GATT UUID, either SIG-assigned 16-bit or vendor 128-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uuid {
    Short(u16),
    /// 128-bit UUID, big-endian (as printed).
    Long([u8; 16]),
}

impl Uuid {
    /// Render as `0x180f` or the standard 8-4-4-4-12 form.
    pub fn to_hex(&self) -> String<36> {
        let mut s = String::new();
        let _ = write!(&mut s, "{}", self);
        s
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Short(v) => write!(f, "0x{:04x}", v),
            Uuid::Long(b) => {
                for (i, byte) in b.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        write!(f, "-")?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Human name for well-known SIG service UUIDs, used when rendering
/// log records.  Unlisted UUIDs are printed bare.
pub fn service_name(uuid: &Uuid) -> Option<&'static str> {
    let Uuid::Short(v) = uuid else { return None };
    match v {
        0x1800 => Some("Generic Access"),
        0x1801 => Some("Generic Attribute"),
        0x180a => Some("Device Information"),
        0x180f => Some("Battery Service"),
        0x180d => Some("Heart Rate"),
        0x1812 => Some("Human Interface Device"),
        0x1815 => Some("Automation IO"),
        0x1809 => Some("Health Thermometer"),
        0xffe0 => Some("HM-10 Serial (Proprietary)"),
        0xfebe => Some("Bose Proprietary"),
        _ => None,
    }
}

/// A peripheral seen during the current scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sighting {
    /// BLE address (dedup key within one scan window).
    pub addr: Addr,
    /// Advertised Local Name; empty when the peripheral is unnamed.
    pub name: String<32>,
    /// Received Signal Strength Indicator (dBm).
    pub rssi: i8,
    /// Uptime when this advertisement was last captured.
    pub last_seen_ms: u64,
}

impl Sighting {
    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Characteristic property bits we report (subset of the GATT set).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharProps(pub u8);

impl CharProps {
    pub const READ: u8 = 1 << 0;
    pub const WRITE: u8 = 1 << 1;
    pub const NOTIFY: u8 = 1 << 2;

    /// `R`/`W`/`N` letters for log records, e.g. `[RN]`.
    pub fn letters(&self) -> String<3> {
        let mut s = String::new();
        if self.0 & Self::READ != 0 {
            let _ = s.push('R');
        }
        if self.0 & Self::WRITE != 0 {
            let _ = s.push('W');
        }
        if self.0 & Self::NOTIFY != 0 {
            let _ = s.push('N');
        }
        s
    }
}

/// A discovered characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Characteristic {
    pub uuid: Uuid,
    pub props: CharProps,
}

/// A discovered service with its characteristics, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub characteristics: heapless::Vec<Characteristic, MAX_CHARACTERISTICS>,
}

/// Final classification of one probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProbeOutcome {
    Success,
    Timeout,
    Refused,
    EnumerationFailed,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Success => "success",
            ProbeOutcome::Timeout => "timeout",
            ProbeOutcome::Refused => "refused",
            ProbeOutcome::EnumerationFailed => "enum-failed",
        }
    }
}

/// Immutable record of one probe attempt.
///
/// Finalized exactly once by the engine; partial enumeration on
/// failure keeps whatever services were discovered before the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProbeReport {
    pub addr: Addr,
    /// Name from the sighting that selected this target (may be empty).
    pub name: String<32>,
    pub outcome: ProbeOutcome,
    pub services: heapless::Vec<ServiceRecord, MAX_SERVICES>,
    /// Uptime when the probe attempt began.
    pub captured_at_ms: u64,
    /// Wall time spent on the attempt.
    pub elapsed_ms: u32,
}
