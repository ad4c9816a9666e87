//! Failure taxonomy for the scan/probe pipeline.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! The split between peripheral-local failures (timeout, refused,
//! enumeration) and driver-level faults ([`RadioFault`]) is what the
//! health monitor keys its wedged decision on: one flaky peripheral
//! must never cost us a stack reset.

/// A driver/stack-level radio fault, carrying the raw error code the
/// underlying transport reported (0 when the transport has none).
///
/// These escalate to the health monitor and may trigger a reset; they
/// are never retried against the same peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioFault(pub u32);

/// Why a connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectError {
    /// Peripheral did not answer within the configured timeout.
    Timeout,
    /// Peripheral actively rejected the connection.
    Refused,
    /// Driver-level failure while setting up the link.
    Radio(RadioFault),
}

/// Why GATT enumeration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnumerationError {
    /// The peripheral returned a malformed or truncated attribute table.
    /// Whatever was discovered before the failure is still reported.
    Enumeration,
    /// Driver-level failure mid-discovery.
    Radio(RadioFault),
}

/// The radio reset itself failed.  Fatal: drives the engine to
/// Faulted and requires operator intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetError(pub u32);

/// Persistent log append/read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Flash write/erase failed.
    Flash,
    /// Record exceeds the per-record buffer.
    RecordTooLarge,
}

impl From<RadioFault> for ConnectError {
    fn from(e: RadioFault) -> Self {
        ConnectError::Radio(e)
    }
}

impl From<RadioFault> for EnumerationError {
    fn from(e: RadioFault) -> Self {
        EnumerationError::Radio(e)
    }
}
