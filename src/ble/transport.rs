//! Radio transport capability trait.
//!
//! Thin seam between the engine and the underlying BLE stack.  Every
//! method is a bounded operation: scans carry a duration, connects a
//! timeout, and nothing here may block indefinitely.  The engine is
//! the sole owner of the transport, so there is exactly one caller of
//! the radio at any time by construction.
//!
//! On hardware this is implemented over the Nordic SoftDevice
//! (`softdevice` module); tests script a mock.

use heapless::Vec;

use crate::ble::{Characteristic, ServiceRecord, Sighting, Uuid};
use crate::config::{MAX_CHARACTERISTICS, MAX_SERVICES};
use crate::error::{ConnectError, EnumerationError, RadioFault, ResetError};

/// Handle range / identity of a discovered service, transport-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceInfo {
    pub uuid: Uuid,
    /// Opaque attribute-handle range used for characteristic discovery.
    pub handle_start: u16,
    pub handle_end: u16,
}

impl ServiceInfo {
    /// Promote to a report record with no characteristics yet.
    pub fn into_record(self) -> ServiceRecord {
        ServiceRecord {
            uuid: self.uuid,
            characteristics: Vec::new(),
        }
    }
}

/// Capability interface over the BLE driver.
///
/// Blocking-style async calls with explicit bounds; each `await` is a
/// cooperative suspension point and the only places the engine yields.
#[allow(async_fn_in_trait)]
pub trait RadioTransport {
    /// Live connection handle.  Dropping it without `disconnect` is a
    /// bug in the caller; the engine guarantees cleanup.
    type Handle;

    /// Scan for `duration_ms`, invoking `on_sighting` once per captured
    /// advertisement (duplicates included; the engine dedups).
    async fn scan(
        &mut self,
        duration_ms: u32,
        on_sighting: &mut dyn FnMut(Sighting),
    ) -> Result<(), RadioFault>;

    /// Connect to `addr`, bounded by `timeout_ms`.
    async fn connect(
        &mut self,
        addr: &crate::ble::Addr,
        timeout_ms: u32,
    ) -> Result<Self::Handle, ConnectError>;

    /// Enumerate primary services on the peer.
    async fn discover_services(
        &mut self,
        handle: &Self::Handle,
    ) -> Result<Vec<ServiceInfo, MAX_SERVICES>, EnumerationError>;

    /// Enumerate characteristics within one service.
    async fn discover_characteristics(
        &mut self,
        handle: &Self::Handle,
        service: &ServiceInfo,
    ) -> Result<Vec<Characteristic, MAX_CHARACTERISTICS>, EnumerationError>;

    /// Tear down the link.  Best-effort: failures are swallowed by the
    /// transport, the peer is gone either way.
    async fn disconnect(&mut self, handle: Self::Handle);

    /// Reset low-level radio error state.  Only fails when the stack
    /// is beyond recovery.
    async fn reset(&mut self) -> Result<(), ResetError>;

    /// Cooperative delay, used for radio cool-down and discovery pacing.
    async fn settle(&mut self, ms: u32);

    /// Monotonic uptime for timestamps and elapsed measurement.
    fn uptime_ms(&self) -> u64;
}
