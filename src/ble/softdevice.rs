//! SoftDevice-backed radio transport.
//!
//! Implements [`RadioTransport`] over the Nordic S140 SoftDevice in
//! Central role.  Scanning uses the GAP observer API with an uptime
//! deadline; connections go through a whitelist of exactly the target
//! address.  The SoftDevice GATT client discovers by UUID, so
//! enumeration probes a roster of well-known primary services plus
//! every service UUID the peer listed in its advertisement - that is
//! how vendor 128-bit services reach the report.
//!
//! The S140 cannot be restarted without a reboot, so `reset` drains
//! central activity (any scan in flight is stopped, links are already
//! torn down by the engine) and lets the stack quiesce.  In the field
//! this clears the stuck-observer condition that motivates the reset
//! in the first place.

use core::slice;

use defmt::{info, warn};
use embassy_time::{with_timeout, Duration, Instant, Timer};
use heapless::Vec;
use nrf_softdevice::ble::{central, gatt_client, Address, AddressType, Connection};
use nrf_softdevice::{raw, RawError, Softdevice};

use crate::ble::adv_parser;
use crate::ble::transport::{RadioTransport, ServiceInfo};
use crate::ble::{Addr, AddrKind, CharProps, Characteristic, Sighting, Uuid};
use crate::config::{MAX_ADVERTISED_UUIDS, MAX_SIGHTINGS};
use crate::error::{ConnectError, EnumerationError, RadioFault, ResetError};

/// Primary services probed on every peer, in discovery order.  UUIDs
/// taken from the peer's advertised service lists are probed after
/// this roster.
// TODO: replace by-UUID probing with a full handle-range walk once the
// bindings expose the sd_ble_gattc_primary_services_discover events.
const SERVICE_ROSTER: &[u16] = &[
    0x1800, // Generic Access
    0x1801, // Generic Attribute
    0x180a, // Device Information
    0x180f, // Battery Service
    0x180d, // Heart Rate
    0x1809, // Health Thermometer
    0x1812, // Human Interface Device
    0x1815, // Automation IO
    0xffe0, // HM-10 serial
];

/// Service UUIDs collected from advertisements, keyed by address.
/// Refilled on every scan window alongside the sighting table.
type AdvertisedCache = Vec<(Addr, Vec<Uuid, MAX_ADVERTISED_UUIDS>), MAX_SIGHTINGS>;

pub struct SoftRadio {
    sd: &'static Softdevice,
    advertised: AdvertisedCache,
}

impl SoftRadio {
    pub fn new(sd: &'static Softdevice) -> Self {
        Self {
            sd,
            advertised: Vec::new(),
        }
    }
}

fn note_advertised(cache: &mut AdvertisedCache, addr: &Addr, data: &[u8]) {
    let uuids = adv_parser::service_uuids(data);
    if uuids.is_empty() {
        return;
    }
    if let Some((_, known)) = cache.iter_mut().find(|(a, _)| a.bytes == addr.bytes) {
        for uuid in uuids {
            if !known.iter().any(|k| *k == uuid) {
                let _ = known.push(uuid);
            }
        }
        return;
    }
    let _ = cache.push((*addr, uuids));
}

/// Probe one primary service by UUID and append it when present.
/// `ServiceNotFound` is the common case and not an error.
async fn probe_service(
    handle: &Connection,
    uuid: Uuid,
    out: &mut Vec<ServiceInfo, { crate::config::MAX_SERVICES }>,
) -> Result<(), EnumerationError> {
    let target = match uuid {
        Uuid::Short(sid) => nrf_softdevice::ble::Uuid::new_16(sid),
        Uuid::Long(bytes) => {
            // The SoftDevice registers vendor UUIDs little-endian.
            let mut le = bytes;
            le.reverse();
            nrf_softdevice::ble::Uuid::new_128(&le)
        }
    };
    match gatt_client::discover_service(handle, target).await {
        Ok(svc) => {
            info!(
                "service found, handles {}..{}",
                svc.handle_range.start_handle, svc.handle_range.end_handle
            );
            let _ = out.push(ServiceInfo {
                uuid,
                handle_start: svc.handle_range.start_handle,
                handle_end: svc.handle_range.end_handle,
            });
            Ok(())
        }
        Err(gatt_client::DiscoverError::ServiceNotFound) => Ok(()),
        Err(e) => Err(classify_discover(e)),
    }
}

fn addr_from_ble(address: &Address) -> Addr {
    let kind = match address.address_type() {
        AddressType::Public => AddrKind::Public,
        AddressType::RandomStatic => AddrKind::RandomStatic,
        AddressType::RandomPrivateResolvable => AddrKind::RandomPrivateResolvable,
        AddressType::RandomPrivateNonResolvable => AddrKind::RandomPrivateNonResolvable,
        AddressType::Anonymous => AddrKind::Anonymous,
    };
    Addr::new(kind, address.bytes())
}

fn ble_from_addr(addr: &Addr) -> Address {
    let kind = match addr.kind {
        AddrKind::Public => AddressType::Public,
        AddrKind::RandomStatic => AddressType::RandomStatic,
        AddrKind::RandomPrivateResolvable => AddressType::RandomPrivateResolvable,
        AddrKind::RandomPrivateNonResolvable => AddressType::RandomPrivateNonResolvable,
        AddrKind::Anonymous => AddressType::Anonymous,
    };
    Address::new(kind, addr.bytes)
}

fn props_from_raw(p: raw::ble_gatt_char_props_t) -> CharProps {
    let mut bits = 0;
    if p.read() != 0 {
        bits |= CharProps::READ;
    }
    if p.write() != 0 {
        bits |= CharProps::WRITE;
    }
    if p.notify() != 0 {
        bits |= CharProps::NOTIFY;
    }
    CharProps(bits)
}

/// Stack-level errors escalate to the health monitor; everything else
/// is the peer being difficult and counts as a refusal.
fn classify_connect_raw(err: RawError) -> ConnectError {
    match err {
        RawError::ConnCount
        | RawError::Resources
        | RawError::NoMem
        | RawError::Busy
        | RawError::InvalidState => ConnectError::Radio(RadioFault(err as u32)),
        _ => ConnectError::Refused,
    }
}

fn classify_discover(err: gatt_client::DiscoverError) -> EnumerationError {
    match err {
        gatt_client::DiscoverError::Raw(e) => EnumerationError::Radio(RadioFault(e as u32)),
        _ => EnumerationError::Enumeration,
    }
}

impl RadioTransport for SoftRadio {
    type Handle = Connection;

    async fn scan(
        &mut self,
        duration_ms: u32,
        on_sighting: &mut dyn FnMut(Sighting),
    ) -> Result<(), RadioFault> {
        let config = central::ScanConfig {
            // Active scan so scan responses (device names) come back.
            active: true,
            ..Default::default()
        };

        let deadline = Instant::now() + Duration::from_millis(duration_ms as u64);

        self.advertised.clear();
        let advertised = &mut self.advertised;

        let result = central::scan(self.sd, &config, |params| {
            if Instant::now() > deadline {
                return Some(()); // Window closed - stop the scan.
            }

            // Non-connectable beacons can never be probed.
            if params.type_.connectable() == 0 {
                return None;
            }

            let data = unsafe {
                slice::from_raw_parts(params.data.p_data, params.data.len as usize)
            };
            let address = Address::from_raw(params.peer_addr);
            let addr = addr_from_ble(&address);
            note_advertised(advertised, &addr, data);
            on_sighting(Sighting {
                addr,
                name: adv_parser::local_name(data).unwrap_or_default(),
                rssi: params.rssi,
                last_seen_ms: Instant::now().as_millis(),
            });

            None // Keep scanning until the deadline.
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(central::ScanError::Raw(e)) => {
                warn!("scan raw error: {:?}", e);
                Err(RadioFault(e as u32))
            }
            Err(_) => Err(RadioFault(0)),
        }
    }

    async fn connect(&mut self, addr: &Addr, timeout_ms: u32) -> Result<Connection, ConnectError> {
        let target = ble_from_addr(addr);
        let whitelist = [&target];
        let conn_cfg = central::ConnectConfig {
            scan_config: central::ScanConfig {
                whitelist: Some(&whitelist),
                ..Default::default()
            },
            ..Default::default()
        };

        // Dropping the connect future on timeout cancels the GAP
        // connection attempt.
        match with_timeout(
            Duration::from_millis(timeout_ms as u64),
            central::connect(self.sd, &conn_cfg),
        )
        .await
        {
            Err(_) => Err(ConnectError::Timeout),
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(central::ConnectError::Timeout)) => Err(ConnectError::Timeout),
            Ok(Err(central::ConnectError::Raw(e))) => Err(classify_connect_raw(e)),
            Ok(Err(_)) => Err(ConnectError::Refused),
        }
    }

    async fn discover_services(
        &mut self,
        handle: &Connection,
    ) -> Result<Vec<ServiceInfo, { crate::config::MAX_SERVICES }>, EnumerationError> {
        let peer = addr_from_ble(&handle.peer_address());
        let advertised = self
            .advertised
            .iter()
            .find(|(a, _)| a.bytes == peer.bytes)
            .map(|(_, uuids)| uuids.as_slice())
            .unwrap_or(&[]);

        let mut out = Vec::new();
        for &sid in SERVICE_ROSTER {
            if out.is_full() {
                break;
            }
            probe_service(handle, Uuid::Short(sid), &mut out).await?;
        }
        for &uuid in advertised {
            if out.is_full() {
                break;
            }
            // Roster entries were already probed above.
            if matches!(uuid, Uuid::Short(sid) if SERVICE_ROSTER.contains(&sid)) {
                continue;
            }
            probe_service(handle, uuid, &mut out).await?;
        }
        Ok(out)
    }

    async fn discover_characteristics(
        &mut self,
        handle: &Connection,
        service: &ServiceInfo,
    ) -> Result<Vec<Characteristic, { crate::config::MAX_CHARACTERISTICS }>, EnumerationError>
    {
        let chars =
            gatt_client::discover_characteristics(handle, service.handle_start, service.handle_end)
                .await
                .map_err(classify_discover)?;

        let mut out = Vec::new();
        for ch in chars.iter() {
            let c = Characteristic {
                uuid: Uuid::Short(ch.uuid.uuid),
                props: props_from_raw(ch.char_props),
            };
            if out.push(c).is_err() {
                break;
            }
        }
        Ok(out)
    }

    async fn disconnect(&mut self, handle: Connection) {
        // Best effort; an already-dropped link reports InvalidState.
        let _ = handle.disconnect();
        // Give the GAP disconnect a moment to complete before the
        // handle drops.
        Timer::after(Duration::from_millis(100)).await;
    }

    async fn reset(&mut self) -> Result<(), ResetError> {
        // Stop any observer activity the stack thinks is still running.
        let ret = unsafe { raw::sd_ble_gap_scan_stop() };
        match RawError::convert(ret) {
            Ok(()) => info!("stale scan stopped"),
            Err(RawError::InvalidState) => {} // Nothing was scanning.
            Err(e) => {
                warn!("scan stop failed during reset: {:?}", e);
                return Err(ResetError(e as u32));
            }
        }
        Ok(())
    }

    async fn settle(&mut self, ms: u32) {
        Timer::after(Duration::from_millis(ms as u64)).await;
    }

    fn uptime_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}
