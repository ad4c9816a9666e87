//! Service facade - the boundary the network layer talks to.
//!
//! The transport serving the dashboard is an external collaborator;
//! this module defines what crosses the boundary: engine commands in,
//! JSON snapshots out.  Messages are newline-delimited JSON, small
//! enough to chunk over any transport.  The facade never touches the
//! radio - it reads the result store and posts commands into the
//! engine's pending slot.

use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

use crate::ble::engine::EngineState;
use crate::ble::{Addr, AddrKind, ProbeReport, Sighting};
use crate::clock::Clock;
use crate::config::{MAX_CHARACTERISTICS, MAX_REPORTS, MAX_SERVICES, MAX_SIGHTINGS};
use crate::store::ResultStore;

/// Commands accepted by the engine's pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Begin a scan pass (honored at Idle).
    StartScan,
    /// Abandon the current pass (honored at Selecting/Idle).
    Abort,
    /// Re-probe one already-sighted target (honored at Idle/Selecting).
    /// Unknown addresses are ignored with a warning.
    ProbeOne(Addr),
    /// Manual recovery from Faulted; ignored in every other state.
    Reset,
}

/// One request arriving from the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Engine(Command),
    /// Wall-clock sync: unix seconds observed now.
    SetTime { epoch_secs: u64 },
}

/// Wire format for requests - flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`.
#[derive(Deserialize)]
struct RawRequest {
    cmd: String<16>,
    #[serde(default)]
    epoch: Option<u64>,
    #[serde(default)]
    mac: Option<String<17>>,
}

/// Parse one NDJSON request line.  Unknown commands and malformed
/// JSON yield `None`; the caller answers with an error status.
pub fn parse_request(line: &[u8]) -> Option<Request> {
    let (raw, _) = serde_json_core::from_slice::<RawRequest>(line).ok()?;
    match raw.cmd.as_str() {
        "scan" => Some(Request::Engine(Command::StartScan)),
        "abort" => Some(Request::Engine(Command::Abort)),
        "probe" => raw
            .mac
            .as_deref()
            .and_then(parse_mac)
            .map(|addr| Request::Engine(Command::ProbeOne(addr))),
        "reset" => Some(Request::Engine(Command::Reset)),
        "set_time" => raw.epoch.map(|epoch_secs| Request::SetTime { epoch_secs }),
        _ => None,
    }
}

/// Parse `aa:bb:cc:dd:ee:ff` (most significant byte first) into the
/// over-the-air byte order.  The engine re-arms targets by address
/// bytes, so the kind defaults to Public.
fn parse_mac(text: &str) -> Option<Addr> {
    let mut bytes = [0u8; 6];
    let mut count = 0;
    for part in text.split(':') {
        if count == 6 || part.len() != 2 {
            return None;
        }
        bytes[5 - count] = u8::from_str_radix(part, 16).ok()?;
        count += 1;
    }
    (count == 6).then(|| Addr::new(AddrKind::Public, bytes))
}

// - Snapshot serialization --------------------------------------------

#[derive(Serialize)]
struct SightingJson<'a> {
    name: &'a str,
    mac: String<17>,
    rssi: i8,
}

#[derive(Serialize)]
struct ServiceJson {
    uuid: String<36>,
    chars: Vec<String<36>, MAX_CHARACTERISTICS>,
}

#[derive(Serialize)]
struct ReportJson<'a> {
    mac: String<17>,
    name: &'a str,
    outcome: &'static str,
    /// Unix seconds (or seconds since boot when unsynced).
    ts: u64,
    elapsed_ms: u32,
    services: Vec<ServiceJson, MAX_SERVICES>,
}

#[derive(Serialize)]
struct SnapshotJson<'a> {
    state: &'static str,
    wedged: bool,
    sightings: Vec<SightingJson<'a>, MAX_SIGHTINGS>,
    reports: Vec<ReportJson<'a>, MAX_REPORTS>,
}

fn state_str(state: EngineState) -> &'static str {
    match state {
        EngineState::Idle => "idle",
        EngineState::Scanning => "scanning",
        EngineState::Selecting => "selecting",
        EngineState::Connecting => "connecting",
        EngineState::Probing => "probing",
        EngineState::Disconnecting => "disconnecting",
        EngineState::Resetting => "resetting",
        EngineState::Faulted => "faulted",
    }
}

fn sighting_json(s: &Sighting) -> SightingJson<'_> {
    SightingJson {
        name: s.name.as_str(),
        mac: s.addr.to_hex(),
        rssi: s.rssi,
    }
}

fn report_json<'a>(r: &'a ProbeReport, clock: &Clock) -> ReportJson<'a> {
    let mut services = Vec::new();
    for svc in &r.services {
        let mut chars = Vec::new();
        for ch in &svc.characteristics {
            let _ = chars.push(ch.uuid.to_hex());
        }
        let _ = services.push(ServiceJson {
            uuid: svc.uuid.to_hex(),
            chars,
        });
    }
    ReportJson {
        mac: r.addr.to_hex(),
        name: r.name.as_str(),
        outcome: r.outcome.as_str(),
        ts: clock.stamp(r.captured_at_ms),
        elapsed_ms: r.elapsed_ms,
        services,
    }
}

/// Serialize the facade snapshot (current sightings plus recent
/// reports) as JSON into `buf`.  Returns the number of bytes written,
/// or `None` when `buf` is too small.
pub fn serialize_snapshot(
    store: &ResultStore,
    clock: &Clock,
    state: EngineState,
    wedged: bool,
    buf: &mut [u8],
) -> Option<usize> {
    let mut sightings = Vec::new();
    for s in store.current_snapshot() {
        let _ = sightings.push(sighting_json(s));
    }
    let mut reports = Vec::new();
    for r in store.reports() {
        let _ = reports.push(report_json(r, clock));
    }
    let snapshot = SnapshotJson {
        state: state_str(state),
        wedged,
        sightings,
        reports,
    };
    serde_json_core::to_slice(&snapshot, buf).ok()
}
