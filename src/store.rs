//! Probe result store - in-memory scan table, recent reports, and the
//! single writer into the persistent probe log.
//!
//! The store never talks to the radio; the engine pushes sightings and
//! finalized reports in, the service facade reads snapshots out.  Log
//! records are rendered here and handed to a [`LogSink`] as one buffer
//! per report, so a concurrent reader can never observe a torn record.

use core::fmt::Write;

use heapless::{String, Vec};
use log::{error, info};

use crate::ble::{service_name, ProbeReport, Sighting};
use crate::clock::Clock;
use crate::config::{MAX_LOG_RECORD, MAX_REPORTS, MAX_SIGHTINGS};
use crate::error::StorageError;

/// Append-only persistent record sink.
///
/// One `append` call per finalized report; the implementation must
/// make the whole record visible atomically (the flash queue does this
/// by construction, a host test just collects buffers).
#[allow(async_fn_in_trait)]
pub trait LogSink {
    async fn append(&mut self, record: &[u8]) -> Result<(), StorageError>;
}

/// Most recent scan table plus a ring of recent probe reports.
pub struct ResultStore {
    sightings: Vec<Sighting, MAX_SIGHTINGS>,
    reports: Vec<ProbeReport, MAX_REPORTS>,
}

impl ResultStore {
    pub const fn new() -> Self {
        Self {
            sightings: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Start a new scan window: the sighting table is transient and
    /// never carries over between scans.
    pub fn begin_window(&mut self) {
        self.sightings.clear();
    }

    /// Upsert a sighting by address.  Re-sightings refresh the signal
    /// strength and timestamp in place; a name fills in if the earlier
    /// sighting was anonymous.  The table never grows past one entry
    /// per distinct address.
    pub fn record_sighting(&mut self, sighting: &Sighting) {
        if let Some(existing) = self
            .sightings
            .iter_mut()
            .find(|s| s.addr == sighting.addr)
        {
            if !existing.is_named() && sighting.is_named() {
                existing.name = sighting.name.clone();
            }
            existing.rssi = sighting.rssi;
            existing.last_seen_ms = sighting.last_seen_ms;
            return;
        }

        if self.sightings.is_full() {
            return;
        }
        let _ = self.sightings.push(sighting.clone());
    }

    /// Append a finalized report to the in-memory ring.  Oldest entry
    /// is evicted when full; the persistent log keeps everything.
    pub fn record_report(&mut self, report: &ProbeReport) {
        if self.reports.is_full() {
            self.reports.remove(0);
        }
        let _ = self.reports.push(report.clone());
    }

    /// Read-only view of the current scan table, in sighting order.
    pub fn current_snapshot(&self) -> &[Sighting] {
        &self.sightings
    }

    /// Recent finalized reports, oldest first.
    pub fn reports(&self) -> &[ProbeReport] {
        &self.reports
    }

    pub fn latest_report(&self) -> Option<&ProbeReport> {
        self.reports.last()
    }

    /// Render `report` as one log record and append it to `sink`.
    ///
    /// The record is fully rendered before the sink sees any of it;
    /// a failed render (report larger than the record buffer) is
    /// reported without a partial write.
    pub async fn append_to_log<S: LogSink>(
        &self,
        sink: &mut S,
        clock: &Clock,
        report: &ProbeReport,
    ) -> Result<(), StorageError> {
        let record = format_record(clock, report)?;
        sink.append(record.as_bytes()).await?;
        info!("log record appended ({} bytes)", record.len());
        Ok(())
    }
}

/// Marker line written when a record reaches the per-record budget;
/// everything rendered before it is kept.
const TRUNCATION_MARK: &str = "  ... (truncated)\n";

/// Render one probe report in the log's line-oriented format:
///
/// ```text
/// --------------------------------------------------
/// PROBE REPORT: 01/01 00:00:42
/// Device:  Thermo Beacon
/// Address: aa:bb:cc:dd:ee:ff
/// Outcome: success (3120 ms)
/// Services Found:
///   + Service: 0x180f (Battery Service)
///       - Char: 0x2a19 [RN]
/// ```
///
/// The header always fits.  Service and characteristic lines are
/// added while they fit the record budget; past that the record ends
/// with a truncation marker instead of failing, so every finalized
/// report reaches the log.
pub fn format_record(
    clock: &Clock,
    report: &ProbeReport,
) -> Result<String<MAX_LOG_RECORD>, StorageError> {
    let mut out: String<MAX_LOG_RECORD> = String::new();
    render(&mut out, clock, report).map_err(|_| {
        error!("log record overflow for {}", report.addr.to_hex());
        StorageError::RecordTooLarge
    })?;
    Ok(out)
}

fn render(
    out: &mut String<MAX_LOG_RECORD>,
    clock: &Clock,
    report: &ProbeReport,
) -> core::fmt::Result {
    writeln!(out, "--------------------------------------------------")?;
    writeln!(out, "PROBE REPORT: {}", clock.format(report.captured_at_ms))?;
    writeln!(
        out,
        "Device:  {}",
        if report.name.is_empty() {
            "Unknown"
        } else {
            report.name.as_str()
        }
    )?;
    writeln!(out, "Address: {}", report.addr.to_hex())?;
    writeln!(
        out,
        "Outcome: {} ({} ms)",
        report.outcome.as_str(),
        report.elapsed_ms
    )?;
    writeln!(out, "Services Found:")?;

    // Longest line: 14-char prefix + 36-char UUID + props + newline.
    let mut line: String<96> = String::new();
    for service in &report.services {
        line.clear();
        match service_name(&service.uuid) {
            Some(name) => writeln!(&mut line, "  + Service: {} ({})", service.uuid, name)?,
            None => writeln!(&mut line, "  + Service: {}", service.uuid)?,
        }
        if !push_line(out, &line) {
            return finish_truncated(out);
        }
        for ch in &service.characteristics {
            line.clear();
            writeln!(&mut line, "      - Char: {} [{}]", ch.uuid, ch.props.letters())?;
            if !push_line(out, &line) {
                return finish_truncated(out);
            }
        }
    }
    writeln!(out)?;
    Ok(())
}

/// Append `line` only if the truncation marker and the blank-line
/// terminator would still fit afterwards.
fn push_line(out: &mut String<MAX_LOG_RECORD>, line: &str) -> bool {
    if out.len() + line.len() + TRUNCATION_MARK.len() + 1 > MAX_LOG_RECORD {
        return false;
    }
    out.push_str(line).is_ok()
}

fn finish_truncated(out: &mut String<MAX_LOG_RECORD>) -> core::fmt::Result {
    out.push_str(TRUNCATION_MARK).map_err(|_| core::fmt::Error)?;
    out.push('\n').map_err(|_| core::fmt::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{Addr, AddrKind, CharProps, Characteristic, ProbeOutcome, ServiceRecord, Uuid};
    use embassy_futures::block_on;

    fn sighting(last: u8, name: &str, rssi: i8, ts: u64) -> Sighting {
        let mut n = heapless::String::new();
        let _ = n.push_str(name);
        Sighting {
            addr: Addr::new(AddrKind::Public, [last, 0, 0, 0, 0, 0]),
            name: n,
            rssi,
            last_seen_ms: ts,
        }
    }

    fn report(outcome: ProbeOutcome) -> ProbeReport {
        let mut name = heapless::String::new();
        let _ = name.push_str("Thermo Beacon");
        let mut chars = heapless::Vec::new();
        let _ = chars.push(Characteristic {
            uuid: Uuid::Short(0x2a19),
            props: CharProps(CharProps::READ | CharProps::NOTIFY),
        });
        let mut services = heapless::Vec::new();
        let _ = services.push(ServiceRecord {
            uuid: Uuid::Short(0x180f),
            characteristics: chars,
        });
        ProbeReport {
            addr: Addr::new(AddrKind::Public, [0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa]),
            name,
            outcome,
            services,
            captured_at_ms: 42_000,
            elapsed_ms: 3_120,
        }
    }

    #[test]
    fn upsert_never_duplicates() {
        let mut store = ResultStore::new();
        store.record_sighting(&sighting(1, "a", -60, 10));
        store.record_sighting(&sighting(1, "a", -40, 20));
        store.record_sighting(&sighting(2, "b", -50, 30));
        assert_eq!(store.current_snapshot().len(), 2);
        assert_eq!(store.current_snapshot()[0].rssi, -40);
        assert_eq!(store.current_snapshot()[0].last_seen_ms, 20);
    }

    #[test]
    fn late_name_fills_in() {
        let mut store = ResultStore::new();
        store.record_sighting(&sighting(1, "", -60, 10));
        store.record_sighting(&sighting(1, "Found You", -55, 11));
        assert_eq!(store.current_snapshot()[0].name.as_str(), "Found You");
    }

    #[test]
    fn window_clears_table() {
        let mut store = ResultStore::new();
        store.record_sighting(&sighting(1, "a", -60, 10));
        store.begin_window();
        assert!(store.current_snapshot().is_empty());
    }

    #[test]
    fn report_ring_evicts_oldest() {
        let mut store = ResultStore::new();
        for i in 0..(MAX_REPORTS + 2) {
            let mut r = report(ProbeOutcome::Success);
            r.captured_at_ms = i as u64;
            store.record_report(&r);
        }
        assert_eq!(store.reports().len(), MAX_REPORTS);
        assert_eq!(store.reports()[0].captured_at_ms, 2);
        assert_eq!(store.latest_report().unwrap().captured_at_ms, (MAX_REPORTS + 1) as u64);
    }

    #[test]
    fn record_format_golden() {
        let mut clock = Clock::new();
        clock.set_time(1_704_067_200, 0); // 2024-01-01T00:00:00Z
        let record = format_record(&clock, &report(ProbeOutcome::Success)).unwrap();
        let expected = "--------------------------------------------------\n\
                        PROBE REPORT: 01/01 00:00:42\n\
                        Device:  Thermo Beacon\n\
                        Address: aa:bb:cc:dd:ee:ff\n\
                        Outcome: success (3120 ms)\n\
                        Services Found:\n\
                        \x20 + Service: 0x180f (Battery Service)\n\
                        \x20     - Char: 0x2a19 [RN]\n\n";
        assert_eq!(record.as_str(), expected);
    }

    /// A report saturating every capacity: MAX_SERVICES services with
    /// MAX_CHARACTERISTICS characteristics each.
    fn saturated_report(uuid_of: impl Fn(usize) -> Uuid) -> ProbeReport {
        let mut services = heapless::Vec::new();
        for s in 0..crate::config::MAX_SERVICES {
            let mut chars = heapless::Vec::new();
            for c in 0..crate::config::MAX_CHARACTERISTICS {
                let _ = chars.push(Characteristic {
                    uuid: uuid_of(s * 100 + c),
                    props: CharProps(CharProps::READ | CharProps::WRITE | CharProps::NOTIFY),
                });
            }
            let _ = services.push(ServiceRecord {
                uuid: uuid_of(s),
                characteristics: chars,
            });
        }
        let mut name = heapless::String::new();
        let _ = name.push_str("Saturated Peripheral With Name32");
        ProbeReport {
            addr: Addr::new(AddrKind::Public, [0xff; 6]),
            name,
            outcome: ProbeOutcome::Success,
            services,
            captured_at_ms: u64::MAX / 2,
            elapsed_ms: u32::MAX,
        }
    }

    #[test]
    fn saturated_report_renders_without_truncation() {
        let report = saturated_report(|i| Uuid::Short(i as u16));
        let record = format_record(&Clock::new(), &report).unwrap();
        assert!(!record.as_str().contains("(truncated)"));
        assert!(record.as_str().ends_with("\n\n"));
        assert_eq!(
            record.as_str().matches("- Char:").count(),
            crate::config::MAX_SERVICES * crate::config::MAX_CHARACTERISTICS
        );
    }

    #[test]
    fn oversize_report_truncated_not_dropped() {
        // 128-bit UUIDs everywhere blow past the record budget; the
        // record must still append, header intact, marker at the end.
        let report = saturated_report(|i| {
            let mut b = [0u8; 16];
            b[0] = i as u8;
            b[15] = (i >> 8) as u8;
            Uuid::Long(b)
        });
        let record = format_record(&Clock::new(), &report).unwrap();
        assert!(record.len() <= MAX_LOG_RECORD);
        assert!(record.as_str().starts_with("---"));
        assert!(record.as_str().contains("Device:  Saturated Peripheral"));
        assert!(record.as_str().contains("+ Service:"));
        assert!(record.as_str().ends_with("  ... (truncated)\n\n"));
    }

    #[test]
    fn failed_outcome_rendered() {
        let clock = Clock::new();
        let record = format_record(&clock, &report(ProbeOutcome::EnumerationFailed)).unwrap();
        assert!(record.as_str().contains("Outcome: enum-failed"));
        assert!(record.as_str().contains("PROBE REPORT: +42s"));
    }

    struct MemSink(std::vec::Vec<std::vec::Vec<u8>>);

    impl LogSink for MemSink {
        async fn append(&mut self, record: &[u8]) -> Result<(), StorageError> {
            self.0.push(record.to_vec());
            Ok(())
        }
    }

    #[test]
    fn append_writes_one_record_per_report() {
        let store = ResultStore::new();
        let clock = Clock::new();
        let mut sink = MemSink(std::vec::Vec::new());
        block_on(store.append_to_log(&mut sink, &clock, &report(ProbeOutcome::Success))).unwrap();
        block_on(store.append_to_log(&mut sink, &clock, &report(ProbeOutcome::Timeout))).unwrap();
        assert_eq!(sink.0.len(), 2);
        assert!(core::str::from_utf8(&sink.0[0]).unwrap().starts_with("---"));
    }
}
