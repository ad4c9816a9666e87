//! Scan/probe engine - the survey state machine.
//!
//! Drives the scan → select → connect → enumerate → disconnect loop,
//! applies the timeout/retry policy, forwards every outcome to the
//! health monitor, and finalizes one immutable [`ProbeReport`] per
//! probe attempt.
//!
//! The machine is written as one explicit state enum with a single
//! authoritative `state` field and one `step()` call per entry action,
//! so every transition in the table can be unit-tested on the host
//! with a scripted transport.
//!
//! Anti-zombie rule: after each outcome forwarded to the health
//! monitor the engine polls `is_wedged()`; while wedged, every
//! transition that would re-enter Selecting is overridden to
//! Resetting.  Probing still always exits through Disconnecting first,
//! so the cleanup invariant (one disconnect per established link)
//! survives the override.

use heapless::Vec;
use log::{debug, info, warn};

use crate::ble::health::{HealthMonitor, Outcome};
use crate::ble::transport::RadioTransport;
use crate::ble::{Addr, ProbeOutcome, ProbeReport, ServiceRecord, Sighting};
use crate::config::{EngineConfig, MAX_SIGHTINGS};
use crate::error::{ConnectError, EnumerationError};
use crate::facade::Command;
use crate::store::ResultStore;

/// The engine's authoritative state.  Initial: Idle.  No terminal
/// state - the machine loops for the life of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineState {
    Idle,
    Scanning,
    Selecting,
    Connecting,
    Probing,
    Disconnecting,
    Resetting,
    Faulted,
}

/// Per-pass bookkeeping for one sighted peripheral.
struct Candidate {
    sighting: Sighting,
    /// Connect attempts made this pass (timeout/refused only).
    attempts: u8,
    /// A report has been finalized for this candidate.
    probed: bool,
    /// Permanently failed for this pass; no further attempts.
    failed: bool,
}

impl Candidate {
    fn eligible(&self) -> bool {
        !self.probed && !self.failed
    }
}

/// Report under construction, created when a probe attempt begins.
struct Draft {
    addr: Addr,
    name: heapless::String<32>,
    started_ms: u64,
}

impl Draft {
    fn finalize<const N: usize>(
        self,
        outcome: ProbeOutcome,
        services: Vec<ServiceRecord, N>,
        now_ms: u64,
    ) -> ProbeReport {
        ProbeReport {
            addr: self.addr,
            name: self.name,
            outcome,
            services: Vec::from_slice(&services).unwrap_or_default(),
            captured_at_ms: self.started_ms,
            elapsed_ms: now_ms.saturating_sub(self.started_ms) as u32,
        }
    }
}

/// The scan/probe engine.  Exclusively owns the radio transport and
/// the health monitor; the service facade talks to it only through
/// [`ProbeEngine::submit`] and read-only accessors.
pub struct ProbeEngine<R: RadioTransport> {
    radio: R,
    cfg: EngineConfig,
    health: HealthMonitor,
    state: EngineState,
    /// Single-assignment command slot; latest submission wins.
    /// Consumed only at state-transition boundaries.
    pending: Option<Command>,
    candidates: Vec<Candidate, MAX_SIGHTINGS>,
    /// Index of the candidate currently in the connect/probe pipeline.
    cursor: Option<usize>,
    conn: Option<R::Handle>,
    draft: Option<Draft>,
}

impl<R: RadioTransport> ProbeEngine<R> {
    /// `cfg` must satisfy [`EngineConfig::validate`].
    pub fn new(radio: R, cfg: EngineConfig) -> Self {
        debug_assert!(cfg.validate());
        Self {
            radio,
            health: HealthMonitor::new(cfg.wedged_threshold),
            cfg,
            state: EngineState::Idle,
            pending: None,
            candidates: Vec::new(),
            cursor: None,
            conn: None,
            draft: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Read-only transport access, for diagnostics.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Post a command into the pending slot.  Honored at the next
    /// Idle/Selecting/Faulted boundary; mid-operation radio calls are
    /// never interrupted.
    pub fn submit(&mut self, cmd: Command) {
        if self.pending.is_some() {
            debug!("replacing pending command");
        }
        self.pending = Some(cmd);
    }

    /// Execute the entry action of the current state and advance.
    ///
    /// Returns the probe report finalized by this step, if any; the
    /// caller appends it to the persistent log.  The report has
    /// already been recorded in `store`.
    pub async fn step(&mut self, store: &mut ResultStore) -> Option<ProbeReport> {
        match self.state {
            EngineState::Idle => {
                self.enter_idle();
                None
            }
            EngineState::Scanning => {
                self.enter_scanning(store).await;
                None
            }
            EngineState::Selecting => {
                self.enter_selecting();
                None
            }
            EngineState::Connecting => self.enter_connecting(store).await,
            EngineState::Probing => self.enter_probing(store).await,
            EngineState::Disconnecting => {
                self.enter_disconnecting().await;
                None
            }
            EngineState::Resetting => {
                self.enter_resetting().await;
                None
            }
            EngineState::Faulted => {
                self.enter_faulted();
                None
            }
        }
    }

    fn enter_idle(&mut self) {
        match self.pending.take() {
            Some(Command::StartScan) => {
                self.state = EngineState::Scanning;
            }
            Some(Command::ProbeOne(addr)) => {
                if self.rearm_candidate(&addr) {
                    info!("re-probing {}", addr.to_hex());
                    self.state = EngineState::Connecting;
                } else {
                    warn!("probe target {} not in sighting table", addr.to_hex());
                }
            }
            Some(Command::Abort) | None => {}
            Some(Command::Reset) => {
                debug!("reset command ignored outside Faulted");
            }
        }
    }

    /// Re-arm a previously sighted target for another probe attempt.
    /// Matched by address bytes; the stored sighting supplies the GAP
    /// kind.  Returns false when the address was never sighted.
    fn rearm_candidate(&mut self, addr: &Addr) -> bool {
        match self
            .candidates
            .iter_mut()
            .enumerate()
            .find(|(_, c)| c.sighting.addr.bytes == addr.bytes)
        {
            Some((i, cand)) => {
                cand.attempts = 0;
                cand.probed = false;
                cand.failed = false;
                self.cursor = Some(i);
                true
            }
            None => false,
        }
    }

    async fn enter_scanning(&mut self, store: &mut ResultStore) {
        info!(
            "scan starting: {} ms window, floor {} dBm",
            self.cfg.scan_duration_ms, self.cfg.rssi_threshold
        );
        store.begin_window();
        self.candidates.clear();
        self.cursor = None;

        let cfg = self.cfg;
        let candidates = &mut self.candidates;
        let result = self
            .radio
            .scan(cfg.scan_duration_ms, &mut |sighting| {
                Self::accept_sighting(candidates, store, &cfg, sighting);
            })
            .await;

        match result {
            Ok(()) => {
                info!("scan finished: {} targets", self.candidates.len());
                self.state = EngineState::Selecting;
            }
            Err(fault) => {
                warn!("scan failed: radio fault {:#x}", fault.0);
                self.health.record(Outcome::RadioError);
                self.state = EngineState::Resetting;
            }
        }
    }

    /// Scan-callback filter and upsert.  Re-sightings update signal
    /// strength and timestamp in place; a named re-sighting fills in a
    /// previously empty name.
    fn accept_sighting(
        candidates: &mut Vec<Candidate, MAX_SIGHTINGS>,
        store: &mut ResultStore,
        cfg: &EngineConfig,
        sighting: Sighting,
    ) {
        if sighting.rssi < cfg.rssi_threshold {
            return;
        }

        if let Some(existing) = candidates
            .iter_mut()
            .find(|c| c.sighting.addr == sighting.addr)
        {
            if !existing.sighting.is_named() && sighting.is_named() {
                existing.sighting.name = sighting.name.clone();
            }
            existing.sighting.rssi = sighting.rssi;
            existing.sighting.last_seen_ms = sighting.last_seen_ms;
            store.record_sighting(&sighting);
            return;
        }

        if cfg.filter_named_only && !sighting.is_named() {
            return;
        }
        if candidates.is_full() {
            debug!("sighting table full, dropping {}", sighting.addr.to_hex());
            return;
        }

        info!(
            "found {} ({}) rssi {}",
            if sighting.is_named() {
                sighting.name.as_str()
            } else {
                "<unnamed>"
            },
            sighting.addr.to_hex(),
            sighting.rssi
        );
        store.record_sighting(&sighting);
        let _ = candidates.push(Candidate {
            sighting,
            attempts: 0,
            probed: false,
            failed: false,
        });
    }

    fn enter_selecting(&mut self) {
        // Abort is honored here and at Idle only.
        if matches!(self.pending, Some(Command::Abort)) {
            self.pending = None;
            info!("pass aborted");
            self.candidates.clear();
            self.cursor = None;
            self.state = EngineState::Idle;
            return;
        }

        if self.health.is_wedged() {
            warn!("radio wedged, forcing reset");
            self.state = EngineState::Resetting;
            return;
        }

        if let Some(Command::ProbeOne(addr)) = self.pending {
            self.pending = None;
            if self.rearm_candidate(&addr) {
                info!("re-probing {}", addr.to_hex());
                self.state = EngineState::Connecting;
                return;
            }
            warn!("probe target {} not in sighting table", addr.to_hex());
        }

        match self.candidates.iter().position(Candidate::eligible) {
            Some(i) => {
                self.cursor = Some(i);
                self.state = EngineState::Connecting;
            }
            None => {
                info!("pass complete");
                self.cursor = None;
                self.state = EngineState::Idle;
            }
        }
    }

    async fn enter_connecting(&mut self, store: &mut ResultStore) -> Option<ProbeReport> {
        let Some(i) = self.cursor else {
            // No candidate to connect to; re-select.
            self.state = EngineState::Selecting;
            return None;
        };
        let addr = self.candidates[i].sighting.addr;
        let name = self.candidates[i].sighting.name.clone();

        info!("connecting to {}", addr.to_hex());
        self.radio.settle(self.cfg.pre_connect_settle_ms).await;

        let started_ms = self.radio.uptime_ms();
        match self.radio.connect(&addr, self.cfg.connect_timeout_ms).await {
            Ok(handle) => {
                self.health.record(Outcome::Success);
                self.conn = Some(handle);
                self.draft = Some(Draft {
                    addr,
                    name,
                    started_ms,
                });
                // Let the link settle before hammering it with discovery.
                self.radio.settle(self.cfg.post_connect_settle_ms).await;
                self.state = EngineState::Probing;
                None
            }
            Err(err) => {
                let (outcome, report_outcome) = match err {
                    ConnectError::Timeout => (Outcome::Timeout, Some(ProbeOutcome::Timeout)),
                    ConnectError::Refused => (Outcome::Refused, Some(ProbeOutcome::Refused)),
                    ConnectError::Radio(fault) => {
                        warn!("connect radio fault {:#x}", fault.0);
                        (Outcome::RadioError, None)
                    }
                };
                self.health.record(outcome);

                let report = report_outcome.map(|ro| {
                    let draft = Draft {
                        addr,
                        name,
                        started_ms,
                    };
                    draft.finalize::<0>(ro, Vec::new(), self.radio.uptime_ms())
                });

                let cand = &mut self.candidates[i];
                match outcome {
                    Outcome::RadioError => {
                        // Driver faults are never retried on the same target.
                        cand.failed = true;
                        self.cursor = None;
                        self.state = EngineState::Resetting;
                    }
                    _ => {
                        cand.attempts += 1;
                        if cand.attempts > self.cfg.connect_retries {
                            info!("{} permanently failed this pass", addr.to_hex());
                            cand.failed = true;
                            self.cursor = None;
                        }
                        self.state = if self.health.is_wedged() {
                            EngineState::Resetting
                        } else {
                            EngineState::Selecting
                        };
                    }
                }

                if let Some(r) = &report {
                    store.record_report(r);
                }
                report
            }
        }
    }

    async fn enter_probing(&mut self, store: &mut ResultStore) -> Option<ProbeReport> {
        let Some(handle) = self.conn.as_ref() else {
            self.state = EngineState::Selecting;
            return None;
        };
        let Some(draft) = self.draft.take() else {
            self.state = EngineState::Disconnecting;
            return None;
        };

        info!("enumerating services on {}", draft.addr.to_hex());

        let mut services: Vec<ServiceRecord, { crate::config::MAX_SERVICES }> = Vec::new();
        let mut failure: Option<EnumerationError> = None;

        match self.radio.discover_services(handle).await {
            Ok(infos) => {
                for info in &infos {
                    self.radio.settle(self.cfg.enum_pace_ms).await;
                    match self.radio.discover_characteristics(handle, info).await {
                        Ok(chars) => {
                            let mut record = info.into_record();
                            record.characteristics = chars;
                            debug!(
                                "service {}: {} characteristics",
                                record.uuid,
                                record.characteristics.len()
                            );
                            if services.push(record).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }
            Err(err) => failure = Some(err),
        }

        let outcome = match failure {
            None => {
                self.health.record(Outcome::Success);
                ProbeOutcome::Success
            }
            Some(EnumerationError::Enumeration) => {
                // Peripheral-local: does not count toward wedged state.
                warn!("enumeration failed, keeping {} services", services.len());
                ProbeOutcome::EnumerationFailed
            }
            Some(EnumerationError::Radio(fault)) => {
                warn!("enumeration radio fault {:#x}", fault.0);
                self.health.record(Outcome::RadioError);
                ProbeOutcome::EnumerationFailed
            }
        };

        let report = draft.finalize(outcome, services, self.radio.uptime_ms());
        if let Some(i) = self.cursor.take() {
            self.candidates[i].probed = true;
        }
        store.record_report(&report);

        // Cleanup is unconditional: every established link exits
        // through Disconnecting, wedged or not.
        self.state = EngineState::Disconnecting;
        Some(report)
    }

    async fn enter_disconnecting(&mut self) {
        if let Some(handle) = self.conn.take() {
            self.radio.disconnect(handle).await;
            debug!("disconnected");
        }
        self.state = if self.health.is_wedged() {
            EngineState::Resetting
        } else {
            EngineState::Selecting
        };
    }

    async fn enter_resetting(&mut self) {
        warn!("resetting radio stack");
        // Clear all transient pipeline state before touching the radio.
        if let Some(handle) = self.conn.take() {
            self.radio.disconnect(handle).await;
        }
        self.draft = None;
        self.cursor = None;
        self.candidates.clear();

        match self.radio.reset().await {
            Ok(()) => {
                self.health.reset_acknowledged(self.radio.uptime_ms());
                self.radio.settle(self.cfg.reset_cooldown_ms).await;
                info!("radio reset complete");
                self.state = EngineState::Idle;
            }
            Err(err) => {
                warn!("radio reset failed ({:#x}): engine faulted", err.0);
                self.state = EngineState::Faulted;
            }
        }
    }

    fn enter_faulted(&mut self) {
        match self.pending.take() {
            Some(Command::Reset) => {
                info!("manual reset accepted");
                self.state = EngineState::Resetting;
            }
            Some(cmd) => {
                warn!("{:?} ignored while faulted", cmd);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::ServiceInfo;
    use crate::ble::{AddrKind, CharProps, Characteristic, Uuid};
    use crate::error::{RadioFault, ResetError};
    use embassy_futures::block_on;

    fn addr(last: u8) -> Addr {
        Addr::new(AddrKind::Public, [last, 0, 0, 0, 0, 0])
    }

    fn named(addr_last: u8, name: &str, rssi: i8) -> Sighting {
        let mut n = heapless::String::new();
        let _ = n.push_str(name);
        Sighting {
            addr: addr(addr_last),
            name: n,
            rssi,
            last_seen_ms: 0,
        }
    }

    /// Scripted transport: fixed advertisement set, per-call connect
    /// results, optional characteristic failure index.
    struct MockRadio {
        uptime: u64,
        adverts: std::vec::Vec<Sighting>,
        scan_fault: Option<RadioFault>,
        connect_script: std::collections::VecDeque<Result<(), ConnectError>>,
        services: std::vec::Vec<ServiceInfo>,
        discover_fault: Option<EnumerationError>,
        /// Characteristic discovery fails once this many services
        /// have been enumerated.
        char_fail_after: Option<usize>,
        char_fail_kind: EnumerationError,
        reset_fails: bool,
        connects: usize,
        disconnects: usize,
        resets: usize,
    }

    impl MockRadio {
        fn new() -> Self {
            Self {
                uptime: 0,
                adverts: std::vec::Vec::new(),
                scan_fault: None,
                connect_script: std::collections::VecDeque::new(),
                services: std::vec::Vec::new(),
                discover_fault: None,
                char_fail_after: None,
                char_fail_kind: EnumerationError::Enumeration,
                reset_fails: false,
                connects: 0,
                disconnects: 0,
                resets: 0,
            }
        }

        fn with_services(mut self, uuids: &[u16]) -> Self {
            self.services = uuids
                .iter()
                .enumerate()
                .map(|(i, u)| ServiceInfo {
                    uuid: Uuid::Short(*u),
                    handle_start: (i * 4 + 1) as u16,
                    handle_end: (i * 4 + 4) as u16,
                })
                .collect();
            self
        }
    }

    impl RadioTransport for MockRadio {
        type Handle = u8;

        async fn scan(
            &mut self,
            _duration_ms: u32,
            on_sighting: &mut dyn FnMut(Sighting),
        ) -> Result<(), RadioFault> {
            if let Some(fault) = self.scan_fault {
                return Err(fault);
            }
            for s in &self.adverts {
                on_sighting(s.clone());
            }
            self.uptime += 10;
            Ok(())
        }

        async fn connect(
            &mut self,
            _addr: &Addr,
            _timeout_ms: u32,
        ) -> Result<u8, ConnectError> {
            self.uptime += 5;
            match self.connect_script.pop_front().unwrap_or(Ok(())) {
                Ok(()) => {
                    self.connects += 1;
                    Ok(self.connects as u8)
                }
                Err(e) => Err(e),
            }
        }

        async fn discover_services(
            &mut self,
            _handle: &u8,
        ) -> Result<Vec<ServiceInfo, { crate::config::MAX_SERVICES }>, EnumerationError> {
            if let Some(err) = self.discover_fault {
                return Err(err);
            }
            let mut out = Vec::new();
            for s in &self.services {
                let _ = out.push(*s);
            }
            Ok(out)
        }

        async fn discover_characteristics(
            &mut self,
            _handle: &u8,
            service: &ServiceInfo,
        ) -> Result<Vec<Characteristic, { crate::config::MAX_CHARACTERISTICS }>, EnumerationError>
        {
            let index = self
                .services
                .iter()
                .position(|s| s.handle_start == service.handle_start)
                .unwrap_or(0);
            if let Some(limit) = self.char_fail_after {
                if index >= limit {
                    return Err(self.char_fail_kind);
                }
            }
            let mut out = Vec::new();
            let _ = out.push(Characteristic {
                uuid: Uuid::Short(0x2a00 + index as u16),
                props: CharProps(CharProps::READ),
            });
            Ok(out)
        }

        async fn disconnect(&mut self, _handle: u8) {
            self.disconnects += 1;
        }

        async fn reset(&mut self) -> Result<(), ResetError> {
            self.resets += 1;
            if self.reset_fails {
                Err(ResetError(1))
            } else {
                Ok(())
            }
        }

        async fn settle(&mut self, ms: u32) {
            self.uptime += ms as u64;
        }

        fn uptime_ms(&self) -> u64 {
            self.uptime
        }
    }

    fn engine_with(radio: MockRadio) -> ProbeEngine<MockRadio> {
        ProbeEngine::new(radio, EngineConfig::default())
    }

    /// Step until the engine returns to Idle (or the limit trips).
    fn run_pass(
        engine: &mut ProbeEngine<MockRadio>,
        store: &mut ResultStore,
    ) -> std::vec::Vec<ProbeReport> {
        let mut reports = std::vec::Vec::new();
        engine.submit(Command::StartScan);
        block_on(engine.step(store));
        assert_eq!(engine.state(), EngineState::Scanning);
        for _ in 0..200 {
            if let Some(r) = block_on(engine.step(store)) {
                reports.push(r);
            }
            if engine.state() == EngineState::Idle || engine.state() == EngineState::Faulted {
                break;
            }
        }
        reports
    }

    #[test]
    fn idle_waits_for_scan_command() {
        let mut engine = engine_with(MockRadio::new());
        let mut store = ResultStore::new();
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Idle);
        engine.submit(Command::StartScan);
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Scanning);
    }

    #[test]
    fn empty_scan_returns_to_idle() {
        let mut engine = engine_with(MockRadio::new());
        let mut store = ResultStore::new();
        let reports = run_pass(&mut engine, &mut store);
        assert!(reports.is_empty());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn successful_probe_pipeline() {
        let mut radio = MockRadio::new().with_services(&[0x1800, 0x180f]);
        radio.adverts.push(named(1, "sensor", -40));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        let reports = run_pass(&mut engine, &mut store);
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.outcome, ProbeOutcome::Success);
        assert_eq!(r.services.len(), 2);
        assert_eq!(r.name.as_str(), "sensor");
        assert_eq!(engine.radio.connects, engine.radio.disconnects);
    }

    #[test]
    fn timeout_retried_once_then_permanent() {
        // Scenario B: two timeouts on the same candidate; no reset.
        let mut radio = MockRadio::new();
        radio.adverts.push(named(1, "flaky", -50));
        radio.connect_script.push_back(Err(ConnectError::Timeout));
        radio.connect_script.push_back(Err(ConnectError::Timeout));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        let reports = run_pass(&mut engine, &mut store);
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == ProbeOutcome::Timeout));
        assert_eq!(engine.radio.resets, 0);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn partial_enumeration_keeps_discovered_services() {
        // Scenario C: 3 services, characteristic discovery dies on the third.
        let mut radio = MockRadio::new().with_services(&[0x1800, 0x1801, 0x180f]);
        radio.adverts.push(named(1, "half", -50));
        radio.char_fail_after = Some(2);
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        let reports = run_pass(&mut engine, &mut store);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, ProbeOutcome::EnumerationFailed);
        assert_eq!(reports[0].services.len(), 2);
        // Cleanup still ran.
        assert_eq!(engine.radio.disconnects, 1);
        // Peripheral-local failure: no health debit.
        assert_eq!(engine.health().consecutive_failures(), 0);
    }

    #[test]
    fn enumeration_radio_fault_debits_health_and_resets_after_cleanup() {
        // A driver fault mid-discovery wedges a threshold-1 monitor;
        // the link is still torn down before the reset happens.
        let mut radio = MockRadio::new().with_services(&[0x1800, 0x180f]);
        radio.adverts.push(named(1, "glitch", -50));
        radio.char_fail_after = Some(1);
        radio.char_fail_kind = EnumerationError::Radio(RadioFault(0x3002));
        let mut cfg = EngineConfig::default();
        cfg.wedged_threshold = 1;
        let mut engine = ProbeEngine::new(radio, cfg);
        let mut store = ResultStore::new();

        let reports = run_pass(&mut engine, &mut store);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, ProbeOutcome::EnumerationFailed);
        assert_eq!(reports[0].services.len(), 1);
        assert_eq!(engine.radio.disconnects, engine.radio.connects);
        assert_eq!(engine.radio.resets, 1);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn reset_ignored_outside_faulted() {
        let mut engine = engine_with(MockRadio::new());
        let mut store = ResultStore::new();

        engine.submit(Command::Reset);
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.radio.resets, 0);
    }

    #[test]
    fn connect_radio_fault_goes_straight_to_reset() {
        let mut radio = MockRadio::new();
        radio.adverts.push(named(1, "dead", -50));
        radio
            .connect_script
            .push_back(Err(ConnectError::Radio(RadioFault(0x3004))));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        engine.submit(Command::StartScan);
        block_on(engine.step(&mut store)); // Idle -> Scanning
        block_on(engine.step(&mut store)); // scan -> Selecting
        block_on(engine.step(&mut store)); // -> Connecting
        let report = block_on(engine.step(&mut store)); // connect fails
        assert!(report.is_none());
        assert_eq!(engine.state(), EngineState::Resetting);
        block_on(engine.step(&mut store)); // reset -> Idle
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.radio.resets, 1);
        assert!(!engine.health().is_wedged());
    }

    #[test]
    fn wedged_monitor_forces_reset_between_candidates() {
        // Three candidates, every connect times out with retries off:
        // the third failure wedges the monitor and the machine must
        // escape to Resetting instead of looping in Selecting.
        let mut radio = MockRadio::new();
        for i in 1..=3 {
            radio.adverts.push(named(i, "t", -50));
        }
        for _ in 0..6 {
            radio.connect_script.push_back(Err(ConnectError::Timeout));
        }
        let mut cfg = EngineConfig::default();
        cfg.connect_retries = 0;
        let mut engine = ProbeEngine::new(radio, cfg);
        let mut store = ResultStore::new();

        let _ = run_pass(&mut engine, &mut store);
        assert_eq!(engine.radio.resets, 1);
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(!engine.health().is_wedged());
    }

    #[test]
    fn scan_radio_fault_resets() {
        let mut radio = MockRadio::new();
        radio.scan_fault = Some(RadioFault(7));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        engine.submit(Command::StartScan);
        block_on(engine.step(&mut store));
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Resetting);
    }

    #[test]
    fn reset_failure_faults_and_only_manual_reset_recovers() {
        // Scenario D.
        let mut radio = MockRadio::new();
        radio.scan_fault = Some(RadioFault(7));
        radio.reset_fails = true;
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        engine.submit(Command::StartScan);
        block_on(engine.step(&mut store)); // -> Scanning
        block_on(engine.step(&mut store)); // -> Resetting
        block_on(engine.step(&mut store)); // reset fails -> Faulted
        assert_eq!(engine.state(), EngineState::Faulted);

        engine.submit(Command::Abort);
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Faulted);

        engine.submit(Command::StartScan);
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Faulted);

        engine.radio.reset_fails = false;
        engine.submit(Command::Reset);
        block_on(engine.step(&mut store)); // -> Resetting
        assert_eq!(engine.state(), EngineState::Resetting);
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn abort_honored_at_selecting_boundary() {
        let mut radio = MockRadio::new().with_services(&[0x1800]);
        radio.adverts.push(named(1, "a", -50));
        radio.adverts.push(named(2, "b", -50));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        engine.submit(Command::StartScan);
        block_on(engine.step(&mut store)); // -> Scanning
        block_on(engine.step(&mut store)); // -> Selecting
        engine.submit(Command::Abort);
        block_on(engine.step(&mut store)); // Abort consumed at Selecting
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.radio.connects, 0);
    }

    #[test]
    fn resighting_does_not_duplicate() {
        let mut radio = MockRadio::new().with_services(&[0x1800]);
        radio.adverts.push(named(1, "dup", -60));
        radio.adverts.push(named(1, "dup", -40));
        radio.adverts.push(named(1, "dup", -45));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        let reports = run_pass(&mut engine, &mut store);
        // One candidate, one probe.
        assert_eq!(reports.len(), 1);
        assert_eq!(store.current_snapshot().len(), 1);
        assert_eq!(store.current_snapshot()[0].rssi, -45);
    }

    #[test]
    fn named_only_filter_drops_unnamed() {
        let mut radio = MockRadio::new();
        radio.adverts.push(named(1, "", -40));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        let reports = run_pass(&mut engine, &mut store);
        assert!(reports.is_empty());
        assert!(store.current_snapshot().is_empty());
    }

    #[test]
    fn weak_signal_filtered() {
        let mut radio = MockRadio::new();
        radio.adverts.push(named(1, "far", -95));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        let reports = run_pass(&mut engine, &mut store);
        assert!(reports.is_empty());
    }

    #[test]
    fn probe_one_rearms_previous_target() {
        let mut radio = MockRadio::new().with_services(&[0x180f]);
        radio.adverts.push(named(1, "again", -50));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        let first = run_pass(&mut engine, &mut store);
        assert_eq!(first.len(), 1);

        // Targeted re-probe without a new scan pass.
        engine.submit(Command::ProbeOne(addr(1)));
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Connecting);
        let mut reports = std::vec::Vec::new();
        for _ in 0..20 {
            if let Some(r) = block_on(engine.step(&mut store)) {
                reports.push(r);
            }
            if engine.state() == EngineState::Idle {
                break;
            }
        }
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, ProbeOutcome::Success);
        assert_eq!(reports[0].addr, addr(1));
        assert_eq!(engine.radio.connects, 2);
        assert_eq!(engine.radio.connects, engine.radio.disconnects);
    }

    #[test]
    fn probe_one_unknown_target_ignored() {
        let mut radio = MockRadio::new().with_services(&[0x180f]);
        radio.adverts.push(named(1, "known", -50));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();
        let _ = run_pass(&mut engine, &mut store);

        engine.submit(Command::ProbeOne(addr(9)));
        block_on(engine.step(&mut store));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.radio.connects, 1);
    }

    #[test]
    fn reports_count_connect_attempts() {
        // One timeout then success on retry: two finalized reports,
        // each finalized exactly once.
        let mut radio = MockRadio::new().with_services(&[0x180f]);
        radio.adverts.push(named(1, "slow", -50));
        radio.connect_script.push_back(Err(ConnectError::Timeout));
        radio.connect_script.push_back(Ok(()));
        let mut engine = engine_with(radio);
        let mut store = ResultStore::new();

        let reports = run_pass(&mut engine, &mut store);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].outcome, ProbeOutcome::Timeout);
        assert_eq!(reports[1].outcome, ProbeOutcome::Success);
        assert_eq!(engine.radio.connects, engine.radio.disconnects);
    }
}
