//! Wall-clock bookkeeping for log timestamps.
//!
//! The device has no battery-backed RTC; an external collaborator (the
//! network facade, in practice) supplies a unix epoch reading once and
//! the clock anchors it against the monotonic uptime.  Until that
//! happens, stamps count from boot and are rendered as such.

use core::fmt::Write;

use heapless::String;

const SECS_PER_DAY: u64 = 86_400;

/// Monotonic-uptime to wall-clock mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    /// Unix seconds at uptime zero; `None` until synced.
    anchor_secs: Option<u64>,
}

impl Clock {
    pub const fn new() -> Self {
        Self { anchor_secs: None }
    }

    pub fn is_synced(&self) -> bool {
        self.anchor_secs.is_some()
    }

    /// Anchor the clock: `epoch_secs` is the wall time observed at
    /// uptime `now_ms`.
    pub fn set_time(&mut self, epoch_secs: u64, now_ms: u64) {
        self.anchor_secs = Some(epoch_secs.saturating_sub(now_ms / 1000));
    }

    /// Unix seconds for the given uptime, or seconds-since-boot when
    /// the clock was never synced.
    pub fn stamp(&self, uptime_ms: u64) -> u64 {
        self.anchor_secs.unwrap_or(0) + uptime_ms / 1000
    }

    /// Render an uptime as `MM/DD HH:MM:SS` (log record header form),
    /// or `+SSSSSs` boot-relative when unsynced.
    pub fn format(&self, uptime_ms: u64) -> String<16> {
        let mut s = String::new();
        if self.anchor_secs.is_none() {
            let _ = write!(&mut s, "+{}s", uptime_ms / 1000);
            return s;
        }

        let secs = self.stamp(uptime_ms);
        let (_, month, day) = civil_from_days((secs / SECS_PER_DAY) as i64);
        let tod = secs % SECS_PER_DAY;
        let _ = write!(
            &mut s,
            "{:02}/{:02} {:02}:{:02}:{:02}",
            month,
            day,
            tod / 3600,
            (tod / 60) % 60,
            tod % 60
        );
        s
    }
}

/// Days-since-epoch to (year, month, day), proleptic Gregorian.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
