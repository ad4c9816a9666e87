//! Radio health monitor - the wedged-stack detector.
//!
//! Purely reactive failure accounting: the engine feeds it one
//! [`Outcome`] per radio operation and polls [`HealthMonitor::is_wedged`]
//! after each one.  The monitor never calls back into the engine, which
//! keeps it trivially unit-testable in isolation.
//!
//! The distinction that matters: a **Timeout**/**Refused** means one
//! peripheral is misbehaving, a **RadioError** means the driver itself
//! failed.  Both count toward the wedged threshold (a stack that only
//! ever times out is the classic zombie), but only the caller's retry
//! policy differs between them.

/// Classification of a single radio operation, as fed to [`HealthMonitor::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Any operation that completed normally.
    Success,
    /// Peripheral did not answer in time.
    Timeout,
    /// Peripheral rejected the operation.
    Refused,
    /// Driver/stack-level fault.
    RadioError,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Tracks consecutive failures and decides when the radio is wedged.
///
/// Owned by the engine; everything else reads it through `&`-access.
pub struct HealthMonitor {
    threshold: u8,
    failures: u8,
    last_failure: Option<Outcome>,
    wedged: bool,
    last_reset_ms: u64,
}

impl HealthMonitor {
    /// `threshold` is the number of consecutive non-success outcomes
    /// that flips the wedged flag.  Must be positive.
    pub const fn new(threshold: u8) -> Self {
        Self {
            threshold,
            failures: 0,
            last_failure: None,
            wedged: false,
            last_reset_ms: 0,
        }
    }

    /// Account one operation outcome.
    ///
    /// Any success zeroes the consecutive-failure counter and clears
    /// the wedged flag; any failure increments it and latches the flag
    /// once the threshold is reached.
    pub fn record(&mut self, outcome: Outcome) {
        if outcome.is_success() {
            self.failures = 0;
            self.wedged = false;
            return;
        }

        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(outcome);
        if self.failures >= self.threshold {
            self.wedged = true;
        }
    }

    /// True while the consecutive-failure count has reached the
    /// threshold since the last acknowledged reset.
    pub fn is_wedged(&self) -> bool {
        self.wedged
    }

    /// Called by the engine once a radio reset has been issued.
    /// Clears the failure accounting and stamps the reset time.
    pub fn reset_acknowledged(&mut self, now_ms: u64) {
        self.failures = 0;
        self.last_failure = None;
        self.wedged = false;
        self.last_reset_ms = now_ms;
    }

    pub fn consecutive_failures(&self) -> u8 {
        self.failures
    }

    pub fn last_failure(&self) -> Option<Outcome> {
        self.last_failure
    }

    pub fn last_reset_ms(&self) -> u64 {
        self.last_reset_ms
    }
}
