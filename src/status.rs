//! Status signal emitter - maps engine state to the indicator signal.
//!
//! Pure mapping plus a last-shown memo so the indicator driver only
//! hears about changes.  What a signal physically looks like (blink
//! cadence, LED pin) is the renderer's business (`led` module on
//! hardware).

use crate::ble::engine::EngineState;

/// The small enumerated signal the indicator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusSignal {
    /// Steady off: nothing happening.
    Off,
    /// Slow blink: scan window open.
    SlowBlink,
    /// Fast blink: actively working a peripheral.
    FastBlink,
    /// Distinct error pattern: resetting or faulted.
    ErrorPattern,
}

/// Engine state → indicator signal.
pub fn signal_for(state: EngineState) -> StatusSignal {
    match state {
        EngineState::Idle => StatusSignal::Off,
        EngineState::Scanning => StatusSignal::SlowBlink,
        EngineState::Selecting
        | EngineState::Connecting
        | EngineState::Probing
        | EngineState::Disconnecting => StatusSignal::FastBlink,
        EngineState::Resetting | EngineState::Faulted => StatusSignal::ErrorPattern,
    }
}

/// Change-detecting wrapper around [`signal_for`].
#[derive(Default)]
pub struct StatusEmitter {
    last: Option<StatusSignal>,
}

impl StatusEmitter {
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Returns the new signal when it differs from the last one shown,
    /// `None` otherwise.
    pub fn update(&mut self, state: EngineState) -> Option<StatusSignal> {
        let signal = signal_for(state);
        if self.last == Some(signal) {
            return None;
        }
        self.last = Some(signal);
        Some(signal)
    }
}
