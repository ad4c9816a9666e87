//! Status LED renderer.
//!
//! Consumes [`StatusSignal`] values from a signal cell and renders
//! them as blink patterns on a single GPIO.  The engine loop publishes
//! a signal only when it changes; the task here keeps replaying the
//! current pattern until the next one arrives.

use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{AnyPin, Level, Output, OutputDrive};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

use crate::config::{LED_ERROR_FLASH_MS, LED_ERROR_GAP_MS, LED_FAST_BLINK_MS, LED_SLOW_BLINK_MS};
use crate::status::StatusSignal;

/// Latest-value cell between the engine loop and the LED task.
pub type StatusLine = Signal<CriticalSectionRawMutex, StatusSignal>;

#[embassy_executor::task]
pub async fn led_task(pin: AnyPin, line: &'static StatusLine) -> ! {
    let mut led = Output::new(pin, Level::Low, OutputDrive::Standard);
    let mut current = StatusSignal::Off;
    loop {
        match select(line.wait(), render(&mut led, current)).await {
            Either::First(next) => current = next,
            Either::Second(never) => match never {},
        }
    }
}

/// Replay one pattern forever; cancelled by the task when a new
/// signal arrives.
async fn render(led: &mut Output<'_>, signal: StatusSignal) -> core::convert::Infallible {
    loop {
        match signal {
            StatusSignal::Off => {
                led.set_low();
                Timer::after(Duration::from_secs(60)).await;
            }
            StatusSignal::SlowBlink => {
                led.set_high();
                Timer::after(Duration::from_millis(LED_SLOW_BLINK_MS)).await;
                led.set_low();
                Timer::after(Duration::from_millis(LED_SLOW_BLINK_MS)).await;
            }
            StatusSignal::FastBlink => {
                led.set_high();
                Timer::after(Duration::from_millis(LED_FAST_BLINK_MS)).await;
                led.set_low();
                Timer::after(Duration::from_millis(LED_FAST_BLINK_MS)).await;
            }
            StatusSignal::ErrorPattern => {
                // Double flash, long gap.
                for _ in 0..2 {
                    led.set_high();
                    Timer::after(Duration::from_millis(LED_ERROR_FLASH_MS)).await;
                    led.set_low();
                    Timer::after(Duration::from_millis(LED_ERROR_FLASH_MS)).await;
                }
                Timer::after(Duration::from_millis(LED_ERROR_GAP_MS)).await;
            }
        }
    }
}
