//! ble-prober firmware entry point (nRF52840 + SoftDevice S140).
//!
//! Task layout:
//!   - `softdevice_task` - runs the SoftDevice event loop.
//!   - `led_task`        - renders the status signal on the board LED.
//!   - main loop         - owns the probe engine, result store, clock
//!     and flash log; drains the request channel at step boundaries.
//!
//! The request channel is the seam for the dashboard transport (UART
//! or network bridge): it posts [`Request`] values in and reads
//! snapshots back through `facade::serialize_snapshot`.

#![no_std]
#![no_main]

use defmt::{info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::Pin;
use embassy_nrf::interrupt::Priority;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};
use nrf_softdevice::{raw, Flash, Softdevice};
use panic_probe as _;
use static_cell::StaticCell;

use ble_prober::ble::softdevice::SoftRadio;
use ble_prober::clock::Clock;
use ble_prober::config::EngineConfig;
use ble_prober::flashlog::FlashLog;
use ble_prober::led::{led_task, StatusLine};
use ble_prober::{Command, EngineState, ProbeEngine, Request, ResultStore, StatusEmitter};

/// Requests posted by the dashboard transport, drained by the engine
/// loop at state-transition boundaries.
static REQUESTS: Channel<CriticalSectionRawMutex, Request, 4> = Channel::new();

/// Engine state for the LED task.
static STATUS_LINE: StatusLine = StatusLine::new();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 256 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: b"ble-prober" as *const u8 as _,
            current_len: 10,
            max_len: 10,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut nrf_config = embassy_nrf::config::Config::default();
    // The SoftDevice reserves the two highest interrupt priorities.
    nrf_config.gpiote_interrupt_priority = Priority::P2;
    nrf_config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(nrf_config);

    let sd_config = softdevice_config();
    let sd = Softdevice::enable(&sd_config);
    unwrap!(spawner.spawn(softdevice_task(sd)));
    unwrap!(spawner.spawn(led_task(p.P0_06.degrade(), &STATUS_LINE)));

    static FLASH_LOG: StaticCell<FlashLog<Flash>> = StaticCell::new();
    let flash_log = FLASH_LOG.init(FlashLog::new(Flash::take(sd)));

    let mut engine = ProbeEngine::new(SoftRadio::new(sd), EngineConfig::default());
    let mut store = ResultStore::new();
    let mut clock = Clock::new();
    let mut emitter = StatusEmitter::new();

    info!("ble-prober up, free-running survey starting");

    loop {
        while let Ok(req) = REQUESTS.try_receive() {
            match req {
                Request::Engine(cmd) => engine.submit(cmd),
                Request::SetTime { epoch_secs } => {
                    clock.set_time(epoch_secs, Instant::now().as_millis());
                    info!("clock synced");
                }
            }
        }

        let report = engine.step(&mut store).await;

        if let Some(signal) = emitter.update(engine.state()) {
            STATUS_LINE.signal(signal);
        }

        if let Some(report) = report {
            if let Err(e) = store.append_to_log(flash_log, &clock, &report).await {
                warn!("probe log append failed: {:?}", e);
            }
        }

        match engine.state() {
            EngineState::Idle => {
                // Free-running survey: pause between passes, then scan
                // again.  The dashboard can still abort or reset in
                // between.
                Timer::after(Duration::from_secs(2)).await;
                engine.submit(Command::StartScan);
            }
            EngineState::Faulted => {
                // Only a manual Reset request leaves this state; poll
                // slowly for it.
                Timer::after(Duration::from_secs(1)).await;
            }
            _ => {}
        }
    }
}
