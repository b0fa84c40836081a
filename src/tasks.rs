//! Background tasks and the state they share with the control loop.
//!
//! # Tasks
//!
//! - [`key_scan_task`] samples the keys every millisecond and advances the
//!   shared [`KEYPAD`]
//! - [`wheel_pulse_task`] counts encoder edges into [`WHEEL_PULSES`]
//! - [`light_task`] and [`range_task`] publish sensor readings through
//!   signals
//!
//! The control loop only ever reads the latest value of each signal, so a
//! slow sensor never stalls it.

use core::cell::RefCell;

use embassy_stm32::exti::ExtiInput;
use embassy_sync::{
    blocking_mutex::{
        Mutex,
        raw::{CriticalSectionRawMutex, ThreadModeRawMutex},
    },
    signal::Signal,
};
use embassy_time::{Duration, Ticker, Timer};
use portable_atomic::{AtomicU16, Ordering};

use adaptive_headlights::KeyPad;
use adaptive_headlights::sensors::{Burst, Climate, PING_SPACING_MS, RangeAverager};

use crate::hardware::{KeyPins, LightSensor, Ranger};

/// Interval between two light readings.
const LIGHT_INTERVAL_MS: u64 = 100;

/// Key state machine, ticked by [`key_scan_task`] and drained by the control
/// loop. Both run on the thread-mode executor.
pub static KEYPAD: Mutex<ThreadModeRawMutex, RefCell<KeyPad>> =
    Mutex::new(RefCell::new(KeyPad::new()));

/// Free-running wheel encoder edge count.
pub static WHEEL_PULSES: AtomicU16 = AtomicU16::new(0);

/// Latest ambient light percentage.
pub static LIGHT: Signal<CriticalSectionRawMutex, u8> = Signal::new();

/// Latest obstacle distance, `None` after a lost echo.
pub static DISTANCE: Signal<CriticalSectionRawMutex, Option<f32>> = Signal::new();

/// Latest temperature and humidity.
///
/// Nothing in this crate signals it: a climate sensor driver is expected to
/// publish here. Until one does, temperature and humidity read 0, so the
/// humidity rule never lights the fog lamp in Auto.
pub static CLIMATE: Signal<CriticalSectionRawMutex, Climate> = Signal::new();

/// Samples the key pins once per millisecond.
///
/// # Arguments
///
/// * `keys` - The four key inputs
#[embassy_executor::task]
pub async fn key_scan_task(keys: KeyPins) {
    let mut ticker = Ticker::every(Duration::from_millis(1));
    loop {
        let levels = keys.levels();
        KEYPAD.lock(|pad| pad.borrow_mut().tick(levels));
        ticker.next().await;
    }
}

/// Counts falling edges of the wheel encoder.
#[embassy_executor::task]
pub async fn wheel_pulse_task(mut wheel: ExtiInput<'static>) {
    loop {
        wheel.wait_for_falling_edge().await;
        WHEEL_PULSES.fetch_add(1, Ordering::Relaxed);
    }
}

/// Publishes an averaged light reading every [`LIGHT_INTERVAL_MS`].
#[embassy_executor::task]
pub async fn light_task(mut sensor: LightSensor) {
    loop {
        LIGHT.signal(sensor.read_percent().await);
        Timer::after_millis(LIGHT_INTERVAL_MS).await;
    }
}

/// Pings continuously and publishes one distance per burst of echoes.
#[embassy_executor::task]
pub async fn range_task(mut ranger: Ranger) {
    let mut burst = RangeAverager::new();
    loop {
        match burst.push(ranger.echo_us().await) {
            Burst::Pending => {}
            done => {
                #[cfg(feature = "debug-mode")]
                if done == Burst::TimedOut {
                    defmt::warn!("ultrasonic echo lost");
                }
                DISTANCE.signal(done.distance());
            }
        }
        Timer::after_millis(u64::from(PING_SPACING_MS)).await;
    }
}
