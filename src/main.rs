//! Firmware for the adaptive headlight controller.
//!
//! # Overview
//!
//! This firmware runs the headlight controller on an STM32F103C8 board:
//! - Three PWM lamps (high beam, low beam, fog light)
//! - Four keys for mode changes, manual lamp control and threshold editing
//! - Wheel encoder, photoresistor and ultrasonic ranger as sensor inputs
//! - One flash page holding the four decision thresholds
//!
//! # Runtime Structure
//!
//! Background tasks scan the keys every millisecond, count encoder pulses
//! and publish light and distance readings. The main loop runs every 20 ms:
//! it derives the vehicle speed, collects the latest readings, runs one
//! [`Controller::update`] and pushes changed screen rows out over defmt.
//!
//! # Module Organization
//!
//! - [`hardware`] - Pin mappings and peripheral initialization
//! - [`tasks`] - Background tasks and shared state

#![no_std]
#![no_main]

mod hardware;
mod tasks;

use embassy_executor::Spawner;
use embassy_stm32::{
    Config, adc, bind_interrupts, peripherals,
    rcc::{
        ADCPrescaler, AHBPrescaler, APBPrescaler, Hse, HseMode, Pll, PllMul, PllPreDiv,
        PllSource, Sysclk,
    },
    time::Hertz,
};
use embassy_time::{Instant, Timer};
use portable_atomic::Ordering;
use {defmt_rtt as _, panic_probe as _};

use adaptive_headlights::sensors::SpeedEstimator;
use adaptive_headlights::{Banner, Controller, Environment, FrameBuffer};

use hardware::Peripherals;
use tasks::{
    CLIMATE, DISTANCE, KEYPAD, LIGHT, WHEEL_PULSES, key_scan_task, light_task, range_task,
    wheel_pulse_task,
};

bind_interrupts!(struct Irqs {
    ADC1_2 => adc::InterruptHandler<peripherals::ADC1>;
});

/// Main loop period in milliseconds.
const LOOP_INTERVAL_MS: u64 = 20;

/// Creates the clock configuration for the STM32F103.
///
/// # Clock Settings
///
/// - **HSE**: 8 MHz crystal
/// - **PLL**: HSE x 9 = 72 MHz system clock
/// - **APB1**: 36 MHz (its maximum), **APB2**: 72 MHz
/// - **ADC**: APB2 / 6 = 12 MHz, below the 14 MHz limit
///
/// # Returns
///
/// Configured RCC settings for embassy-stm32 initialization
fn create_clock_config() -> embassy_stm32::rcc::Config {
    let mut rcc = embassy_stm32::rcc::Config::default();
    rcc.hse = Some(Hse {
        freq: Hertz::mhz(8),
        mode: HseMode::Oscillator,
    });
    rcc.pll = Some(Pll {
        src: PllSource::HSE,
        prediv: PllPreDiv::DIV1,
        mul: PllMul::MUL9,
    });
    rcc.sys = Sysclk::PLL1_P;
    rcc.ahb_pre = AHBPrescaler::DIV1;
    rcc.apb1_pre = APBPrescaler::DIV2;
    rcc.apb2_pre = APBPrescaler::DIV1;
    rcc.adc_pre = ADCPrescaler::DIV6;
    rcc
}

/// Milliseconds since boot, wrapping after ~49 days.
fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}

/// Main entry point for the headlight controller firmware.
///
/// # Initialization Sequence
///
/// 1. Configure clocks (72 MHz from the 8 MHz crystal)
/// 2. Initialize STM32 peripherals
/// 3. Load thresholds from flash and switch all lamps off
/// 4. Spawn key, encoder and sensor tasks
/// 5. Show the start-up banner and enter the control loop
///
/// # Main Loop
///
/// Every 20 ms: speed estimate, latest sensor readings, one controller
/// update, screen flush and status LED.
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = Config::default();
    config.rcc = create_clock_config();

    let p = embassy_stm32::init(config);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Adaptive headlight controller starting...");

    let Peripherals {
        keys,
        lamps,
        light,
        ranger,
        wheel,
        flash,
        mut status_led,
    } = Peripherals::new(p);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Loading thresholds...");

    let mut controller = Controller::new(lamps, FrameBuffer::new(), flash);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Spawning tasks...");

    spawner.spawn(key_scan_task(keys).unwrap());
    spawner.spawn(wheel_pulse_task(wheel).unwrap());
    spawner.spawn(light_task(light).unwrap());
    spawner.spawn(range_task(ranger).unwrap());

    let mut env = Environment::default();
    let mut speed = SpeedEstimator::new(WHEEL_PULSES.load(Ordering::Relaxed), now_ms());
    let mut last_led_ms = now_ms();

    controller.show_banner(Banner::SYSTEM_READY, now_ms());

    #[cfg(feature = "debug-mode")]
    defmt::info!("Entering control loop...");

    loop {
        let now = now_ms();

        env.speed = speed.update(WHEEL_PULSES.load(Ordering::Relaxed), now);
        if let Some(light) = LIGHT.try_take() {
            env.light = light;
        }
        if let Some(distance) = DISTANCE.try_take() {
            env.distance = distance;
        }
        if let Some(climate) = CLIMATE.try_take() {
            env.temperature = climate.temperature;
            env.humidity = climate.humidity;
        }

        KEYPAD.lock(|pad| controller.update(&env, &mut *pad.borrow_mut(), now));

        controller
            .display_mut()
            .flush_dirty(|row, text| defmt::println!("row {=usize} |{=str}|", row, text));

        if now.wrapping_sub(last_led_ms) >= controller.mode().status_blink_ms() {
            status_led.toggle();
            last_led_ms = now;
        }

        Timer::after_millis(LOOP_INTERVAL_MS).await;
    }
}
