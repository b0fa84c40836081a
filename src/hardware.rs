//! Hardware abstraction and peripheral initialization.
//!
//! This module defines the pin mappings of the headlight controller board
//! and binds the controller's hardware seams to STM32F103 peripherals.
//!
//! # Pin Assignments
//!
//! ## Lamps (TIM2 PWM, 1 kHz)
//! - **PA1**: TIM2_CH2 - High beam driver
//! - **PA2**: TIM2_CH3 - Low beam driver
//! - **PA3**: TIM2_CH4 - Fog light driver
//!
//! ## Keys (active-low, internal pull-up)
//! - **PB5**: Key1 - Increment / high beam / enter config
//! - **PB6**: Key2 - Decrement / low beam
//! - **PB7**: Key3 - Next parameter / fog light
//! - **PB8**: Key4 - Mode toggle / save config
//!
//! ## Sensors
//! - **PA5**: Wheel encoder output, falling edge per slot (EXTI5)
//! - **PA7**: Photoresistor divider (ADC1_IN7)
//! - **PA8**: Ultrasonic ranger TRIG
//! - **PA9**: Ultrasonic ranger ECHO (EXTI9)
//!
//! ## Status
//! - **PC13**: On-board LED, blinks at a mode dependent rate
//!
//! ## Storage
//! - Flash page at offset `0xF800` (last 1 KiB page of the 64 KiB part)
//!   holds the threshold record

use embassy_stm32::{
    Peri,
    adc::Adc,
    exti::ExtiInput,
    flash::{Blocking, Flash},
    gpio::{AfioRemap, Input, Level, Output, OutputType, Pull, Speed},
    peripherals::{ADC1, PA7, TIM2},
    time::khz,
    timer::{
        Ch2, Ch3, Ch4,
        simple_pwm::{PwmPin, SimplePwm},
    },
};
use embassy_time::{Duration, Instant, Timer, with_timeout};

use adaptive_headlights::keypad::KEY_COUNT;
use adaptive_headlights::sensors::{self, ECHO_TIMEOUT_US, LIGHT_SAMPLES};
use adaptive_headlights::{Lamp, LampOutputs, ParamFlash};

/// Offset of the threshold page from the start of flash.
pub const PARAM_PAGE_OFFSET: u32 = 0xF800;

/// Spacing of the ADC samples averaged into one light reading.
const LIGHT_SAMPLE_SPACING_MS: u64 = 5;

/// Top-level peripheral container for the headlight controller.
pub struct Peripherals {
    /// Key inputs, scanned by the key task
    pub keys: KeyPins,
    /// Lamp PWM outputs
    pub lamps: PwmLamps,
    /// Ambient light sensor
    pub light: LightSensor,
    /// Ultrasonic ranger
    pub ranger: Ranger,
    /// Wheel encoder input
    pub wheel: ExtiInput<'static>,
    /// Threshold storage page
    pub flash: ParamFlash<Flash<'static, Blocking>>,
    /// Status LED (active-low)
    pub status_led: Output<'static>,
}

impl Peripherals {
    /// Initializes all peripherals from STM32 peripheral singleton.
    ///
    /// # Initial GPIO States
    ///
    /// - Lamp PWM channels enabled at 0 % duty
    /// - PA8 (TRIG): Low
    /// - PC13 (status LED): High (off)
    ///
    /// # Arguments
    ///
    /// * `p` - STM32 peripheral singleton from embassy_stm32::init()
    ///
    /// # Returns
    ///
    /// Initialized Peripherals struct ready for use
    pub fn new(p: embassy_stm32::Peripherals) -> Self {
        let high_beam: PwmPin<'_, TIM2, Ch2, AfioRemap<0>> =
            PwmPin::new(p.PA1, OutputType::PushPull);
        let low_beam: PwmPin<'_, TIM2, Ch3, AfioRemap<0>> =
            PwmPin::new(p.PA2, OutputType::PushPull);
        let fog: PwmPin<'_, TIM2, Ch4, AfioRemap<0>> = PwmPin::new(p.PA3, OutputType::PushPull);
        let pwm = SimplePwm::new(
            p.TIM2,
            None,
            Some(high_beam),
            Some(low_beam),
            Some(fog),
            khz(1),
            Default::default(),
        );

        Self {
            keys: KeyPins {
                pins: [
                    Input::new(p.PB5, Pull::Up),
                    Input::new(p.PB6, Pull::Up),
                    Input::new(p.PB7, Pull::Up),
                    Input::new(p.PB8, Pull::Up),
                ],
            },
            lamps: PwmLamps::new(pwm),
            light: LightSensor {
                adc: Adc::new(p.ADC1),
                pin: p.PA7,
            },
            ranger: Ranger {
                trig: Output::new(p.PA8, Level::Low, Speed::Low),
                echo: ExtiInput::new(p.PA9, p.EXTI9, Pull::None),
            },
            wheel: ExtiInput::new(p.PA5, p.EXTI5, Pull::Up),
            flash: ParamFlash::new(Flash::new_blocking(p.FLASH), PARAM_PAGE_OFFSET),
            status_led: Output::new(p.PC13, Level::High, Speed::Low),
        }
    }
}

/// The four key inputs in [`adaptive_headlights::KeyId`] order.
pub struct KeyPins {
    pins: [Input<'static>; KEY_COUNT],
}

impl KeyPins {
    /// Raw pin levels, `true` when high (released).
    pub fn levels(&self) -> [bool; KEY_COUNT] {
        self.pins.each_ref().map(|pin| pin.is_high())
    }
}

/// Lamp drivers on the TIM2 PWM channels.
pub struct PwmLamps {
    pwm: SimplePwm<'static, TIM2>,
}

impl PwmLamps {
    fn new(mut pwm: SimplePwm<'static, TIM2>) -> Self {
        pwm.ch2().enable();
        pwm.ch3().enable();
        pwm.ch4().enable();
        let mut lamps = Self { pwm };
        lamps.all_off();
        lamps
    }
}

impl LampOutputs for PwmLamps {
    fn set_duty(&mut self, lamp: Lamp, duty: u8) {
        let mut channel = match lamp {
            Lamp::HighBeam => self.pwm.ch2(),
            Lamp::LowBeam => self.pwm.ch3(),
            Lamp::Fog => self.pwm.ch4(),
        };
        channel.set_duty_cycle_percent(duty.min(100));
    }
}

/// Photoresistor divider on ADC1.
pub struct LightSensor {
    adc: Adc<'static, ADC1>,
    pin: Peri<'static, PA7>,
}

impl LightSensor {
    /// Averages [`LIGHT_SAMPLES`] conversions into an ambient light
    /// percentage.
    pub async fn read_percent(&mut self) -> u8 {
        let mut samples = [0u16; LIGHT_SAMPLES];
        for sample in samples.iter_mut() {
            *sample = self.adc.read(&mut self.pin).await;
            Timer::after_millis(LIGHT_SAMPLE_SPACING_MS).await;
        }
        sensors::light_percent(sensors::average_counts(&samples))
    }
}

/// Ultrasonic ranger with a trigger output and an echo pulse input.
pub struct Ranger {
    trig: Output<'static>,
    echo: ExtiInput<'static>,
}

impl Ranger {
    /// Sends one ping and measures the echo pulse.
    ///
    /// # Returns
    ///
    /// Echo pulse width in µs, `None` if the echo did not start or end
    /// within [`ECHO_TIMEOUT_US`]
    pub async fn echo_us(&mut self) -> Option<u32> {
        let timeout = Duration::from_micros(u64::from(ECHO_TIMEOUT_US));

        self.trig.set_high();
        Timer::after_micros(20).await;
        self.trig.set_low();

        with_timeout(timeout, self.echo.wait_for_high()).await.ok()?;
        let start = Instant::now();
        with_timeout(timeout, self.echo.wait_for_low()).await.ok()?;

        Some(start.elapsed().as_micros() as u32)
    }
}
