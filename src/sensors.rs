//! Conversions from raw sensor readings to engineering units.
//!
//! # Sensors
//!
//! | Quantity | Sensor                              | Raw reading              |
//! |----------|-------------------------------------|--------------------------|
//! | Speed    | Slotted wheel, 20 slots, 20 cm rim   | Wrapping pulse counter   |
//! | Light    | Photoresistor in a 10 kOhm divider   | 12-bit ADC, 3.3 V ref    |
//! | Distance | Ultrasonic ranger                    | Echo pulse width, µs     |
//! | Climate  | Temperature / humidity module        | Whole °C and % RH        |

use num_traits::Float;

/// Encoder slots per wheel rotation.
pub const PULSES_PER_ROTATION: u32 = 20;

/// Distance travelled per wheel rotation, cm.
pub const WHEEL_CIRCUMFERENCE_CM: u32 = 20;

/// Upper clamp of the speed estimate, cm/s.
pub const MAX_SPEED_CM_S: u32 = 200;

/// Without pulses for longer than this the vehicle is considered stopped.
pub const ZERO_SPEED_TIMEOUT_MS: u32 = 200;

/// ADC reference voltage.
pub const ADC_VREF: f32 = 3.3;

/// ADC counts at full scale (12 bit).
pub const ADC_FULL_SCALE: f32 = 4096.0;

/// Fixed resistor of the photoresistor divider, ohm.
pub const DIVIDER_OHMS: f32 = 10_000.0;

/// Photoresistor curve: `lux = LUX_SCALE * R ^ LUX_EXPONENT`.
pub const LUX_SCALE: f32 = 40_000.0;
pub const LUX_EXPONENT: f32 = -0.6021;

/// Illuminance mapped to 100 %.
pub const LUX_MAX: u16 = 999;

/// ADC samples averaged per light reading.
pub const LIGHT_SAMPLES: usize = 10;

/// Echoes averaged per distance reading.
pub const RANGE_SAMPLES: usize = 5;

/// Round-trip echo time per cm of distance, µs.
pub const ECHO_US_PER_CM: f32 = 58.0;

/// Longest wait for an echo edge, µs.
pub const ECHO_TIMEOUT_US: u32 = 60_000;

/// Pause between two pings of a burst, ms.
pub const PING_SPACING_MS: u32 = 50;

/// One reading of the climate module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Climate {
    /// °C
    pub temperature: u8,
    /// % RH
    pub humidity: u8,
}

/// Derives vehicle speed from a free-running wheel pulse counter.
///
/// The counter is sampled every control cycle. When pulses arrived since the
/// last reference point, the speed is the distance they represent over the
/// elapsed time and the reference point moves. Without pulses the previous
/// speed is held, and the reference point kept, until
/// [`ZERO_SPEED_TIMEOUT_MS`] elapse; then the speed drops to zero.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    last_pulses: u16,
    last_ms: u32,
    speed: u32,
}

impl SpeedEstimator {
    /// # Arguments
    ///
    /// * `pulses` - Counter value at start-up
    /// * `now_ms` - Current time
    pub fn new(pulses: u16, now_ms: u32) -> Self {
        Self {
            last_pulses: pulses,
            last_ms: now_ms,
            speed: 0,
        }
    }

    /// Feeds one counter sample, returns the speed in cm/s.
    ///
    /// The counter may wrap; deltas use wrapping arithmetic.
    pub fn update(&mut self, pulses: u16, now_ms: u32) -> u32 {
        let elapsed = now_ms.wrapping_sub(self.last_ms);
        let delta = u32::from(pulses.wrapping_sub(self.last_pulses));

        if delta > 0 && elapsed > 0 {
            let distance_cm_x_ppr = delta * WHEEL_CIRCUMFERENCE_CM;
            let speed = distance_cm_x_ppr * 1000 / (PULSES_PER_ROTATION * elapsed);
            self.speed = speed.min(MAX_SPEED_CM_S);
        } else if elapsed > ZERO_SPEED_TIMEOUT_MS {
            self.speed = 0;
        } else {
            return self.speed;
        }

        self.last_pulses = pulses;
        self.last_ms = now_ms;
        self.speed
    }
}

/// Converts an averaged ADC reading of the photoresistor divider to an
/// ambient light percentage.
///
/// Higher counts mean a darker sensor. The reading is turned into the
/// photoresistor's resistance, then into illuminance through its power-law
/// curve, capped at [`LUX_MAX`], and finally scaled to 0..=100 with
/// rounding.
pub fn light_percent(adc: u16) -> u8 {
    let counts = f32::from(adc.min(ADC_FULL_SCALE as u16 - 1));
    let voltage = counts * (ADC_VREF / ADC_FULL_SCALE);
    let resistance = voltage / (ADC_VREF - voltage) * DIVIDER_OHMS;

    // Zero resistance gives +inf, which saturates to u16::MAX.
    let lux = (LUX_SCALE * Float::powf(resistance, LUX_EXPONENT)) as u16;
    let lux = u32::from(lux.min(LUX_MAX));

    ((lux * 100 + u32::from(LUX_MAX) / 2) / u32::from(LUX_MAX)) as u8
}

/// Mean of a set of ADC samples, 0 for none.
pub fn average_counts(samples: &[u16]) -> u16 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u32 = samples.iter().map(|&s| u32::from(s)).sum();
    (sum / samples.len() as u32) as u16
}

/// Distance in cm for an echo pulse of `echo_us` microseconds.
pub fn echo_to_cm(echo_us: u32) -> f32 {
    echo_us as f32 / ECHO_US_PER_CM
}

/// Progress of a ranging burst.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Burst {
    /// More echoes are needed
    Pending,
    /// Mean distance in cm
    Complete(f32),
    /// An echo was lost; the burst is abandoned
    TimedOut,
}

impl Burst {
    /// Distance reading for the controller, `None` on timeout or while
    /// pending.
    pub fn distance(self) -> Option<f32> {
        match self {
            Burst::Complete(cm) => Some(cm),
            Burst::Pending | Burst::TimedOut => None,
        }
    }
}

/// Averages [`RANGE_SAMPLES`] echoes into one distance reading.
///
/// A lost echo ends the burst with [`Burst::TimedOut`]. After a burst
/// completes or times out the averager starts over.
#[derive(Debug, Clone, Default)]
pub struct RangeAverager {
    sum_cm: f32,
    samples: usize,
}

impl RangeAverager {
    pub const fn new() -> Self {
        Self {
            sum_cm: 0.0,
            samples: 0,
        }
    }

    /// Adds one echo; `None` is a timed-out echo.
    pub fn push(&mut self, echo_us: Option<u32>) -> Burst {
        let Some(echo_us) = echo_us else {
            self.reset();
            return Burst::TimedOut;
        };

        self.sum_cm += echo_to_cm(echo_us);
        self.samples += 1;
        if self.samples < RANGE_SAMPLES {
            return Burst::Pending;
        }

        let mean = self.sum_cm / RANGE_SAMPLES as f32;
        self.reset();
        Burst::Complete(mean)
    }

    /// Drops any partial burst.
    fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_from_pulse_rate() {
        let mut est = SpeedEstimator::new(0, 0);
        // 20 pulses = one rotation = 20 cm in 100 ms.
        assert_eq!(est.update(20, 100), 200);
        // 5 pulses = 5 cm in 100 ms.
        assert_eq!(est.update(25, 200), 50);
    }

    #[test]
    fn speed_is_clamped() {
        let mut est = SpeedEstimator::new(0, 0);
        assert_eq!(est.update(100, 20), MAX_SPEED_CM_S);
    }

    #[test]
    fn counter_wrap_is_a_small_delta() {
        let mut est = SpeedEstimator::new(u16::MAX - 1, 1000);
        assert_eq!(est.update(3, 1100), 50);
    }

    #[test]
    fn speed_holds_then_drops_to_zero_without_pulses() {
        let mut est = SpeedEstimator::new(0, 0);
        assert_eq!(est.update(4, 40), 100);
        assert_eq!(est.update(4, 100), 100);
        assert_eq!(est.update(4, 240), 100);
        assert_eq!(est.update(4, 241), 0);
        assert_eq!(est.update(4, 300), 0);
    }

    #[test]
    fn held_speed_keeps_the_reference_point() {
        let mut est = SpeedEstimator::new(0, 0);
        est.update(2, 20);
        est.update(2, 120);
        // 2 pulses over the 160 ms since the last pulse.
        assert_eq!(est.update(4, 180), 12);
    }

    #[test]
    fn no_time_elapsed_holds_speed() {
        let mut est = SpeedEstimator::new(0, 0);
        est.update(10, 100);
        assert_eq!(est.update(12, 100), 100);
    }

    #[test]
    fn light_extremes() {
        assert_eq!(light_percent(0), 100);
        assert_eq!(light_percent(4095), 0);
        assert_eq!(light_percent(u16::MAX), 0);
    }

    #[test]
    fn light_at_mid_scale() {
        // 1.65 V, so the photoresistor equals the 10 kOhm divider resistor:
        // 40000 * 10000^-0.6021 = 156 lux.
        assert_eq!(light_percent(2048), 16);
    }

    #[test]
    fn light_falls_as_counts_rise() {
        let mut previous = light_percent(0);
        for adc in (0..4096u16).step_by(32) {
            let percent = light_percent(adc);
            assert!(percent <= previous, "adc {adc}: {percent} > {previous}");
            assert!(percent <= 100);
            previous = percent;
        }
    }

    #[test]
    fn counts_average() {
        assert_eq!(average_counts(&[]), 0);
        assert_eq!(average_counts(&[100, 200, 301]), 200);
    }

    #[test]
    fn echo_conversion() {
        assert_eq!(echo_to_cm(0), 0.0);
        assert_eq!(echo_to_cm(580), 10.0);
    }

    #[test]
    fn burst_averages_five_echoes() {
        let mut avg = RangeAverager::new();
        for echo in [580, 1160, 1740, 2320] {
            assert_eq!(avg.push(Some(echo)), Burst::Pending);
        }
        let burst = avg.push(Some(2900));
        assert_eq!(burst, Burst::Complete(30.0));
        assert_eq!(burst.distance(), Some(30.0));
    }

    #[test]
    fn lost_echo_abandons_the_burst() {
        let mut avg = RangeAverager::new();
        avg.push(Some(580));
        avg.push(Some(580));
        let burst = avg.push(None);
        assert_eq!(burst, Burst::TimedOut);
        assert_eq!(burst.distance(), None);

        // The next burst starts from scratch.
        for _ in 0..4 {
            assert_eq!(avg.push(Some(1160)), Burst::Pending);
        }
        assert_eq!(avg.push(Some(1160)), Burst::Complete(20.0));
    }
}
