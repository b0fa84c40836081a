//! Light decision engine.
//!
//! Turns one environment sample and the committed thresholds into duty
//! cycles for the three lamps:
//!
//! - **Low beam**: on whenever it is dark enough, brighter when darker or
//!   faster, dimmed near obstacles, forced to maximum after a sudden light
//!   drop (tunnel entry).
//! - **High beam**: only when dark, moving and with a clear road ahead;
//!   brightness follows speed.
//! - **Fog light**: on while humidity is above its threshold.
//!
//! Beam duties never jump to their target. Each update moves them a fixed
//! percentage of the remaining distance, at least one unit, and snaps once
//! within one unit.

use crate::params::Thresholds;

/// Low-beam duty per light band, dimmest band first.
pub const LOW_BEAM_LEVEL1: u8 = 40;
pub const LOW_BEAM_LEVEL2: u8 = 60;
pub const LOW_BEAM_LEVEL3: u8 = 80;

/// High-beam duty per speed tier.
pub const HIGH_BEAM_LEVEL1: u8 = 50;
pub const HIGH_BEAM_LEVEL2: u8 = 75;
pub const HIGH_BEAM_LEVEL3: u8 = 100;

/// Fog light duty when on.
pub const FOG_LEVEL: u8 = 100;

/// Light drop between two samples that flags a tunnel entry, percent.
pub const LIGHT_DROP_THRESHOLD: u8 = 30;

/// Updates the tunnel flag stays raised, counting the arming update.
pub const TUNNEL_HOLD_UPDATES: u8 = 6;

/// Below this speed (cm/s) the vehicle counts as crawling.
pub const SPEED_LOW: u32 = 10;

/// Obstacles nearer than this (cm) dim the low beam and block the high beam.
pub const DISTANCE_CLOSE: f32 = 20.0;

/// Reference far distance (cm) for high-beam attenuation.
pub const DISTANCE_FAR: u16 = 50;

/// Ambient light below this is "dark", percent.
pub const LIGHT_DARK_THRESHOLD: u8 = 20;

/// Ambient light up to this is "dim", percent.
pub const LIGHT_DIM_THRESHOLD: u8 = 40;

/// Smoothing factors, percent of the remaining distance per update.
pub const LOW_BEAM_SMOOTHING: u8 = 20;
pub const HIGH_BEAM_SMOOTHING: u8 = 15;

/// One of the three PWM driven lamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lamp {
    HighBeam,
    LowBeam,
    Fog,
}

/// PWM outputs driving the lamps.
pub trait LampOutputs {
    /// Sets the duty cycle of a lamp, 0..=100.
    fn set_duty(&mut self, lamp: Lamp, duty: u8);

    /// Switches every lamp off.
    fn all_off(&mut self) {
        self.set_duty(Lamp::HighBeam, 0);
        self.set_duty(Lamp::LowBeam, 0);
        self.set_duty(Lamp::Fog, 0);
    }
}

/// One sample of every sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Environment {
    /// Ambient light, 0..=100 percent
    pub light: u8,
    /// Vehicle speed, cm/s
    pub speed: u32,
    /// Distance to the nearest obstacle in cm, `None` if ranging timed out
    pub distance: Option<f32>,
    /// Temperature, °C (carried, not used by any rule)
    pub temperature: u8,
    /// Relative humidity, percent
    pub humidity: u8,
}

/// How a failed distance reading is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangeFaultPolicy {
    /// No reading means no obstacle: neither beam is gated by distance.
    #[default]
    TreatAsClear,
    /// No reading counts as an obstacle at zero distance: high beam off,
    /// low beam dimmed.
    DisableHighBeam,
}

impl RangeFaultPolicy {
    /// Distance the rules should see, `None` meaning nothing in range.
    fn effective_distance(self, distance: Option<f32>) -> Option<f32> {
        match (self, distance) {
            (_, Some(d)) if d >= 0.0 => Some(d),
            (RangeFaultPolicy::TreatAsClear, _) => None,
            (RangeFaultPolicy::DisableHighBeam, _) => Some(-1.0),
        }
    }
}

/// Target low-beam duty.
///
/// # Arguments
///
/// * `env` - Current sensor sample
/// * `thresholds` - Committed thresholds
/// * `distance` - Effective obstacle distance, `None` if nothing in range
/// * `tunnel` - Whether a tunnel entry is flagged
pub fn low_beam_target(
    env: &Environment,
    thresholds: &Thresholds,
    distance: Option<f32>,
    tunnel: bool,
) -> u8 {
    if env.light > thresholds.light {
        return 0;
    }

    let mut duty = if env.light < LIGHT_DARK_THRESHOLD {
        LOW_BEAM_LEVEL3
    } else if env.light < LIGHT_DIM_THRESHOLD {
        LOW_BEAM_LEVEL2
    } else {
        LOW_BEAM_LEVEL1
    };

    if env.speed > u32::from(thresholds.speed) {
        duty = (duty + 20).min(LOW_BEAM_LEVEL3);
    } else if env.speed > SPEED_LOW && duty == LOW_BEAM_LEVEL1 {
        duty = LOW_BEAM_LEVEL2;
    }

    if distance.is_some_and(|d| d < DISTANCE_CLOSE) {
        duty = duty * 3 / 5;
    }

    if tunnel {
        duty = LOW_BEAM_LEVEL3;
    }

    duty
}

/// Target high-beam duty.
///
/// `distance` is the effective obstacle distance as for [`low_beam_target`].
pub fn high_beam_target(env: &Environment, thresholds: &Thresholds, distance: Option<f32>) -> u8 {
    if env.light > thresholds.light {
        return 0;
    }
    if let Some(d) = distance {
        if d < f32::from(thresholds.distance) || d <= DISTANCE_CLOSE {
            return 0;
        }
    }
    if env.speed < SPEED_LOW {
        return 0;
    }

    let speed_threshold = u32::from(thresholds.speed);
    let mut duty = if env.speed >= speed_threshold {
        HIGH_BEAM_LEVEL3
    } else if env.speed >= (speed_threshold + SPEED_LOW) / 2 {
        HIGH_BEAM_LEVEL2
    } else {
        HIGH_BEAM_LEVEL1
    };

    if (LIGHT_DARK_THRESHOLD..=LIGHT_DIM_THRESHOLD).contains(&env.light) {
        duty = duty.min(HIGH_BEAM_LEVEL2);
    } else if env.light < LIGHT_DARK_THRESHOLD {
        duty = duty.max(HIGH_BEAM_LEVEL2);
    }

    let midpoint = (u16::from(thresholds.distance) + DISTANCE_FAR) / 2;
    if distance.is_some_and(|d| d < f32::from(midpoint)) {
        duty = (u16::from(duty) * 17 / 20) as u8;
    }

    duty
}

/// Whether the fog light should be on. Temperature is ignored.
pub fn fog_target(env: &Environment, thresholds: &Thresholds) -> bool {
    env.humidity > thresholds.humidity
}

/// Moves `current` one smoothing step toward `target`.
///
/// The step is `factor` percent of the difference, at least one unit, and
/// the result snaps to `target` once within one unit, so it converges
/// without overshoot.
pub fn smooth_step(current: u8, target: u8, factor: u8) -> u8 {
    if current.abs_diff(target) <= 1 {
        return target;
    }
    let diff = i16::from(target) - i16::from(current);
    let mut delta = diff * i16::from(factor) / 100;
    if delta == 0 {
        delta = diff.signum();
    }
    (i16::from(current) + delta) as u8
}

/// Flags sudden light drops, e.g. entering a tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelDetector {
    previous: u8,
    active: bool,
    countdown: u8,
}

impl TunnelDetector {
    /// Feeds one light sample. Returns whether the tunnel flag is raised.
    pub fn update(&mut self, light: u8) -> bool {
        if self.previous > 0 && self.previous.saturating_sub(light) >= LIGHT_DROP_THRESHOLD {
            #[cfg(feature = "debug-mode")]
            defmt::info!("light drop {} -> {}, tunnel flagged", self.previous, light);
            self.active = true;
            self.countdown = TUNNEL_HOLD_UPDATES;
        }

        if self.active && self.countdown > 0 {
            self.countdown -= 1;
            if self.countdown == 0 {
                self.active = false;
            }
        }

        self.previous = light;
        self.active
    }

    /// Whether a tunnel entry is currently flagged.
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Lamp states toggled by hand in manual mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ManualLamps {
    pub high: bool,
    pub low: bool,
    pub fog: bool,
}

/// Runtime state of the lamps: smoothed duties, fog state, manual toggles
/// and the tunnel detector.
#[derive(Debug, Clone, Default)]
pub struct LightEngine {
    low_duty: u8,
    high_duty: u8,
    fog_on: bool,
    manual: ManualLamps,
    tunnel: TunnelDetector,
    policy: RangeFaultPolicy,
}

impl LightEngine {
    pub fn new(policy: RangeFaultPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Feeds the tunnel detector. Call once per update outside config mode,
    /// before [`LightEngine::drive`].
    pub fn track_light(&mut self, light: u8) -> bool {
        self.tunnel.update(light)
    }

    /// Computes targets, advances the smoothing and writes all three lamps.
    pub fn drive(
        &mut self,
        env: &Environment,
        thresholds: &Thresholds,
        outputs: &mut impl LampOutputs,
    ) {
        let distance = self.policy.effective_distance(env.distance);

        let low_target = low_beam_target(env, thresholds, distance, self.tunnel.is_active());
        self.low_duty = smooth_step(self.low_duty, low_target, LOW_BEAM_SMOOTHING);

        let high_target = high_beam_target(env, thresholds, distance);
        self.high_duty = smooth_step(self.high_duty, high_target, HIGH_BEAM_SMOOTHING);

        let fog = fog_target(env, thresholds);
        #[cfg(feature = "debug-mode")]
        if fog != self.fog_on {
            defmt::info!("fog light {}", fog);
        }
        self.fog_on = fog;

        outputs.set_duty(Lamp::HighBeam, self.high_duty);
        outputs.set_duty(Lamp::LowBeam, self.low_duty);
        outputs.set_duty(Lamp::Fog, if self.fog_on { FOG_LEVEL } else { 0 });
    }

    /// Flips one lamp between off and full in manual mode.
    pub fn toggle_manual(&mut self, lamp: Lamp, outputs: &mut impl LampOutputs) {
        let duty = match lamp {
            Lamp::HighBeam => {
                self.manual.high = !self.manual.high;
                self.high_duty = if self.manual.high { HIGH_BEAM_LEVEL3 } else { 0 };
                self.high_duty
            }
            Lamp::LowBeam => {
                self.manual.low = !self.manual.low;
                self.low_duty = if self.manual.low { LOW_BEAM_LEVEL3 } else { 0 };
                self.low_duty
            }
            Lamp::Fog => {
                self.manual.fog = !self.manual.fog;
                self.fog_on = self.manual.fog;
                if self.fog_on { FOG_LEVEL } else { 0 }
            }
        };
        outputs.set_duty(lamp, duty);
    }

    /// Clears every runtime field and switches the lamps off.
    pub fn reset(&mut self, outputs: &mut impl LampOutputs) {
        *self = Self::new(self.policy);
        outputs.all_off();
    }

    pub fn low_duty(&self) -> u8 {
        self.low_duty
    }

    pub fn high_duty(&self) -> u8 {
        self.high_duty
    }

    pub fn fog_on(&self) -> bool {
        self.fog_on
    }

    pub fn manual(&self) -> ManualLamps {
        self.manual
    }

    pub fn tunnel_active(&self) -> bool {
        self.tunnel.is_active()
    }
}
