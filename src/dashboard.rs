//! Live sensor dashboard shown in Auto and Manual mode.
//!
//! ```text
//! col 0         15
//!     Spd: 42 cm/s  A
//!     Lux: 17 %
//!     Dst:12.3 cm
//!     T:21 C H:55 %
//! ```
//!
//! Labels are drawn once after [`Dashboard::invalidate`]; afterwards only the
//! value fields are rewritten, and only when a reading or the mode differs
//! from what is on screen.

use core::fmt::{self, Write};

use heapless::String;

use crate::controller::Mode;
use crate::display::{COLS, TextDisplay};
use crate::lighting::Environment;

/// Minimum spacing between two refreshes.
pub const REFRESH_MS: u32 = 200;

/// Readings currently on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Shown {
    speed: u32,
    light: u8,
    distance: Option<f32>,
    temperature: u8,
    humidity: u8,
    mode: Mode,
}

impl Shown {
    fn new(env: &Environment, mode: Mode) -> Self {
        Self {
            speed: env.speed,
            light: env.light,
            distance: env.distance,
            temperature: env.temperature,
            humidity: env.humidity,
            mode,
        }
    }
}

/// Dashboard screen state.
#[derive(Debug, Clone)]
pub struct Dashboard {
    shown: Option<Shown>,
    labels_drawn: bool,
    last_refresh_ms: u32,
}

impl Dashboard {
    /// Dashboard that draws labels and values on its first render.
    pub const fn new() -> Self {
        Self {
            shown: None,
            labels_drawn: false,
            last_refresh_ms: 0,
        }
    }

    /// Forgets what is on screen; the next render clears the panel and
    /// draws labels and values.
    pub fn invalidate(&mut self) {
        self.shown = None;
        self.labels_drawn = false;
    }

    /// Refreshes the dashboard.
    ///
    /// Skips the refresh if less than [`REFRESH_MS`] passed since the last
    /// one, unless the dashboard was invalidated.
    ///
    /// # Arguments
    ///
    /// * `env` - Latest sensor sample
    /// * `mode` - Operating mode, shown as a letter in the top-right corner
    /// * `display` - Target surface
    /// * `now_ms` - Current time
    ///
    /// # Returns
    ///
    /// `true` if anything was drawn
    pub fn render(
        &mut self,
        env: &Environment,
        mode: Mode,
        display: &mut impl TextDisplay,
        now_ms: u32,
    ) -> bool {
        if self.labels_drawn && now_ms.wrapping_sub(self.last_refresh_ms) < REFRESH_MS {
            return false;
        }
        self.last_refresh_ms = now_ms;

        let reading = Shown::new(env, mode);
        if !self.labels_drawn {
            display.clear();
            draw_labels(display);
            self.labels_drawn = true;
        } else if self.shown == Some(reading) {
            return false;
        }

        draw_values(display, &reading);
        self.shown = Some(reading);
        true
    }
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

fn draw_labels(display: &mut impl TextDisplay) {
    display.write_str(0, 0, "Spd:");
    display.write_str(1, 0, "Lux:");
    display.write_str(2, 0, "Dst:");
    display.write_str(3, 0, "T:");
    display.write_str(3, 7, "H:");
}

fn draw_values(display: &mut impl TextDisplay, reading: &Shown) {
    write_field(display, 0, 4, 4, format_args!("{:>3}", reading.speed));
    display.write_str(0, 8, "cm/s");
    display.write_char(0, 14, mode_letter(reading.mode));

    write_field(display, 1, 4, 3, format_args!("{:>3}", reading.light));
    display.write_str(1, 8, "%");

    match reading.distance {
        Some(cm) if cm >= 0.0 => write_field(display, 2, 4, 5, format_args!("{:>4.1}", cm)),
        _ => write_field(display, 2, 4, 5, format_args!("----")),
    }
    display.write_str(2, 9, "cm");

    write_field(display, 3, 2, 2, format_args!("{:>2}", reading.temperature));
    display.write_str(3, 5, "C");

    write_field(display, 3, 9, 2, format_args!("{:>2}", reading.humidity));
    display.write_str(3, 12, "%");
}

fn mode_letter(mode: Mode) -> char {
    match mode {
        Mode::Auto => 'A',
        Mode::Manual => 'M',
        Mode::Config => ' ',
    }
}

/// Writes formatted text padded with spaces, or cut, to exactly `width`.
fn write_field(
    display: &mut impl TextDisplay,
    row: usize,
    col: usize,
    width: usize,
    args: fmt::Arguments<'_>,
) {
    let mut text: String<COLS> = String::new();
    let _ = text.write_fmt(args);
    while text.len() < width {
        if text.push(' ').is_err() {
            break;
        }
    }
    text.truncate(width);
    display.write_str(row, col, &text);
}
