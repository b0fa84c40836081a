//! Debounced four-key pad with short, long and repeat press detection.
//!
//! # Hardware
//!
//! Four momentary push buttons on PB5..PB8 with internal pull-ups. A key
//! reads low while pressed (active-low).
//!
//! # Timing
//!
//! [`KeyPad::tick`] must be called once per millisecond. All timing below is
//! therefore expressed in ticks, which are milliseconds.
//!
//! | Event       | Condition                                         |
//! |-------------|---------------------------------------------------|
//! | Short press | Released before the long-press threshold          |
//! | Long press  | Held for `long_press_ms`, fires once per hold     |
//! | Repeat      | Every `repeat_interval_ms` after `repeat_start_ms` |
//!
//! # Ownership
//!
//! The 1 ms scan task is the only caller of [`KeyPad::tick`]; the control
//! loop is the only caller of the consuming accessors in [`KeyEvents`]. Every
//! event flag is edge-triggered and cleared on read, so an event is delivered
//! at most once.

/// Number of keys on the pad.
pub const KEY_COUNT: usize = 4;

/// Identifies one of the four keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyId {
    /// Increment / high beam / enter config (long)
    Key1,
    /// Decrement / low beam
    Key2,
    /// Next parameter / fog light
    Key3,
    /// Mode toggle / save and exit config (long)
    Key4,
}

impl KeyId {
    /// All keys in scan priority order.
    pub const ALL: [KeyId; KEY_COUNT] = [KeyId::Key1, KeyId::Key2, KeyId::Key3, KeyId::Key4];

    /// Zero-based index of the key.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Key for a zero-based index, `None` when out of range.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Timing parameters of the key state machine, in milliseconds (ticks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyTiming {
    /// Ticks a raw level must stay unchanged before it becomes stable
    pub debounce_ticks: u8,
    /// Hold duration that fires the long-press event
    pub long_press_ms: u16,
    /// Hold duration after which repeat events start
    pub repeat_start_ms: u16,
    /// Spacing between repeat events
    pub repeat_interval_ms: u16,
}

impl KeyTiming {
    /// Reference timing: 8 ms debounce, 1.2 s long press, repeats every
    /// 80 ms after 200 ms.
    pub const DEFAULT: Self = Self {
        debounce_ticks: 8,
        long_press_ms: 1200,
        repeat_start_ms: 200,
        repeat_interval_ms: 80,
    };
}

impl Default for KeyTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-key debounce and gesture state.
#[derive(Debug, Clone, Copy)]
struct KeyState {
    /// Debounced level (`true` = high = released)
    stable_high: bool,
    /// Raw level seen on the previous tick
    last_raw_high: bool,
    debounce_counter: u8,
    pressed: bool,
    press_ms: u16,
    short_pending: bool,
    long_fired: bool,
    long_consumed: bool,
    repeat_pending: bool,
    repeat_counter: u16,
}

impl KeyState {
    const RELEASED: Self = Self {
        stable_high: true,
        last_raw_high: true,
        debounce_counter: 0,
        pressed: false,
        press_ms: 0,
        short_pending: false,
        long_fired: false,
        long_consumed: false,
        repeat_pending: false,
        repeat_counter: 0,
    };

    fn tick(&mut self, raw_high: bool, timing: &KeyTiming) {
        if raw_high != self.last_raw_high {
            // Any edge restarts the stability window.
            self.debounce_counter = 0;
        } else if self.debounce_counter < timing.debounce_ticks {
            self.debounce_counter += 1;
            if self.debounce_counter == timing.debounce_ticks && self.stable_high != raw_high {
                self.stable_high = raw_high;
                if raw_high {
                    self.on_release();
                } else {
                    self.on_press();
                }
            }
        }
        self.last_raw_high = raw_high;

        if self.pressed {
            self.press_ms = self.press_ms.saturating_add(1);

            if !self.long_fired && self.press_ms >= timing.long_press_ms {
                self.long_fired = true;
                self.long_consumed = false;
            }

            if self.press_ms >= timing.repeat_start_ms {
                self.repeat_counter += 1;
                if self.repeat_counter >= timing.repeat_interval_ms {
                    self.repeat_counter = 0;
                    self.repeat_pending = true;
                }
            }
        }
    }

    fn on_press(&mut self) {
        self.pressed = true;
        self.press_ms = 0;
        self.long_fired = false;
        self.long_consumed = false;
        self.repeat_pending = false;
        self.repeat_counter = 0;
    }

    fn on_release(&mut self) {
        if self.pressed && !self.long_fired {
            self.short_pending = true;
        }
        self.pressed = false;
        self.press_ms = 0;
        self.repeat_pending = false;
        self.repeat_counter = 0;
    }
}

/// Consumer side of the key pad.
///
/// The `take_*` methods clear the event they report; `is_held` and
/// `held_duration_ms` are pure reads.
pub trait KeyEvents {
    /// Returns and clears one pending short press, Key1 first.
    fn take_short_press(&mut self) -> Option<KeyId>;

    /// True exactly once per hold that crossed the long-press threshold.
    fn take_long_press(&mut self, key: KeyId) -> bool;

    /// True once per repeat interval while the key is held.
    fn take_repeat(&mut self, key: KeyId) -> bool;

    /// Whether the key is currently (debounced) pressed.
    fn is_held(&self, key: KeyId) -> bool;

    /// How long the key has been held, 0 when released.
    fn held_duration_ms(&self, key: KeyId) -> u16;
}

/// Debounce and gesture state machine for all four keys.
pub struct KeyPad {
    keys: [KeyState; KEY_COUNT],
    timing: KeyTiming,
}

impl KeyPad {
    /// Creates a key pad with every key released and the reference timing.
    ///
    /// `const` so the pad can live in a `static` shared with the scan task.
    pub const fn new() -> Self {
        Self::with_timing(KeyTiming::DEFAULT)
    }

    /// Creates a key pad with custom timing.
    ///
    /// A debounce window of 0 is raised to 1 tick.
    pub const fn with_timing(mut timing: KeyTiming) -> Self {
        if timing.debounce_ticks == 0 {
            timing.debounce_ticks = 1;
        }
        Self {
            keys: [KeyState::RELEASED; KEY_COUNT],
            timing,
        }
    }

    /// Advances every key by one millisecond.
    ///
    /// # Arguments
    ///
    /// * `levels` - Raw pin level per key, `true` when the pin reads high
    ///   (released)
    pub fn tick(&mut self, levels: [bool; KEY_COUNT]) {
        for (key, raw_high) in self.keys.iter_mut().zip(levels) {
            key.tick(raw_high, &self.timing);
        }
    }
}

impl Default for KeyPad {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyEvents for KeyPad {
    fn take_short_press(&mut self) -> Option<KeyId> {
        let index = self.keys.iter().position(|k| k.short_pending)?;
        self.keys[index].short_pending = false;
        KeyId::from_index(index)
    }

    fn take_long_press(&mut self, key: KeyId) -> bool {
        let state = &mut self.keys[key.index()];
        if state.long_fired && !state.long_consumed {
            state.long_consumed = true;
            true
        } else {
            false
        }
    }

    fn take_repeat(&mut self, key: KeyId) -> bool {
        let state = &mut self.keys[key.index()];
        core::mem::replace(&mut state.repeat_pending, false)
    }

    fn is_held(&self, key: KeyId) -> bool {
        self.keys[key.index()].pressed
    }

    fn held_duration_ms(&self, key: KeyId) -> u16 {
        let state = &self.keys[key.index()];
        if state.pressed { state.press_ms } else { 0 }
    }
}
