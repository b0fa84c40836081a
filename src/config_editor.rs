//! Interactive threshold editor shown in config mode.
//!
//! # Keys
//!
//! | Key  | Short press          | Held                                   |
//! |------|----------------------|----------------------------------------|
//! | Key1 | selected value + 1   | + 1 per repeat event after 300 ms      |
//! | Key2 | selected value - 1   | - 1 per repeat event after 300 ms      |
//! | Key3 | next parameter       | next parameter every 200 ms after 500 ms |
//! | Key4 | (ignored)            | long press saves and exits (controller) |
//!
//! Values wrap between 0 and 100. Any key activity restarts the idle timer;
//! 40 idle ticks of 500 ms (20 s) end the session with an automatic save.
//!
//! # Screen
//!
//! ```text
//! col 0         15
//!     > LUX =  60 lx
//!       SPD =  40 cm/s
//!       DIS =  50 cm
//!       HUM =  85 %   L
//! ```
//!
//! The list is only redrawn in full on entry and when the selection scrolls
//! to another page of four. Otherwise only the blinking cursor and values
//! that changed are rewritten, since a full redraw flickers on the panel.

use core::fmt::Write;

use heapless::String;

use crate::display::{COLS, ROWS, TextDisplay};
use crate::keypad::{KEY_COUNT, KeyEvents, KeyId};
use crate::params::{PARAM_COUNT, ParamId, ParamStore};

/// Length of one idle tick.
pub const IDLE_TICK_MS: u32 = 500;

/// Idle ticks before the editor saves and exits on its own.
pub const IDLE_TIMEOUT_TICKS: u8 = 40;

/// Cursor blink half-period.
pub const BLINK_MS: u32 = 200;

/// Key1/Key2 must be held this long before repeat events adjust values.
pub const REPEAT_GATE_MS: u16 = 300;

/// Key3 must be held this long before the selection auto-advances.
pub const ADVANCE_HOLD_MS: u16 = 500;

/// Spacing of auto-advance steps while Key3 is held.
pub const ADVANCE_INTERVAL_MS: u32 = 200;

const CURSOR_COL: usize = 0;
const LABEL_COL: usize = 2;
const VALUE_COL: usize = 8;

/// What a call to [`ConfigEditor::render`] had to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Redraw {
    /// Nothing changed
    None,
    /// Cursor or single values rewritten
    Partial,
    /// Screen cleared and every row drawn
    Full,
}

/// What is currently on screen.
#[derive(Debug, Clone)]
struct RenderCache {
    full: bool,
    values: [u8; PARAM_COUNT],
    cursor: usize,
    blink: bool,
}

/// Config mode UI state.
#[derive(Debug, Clone)]
pub struct ConfigEditor {
    selected: usize,
    scroll: usize,
    blink_on: bool,
    last_blink_ms: u32,
    idle_ticks: u8,
    idle_since_ms: u32,
    timed_out: bool,
    last_advance_ms: u32,
    /// Keys that were already down on entry; ignored until released.
    latched: [bool; KEY_COUNT],
    cache: RenderCache,
}

impl ConfigEditor {
    /// Starts an edit session.
    ///
    /// Copies the committed values into the temp values, selects the first
    /// parameter and requests a full redraw.
    ///
    /// # Arguments
    ///
    /// * `params` - Parameter store to edit
    /// * `keys` - Key state, used to latch keys still held from the entering
    ///   gesture
    /// * `now_ms` - Current time
    pub fn enter(params: &mut ParamStore, keys: &impl KeyEvents, now_ms: u32) -> Self {
        params.begin_edit();
        Self {
            selected: 0,
            scroll: 0,
            blink_on: true,
            last_blink_ms: now_ms,
            idle_ticks: 0,
            idle_since_ms: now_ms,
            timed_out: false,
            last_advance_ms: now_ms,
            latched: KeyId::ALL.map(|k| keys.is_held(k)),
            cache: RenderCache {
                full: true,
                values: [0; PARAM_COUNT],
                cursor: 0,
                blink: true,
            },
        }
    }

    /// Index of the selected parameter.
    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Parameter under the cursor.
    pub fn selected_param(&self) -> ParamId {
        ParamId::from_index(self.selected).unwrap_or(ParamId::Light)
    }

    /// First parameter index shown on screen.
    pub fn scroll(&self) -> usize {
        self.scroll
    }

    /// Idle ticks counted since the last key activity.
    pub fn idle_ticks(&self) -> u8 {
        self.idle_ticks
    }

    /// Asks for a full redraw on the next render, e.g. after a banner.
    pub fn invalidate(&mut self) {
        self.cache.full = true;
    }

    /// Applies pending key events to the temp values and selection.
    pub fn handle_keys(
        &mut self,
        keys: &mut impl KeyEvents,
        params: &mut ParamStore,
        now_ms: u32,
    ) {
        let mut active = false;

        if let Some(key) = keys.take_short_press() {
            active = true;
            if !self.latched[key.index()] {
                match key {
                    KeyId::Key1 => params.increment(self.selected_param()),
                    KeyId::Key2 => params.decrement(self.selected_param()),
                    KeyId::Key3 => self.advance(),
                    KeyId::Key4 => {}
                }
            }
        }

        for key in KeyId::ALL {
            if self.latched[key.index()] && !keys.is_held(key) {
                self.latched[key.index()] = false;
            }
        }

        if self.repeat_due(keys, KeyId::Key1) {
            params.increment(self.selected_param());
            active = true;
        }
        if self.repeat_due(keys, KeyId::Key2) {
            params.decrement(self.selected_param());
            active = true;
        }

        if self.is_live_hold(&*keys, KeyId::Key3)
            && keys.held_duration_ms(KeyId::Key3) > ADVANCE_HOLD_MS
            && now_ms.wrapping_sub(self.last_advance_ms) >= ADVANCE_INTERVAL_MS
        {
            self.advance();
            self.last_advance_ms = now_ms;
            active = true;
        }

        if active || KeyId::ALL.iter().any(|&k| keys.is_held(k)) {
            self.idle_ticks = 0;
            self.idle_since_ms = now_ms;
        }
    }

    /// Counts idle time. Returns `true` exactly once, when the session has
    /// been idle for [`IDLE_TIMEOUT_TICKS`].
    pub fn poll_timeout(&mut self, now_ms: u32) -> bool {
        if self.timed_out {
            return false;
        }
        while now_ms.wrapping_sub(self.idle_since_ms) >= IDLE_TICK_MS {
            self.idle_since_ms = self.idle_since_ms.wrapping_add(IDLE_TICK_MS);
            self.idle_ticks = self.idle_ticks.saturating_add(1);
        }
        if self.idle_ticks >= IDLE_TIMEOUT_TICKS {
            self.timed_out = true;
            return true;
        }
        false
    }

    /// Brings the screen up to date with the editor state.
    ///
    /// Works in two phases: first the blink phase and scroll offset are
    /// settled, then whatever differs from the render cache is drawn.
    pub fn render(
        &mut self,
        params: &ParamStore,
        display: &mut impl TextDisplay,
        now_ms: u32,
    ) -> Redraw {
        if now_ms.wrapping_sub(self.last_blink_ms) >= BLINK_MS {
            self.blink_on = !self.blink_on;
            self.last_blink_ms = now_ms;
        }
        if !self.is_visible(self.selected) {
            self.scroll = self.selected / ROWS * ROWS;
            self.cache.full = true;
        }

        if self.cache.full {
            self.draw_all(params, display);
            return Redraw::Full;
        }

        let mut redraw = Redraw::None;

        if self.cache.cursor != self.selected {
            if let Some(row) = self.row_of(self.cache.cursor) {
                display.write_char(row, CURSOR_COL, ' ');
            }
            self.draw_cursor(display);
            self.draw_symbol(display);
            self.cache.cursor = self.selected;
            redraw = Redraw::Partial;
        }

        for id in ParamId::ALL {
            let value = params.temp_value(id);
            if self.cache.values[id.index()] != value {
                if let Some(row) = self.row_of(id.index()) {
                    let mut text: String<4> = String::new();
                    let _ = write!(text, "{:>3}", value);
                    display.write_str(row, VALUE_COL, &text);
                    redraw = Redraw::Partial;
                }
                self.cache.values[id.index()] = value;
            }
        }

        if self.cache.blink != self.blink_on {
            self.draw_cursor(display);
            self.cache.blink = self.blink_on;
            redraw = Redraw::Partial;
        }

        redraw
    }

    fn advance(&mut self) {
        self.selected = (self.selected + 1) % PARAM_COUNT;
    }

    /// Held, and not a hold carried over from before entering the editor.
    fn is_live_hold(&self, keys: &impl KeyEvents, key: KeyId) -> bool {
        keys.is_held(key) && !self.latched[key.index()]
    }

    fn repeat_due(&self, keys: &mut impl KeyEvents, key: KeyId) -> bool {
        self.is_live_hold(&*keys, key)
            && keys.held_duration_ms(key) > REPEAT_GATE_MS
            && keys.take_repeat(key)
    }

    fn is_visible(&self, index: usize) -> bool {
        (self.scroll..self.scroll + ROWS).contains(&index)
    }

    fn row_of(&self, index: usize) -> Option<usize> {
        self.is_visible(index).then(|| index - self.scroll)
    }

    fn draw_all(&mut self, params: &ParamStore, display: &mut impl TextDisplay) {
        display.clear();
        for (row, id) in ParamId::ALL.iter().skip(self.scroll).take(ROWS).enumerate() {
            let info = id.info();
            let mut line: String<COLS> = String::new();
            let _ = write!(
                line,
                "{} = {:>3} {}",
                info.name,
                params.temp_value(*id),
                info.unit
            );
            display.write_str(row, LABEL_COL, &line);
        }
        self.draw_cursor(display);
        self.draw_symbol(display);

        self.cache = RenderCache {
            full: false,
            values: ParamId::ALL.map(|id| params.temp_value(id)),
            cursor: self.selected,
            blink: self.blink_on,
        };
    }

    fn draw_cursor(&self, display: &mut impl TextDisplay) {
        if let Some(row) = self.row_of(self.selected) {
            let glyph = if self.blink_on { '>' } else { ' ' };
            display.write_char(row, CURSOR_COL, glyph);
        }
    }

    fn draw_symbol(&self, display: &mut impl TextDisplay) {
        display.write_char(ROWS - 1, COLS - 1, self.selected_param().info().symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::FrameBuffer;
    use crate::keypad::KeyPad;
    use crate::keypad::tests::{click, hold, idle};

    struct Rig {
        pad: KeyPad,
        params: ParamStore,
        editor: ConfigEditor,
        fb: FrameBuffer,
        now: u32,
    }

    impl Rig {
        fn new() -> Self {
            let pad = KeyPad::new();
            let mut params = ParamStore::new();
            let editor = ConfigEditor::enter(&mut params, &pad, 0);
            Self {
                pad,
                params,
                editor,
                fb: FrameBuffer::new(),
                now: 0,
            }
        }

        /// Advances the clock, then runs one editor cycle.
        fn step(&mut self, ms: u32) -> Redraw {
            self.now += ms;
            self.editor.handle_keys(&mut self.pad, &mut self.params, self.now);
            self.editor.render(&self.params, &mut self.fb, self.now)
        }

        /// Clicks a key, then runs one editor cycle.
        fn click(&mut self, key: KeyId) -> Redraw {
            click(&mut self.pad, key, 30);
            self.step(50)
        }

        /// Holds a key for `ms`, running an editor cycle every millisecond.
        fn hold(&mut self, key: KeyId, ms: u32) {
            for _ in 0..ms {
                hold(&mut self.pad, key, 1);
                self.step(1);
            }
            idle(&mut self.pad, 20);
            self.step(20);
        }
    }

    #[test]
    fn entry_draws_the_full_list() {
        let mut rig = Rig::new();
        assert_eq!(rig.step(0), Redraw::Full);
        assert_eq!(rig.fb.row(0), "> LUX =  60 lx  ");
        assert_eq!(rig.fb.row(1), "  SPD =  40 cm/s");
        assert_eq!(rig.fb.row(2), "  DIS =  50 cm  ");
        assert_eq!(rig.fb.row(3), "  HUM =  85 %  L");
        assert_eq!(rig.fb.clear_count(), 1);
    }

    #[test]
    fn entry_snapshots_committed_values() {
        let mut params = ParamStore::new();
        params.increment(ParamId::Speed);
        let editor = ConfigEditor::enter(&mut params, &KeyPad::new(), 0);
        assert_eq!(params.temp_value(ParamId::Speed), 40);
        assert_eq!(editor.selected(), 0);
    }

    #[test]
    fn short_presses_edit_and_select() {
        let mut rig = Rig::new();
        rig.step(0);

        rig.click(KeyId::Key1);
        assert_eq!(rig.params.temp_value(ParamId::Light), 61);
        rig.click(KeyId::Key2);
        rig.click(KeyId::Key2);
        assert_eq!(rig.params.temp_value(ParamId::Light), 59);

        rig.click(KeyId::Key3);
        assert_eq!(rig.editor.selected_param(), ParamId::Speed);
        rig.click(KeyId::Key1);
        assert_eq!(rig.params.temp_value(ParamId::Speed), 41);
        assert_eq!(rig.params.value(ParamId::Speed), 40);
    }

    #[test]
    fn selection_wraps_around() {
        let mut rig = Rig::new();
        for _ in 0..PARAM_COUNT {
            rig.click(KeyId::Key3);
        }
        assert_eq!(rig.editor.selected(), 0);
    }

    #[test]
    fn key4_short_press_changes_nothing() {
        let mut rig = Rig::new();
        rig.click(KeyId::Key4);
        assert_eq!(rig.params.temp_value(ParamId::Light), 60);
        assert_eq!(rig.editor.selected(), 0);
    }

    #[test]
    fn holding_key1_repeats_increments() {
        let mut rig = Rig::new();
        // Repeats are raised at 279 ms and every 80 ms after; the first one
        // waits for the 300 ms gate. 13 land before release, and the hold
        // ends as a long press so the release adds nothing.
        rig.hold(KeyId::Key1, 8 + 1300);
        assert_eq!(rig.params.temp_value(ParamId::Light), 60 + 13);
    }

    #[test]
    fn holding_key2_repeats_decrements_with_wrap() {
        let mut rig = Rig::new();
        rig.click(KeyId::Key3);
        rig.click(KeyId::Key3);
        // 60 repeats take distance from 50 through 0 and 100 down to 91.
        rig.hold(KeyId::Key2, 8 + 200 + 80 * 60 + 40);
        assert_eq!(rig.params.temp_value(ParamId::Distance), 91);
    }

    #[test]
    fn holding_key3_auto_advances() {
        let mut rig = Rig::new();
        // Held > 500 ms at t = 509; advances at 509, 709 and 909.
        for _ in 0..8 + 950 {
            hold(&mut rig.pad, KeyId::Key3, 1);
            rig.step(1);
        }
        assert_eq!(rig.editor.selected(), 3);
    }

    #[test]
    fn hold_carried_into_the_editor_is_ignored_until_released() {
        let mut pad = KeyPad::new();
        hold(&mut pad, KeyId::Key1, 1300);
        assert!(pad.take_long_press(KeyId::Key1));

        let mut params = ParamStore::new();
        let mut editor = ConfigEditor::enter(&mut params, &pad, 0);
        for t in 0..1000 {
            hold(&mut pad, KeyId::Key1, 1);
            editor.handle_keys(&mut pad, &mut params, t);
        }
        assert_eq!(params.temp_value(ParamId::Light), 60);

        idle(&mut pad, 20);
        editor.handle_keys(&mut pad, &mut params, 1020);
        click(&mut pad, KeyId::Key1, 30);
        editor.handle_keys(&mut pad, &mut params, 1100);
        assert_eq!(params.temp_value(ParamId::Light), 61);
    }

    #[test]
    fn idle_timeout_fires_once_after_twenty_seconds() {
        let mut rig = Rig::new();
        let mut fired = 0;
        let mut fired_at = 0;
        for t in (0..30_000).step_by(20) {
            rig.editor.handle_keys(&mut rig.pad, &mut rig.params, t);
            if rig.editor.poll_timeout(t) {
                fired += 1;
                fired_at = t;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(fired_at, 20_000);
    }

    #[test]
    fn key_activity_restarts_the_idle_timer() {
        let mut rig = Rig::new();
        rig.now = 15_000;
        assert!(!rig.editor.poll_timeout(rig.now));
        assert_eq!(rig.editor.idle_ticks(), 30);

        rig.click(KeyId::Key1);
        assert_eq!(rig.editor.idle_ticks(), 0);
        assert!(!rig.editor.poll_timeout(rig.now + 19_000));
        assert!(rig.editor.poll_timeout(rig.now + 20_000));
    }

    #[test]
    fn value_change_updates_only_the_value_cells() {
        let mut rig = Rig::new();
        rig.step(0);
        let clears = rig.fb.clear_count();

        rig.click(KeyId::Key1);
        assert_eq!(rig.fb.clear_count(), clears);
        assert_eq!(&rig.fb.row(0)[2..], "LUX =  61 lx  ");
    }

    #[test]
    fn selection_change_moves_cursor_without_full_redraw() {
        let mut rig = Rig::new();
        rig.step(0);
        rig.click(KeyId::Key3);
        assert_eq!(rig.fb.clear_count(), 1);
        assert_eq!(rig.fb.char_at(0, 0), Some(' '));
        assert_eq!(rig.fb.char_at(3, 15), Some('S'));
        assert_eq!(rig.editor.scroll(), 0);
    }

    #[test]
    fn cursor_blinks_every_200ms() {
        let mut rig = Rig::new();
        rig.step(0);
        assert_eq!(rig.fb.char_at(0, 0), Some('>'));
        assert_eq!(rig.step(100), Redraw::None);
        assert_eq!(rig.step(100), Redraw::Partial);
        assert_eq!(rig.fb.char_at(0, 0), Some(' '));
        rig.step(200);
        assert_eq!(rig.fb.char_at(0, 0), Some('>'));
        assert_eq!(rig.fb.clear_count(), 1);
    }

    #[test]
    fn invalidate_forces_full_redraw() {
        let mut rig = Rig::new();
        rig.step(0);
        rig.editor.invalidate();
        assert_eq!(rig.step(10), Redraw::Full);
        assert_eq!(rig.fb.clear_count(), 2);
    }
}
