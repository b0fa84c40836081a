//! Operating mode state machine.
//!
//! # Modes
//!
//! - **Auto**: the light engine drives all lamps from the sensor sample.
//! - **Manual**: Key1/Key2/Key3 toggle high beam, low beam and fog light.
//! - **Config**: the threshold editor owns the keys and the screen.
//!
//! # Transitions
//!
//! ```text
//!            Key4 short               Key1 long
//!   Manual <-----------> Auto ---------------------> Config
//!                         ^                            |
//!                         +-- Key4 long (save) --------+
//!                         +-- 20 s idle (auto save) ---+
//! ```
//!
//! Every transition back to Auto or between Auto and Manual zeroes the
//! lamp outputs and the engine's smoothing state. Config is entered with the
//! engine state untouched.
//!
//! # Banners
//!
//! Mode changes and save results are announced by short full-screen
//! banners. They are queued and expire by timestamp while the control loop
//! keeps running; the active screen is redrawn once the last one ends.

use embedded_storage::nor_flash::NorFlash;
use heapless::Deque;

use crate::config_editor::ConfigEditor;
use crate::dashboard::Dashboard;
use crate::display::TextDisplay;
use crate::keypad::{KeyEvents, KeyId};
use crate::lighting::{Environment, Lamp, LampOutputs, LightEngine, RangeFaultPolicy};
use crate::params::{ParamFlash, ParamStore, StoreError};

/// Banners that can be pending at once.
const BANNER_QUEUE: usize = 4;

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Auto,
    Manual,
    Config,
}

impl Mode {
    /// Toggle period of the status LED, which tells the modes apart.
    pub fn status_blink_ms(self) -> u32 {
        match self {
            Mode::Auto => 1000,
            Mode::Manual => 200,
            Mode::Config => 500,
        }
    }
}

/// Mode together with the state only that mode needs.
#[derive(Debug)]
enum ModeState {
    Auto,
    Manual,
    Config(ConfigEditor),
}

impl ModeState {
    fn mode(&self) -> Mode {
        match self {
            ModeState::Auto => Mode::Auto,
            ModeState::Manual => Mode::Manual,
            ModeState::Config(_) => Mode::Config,
        }
    }
}

/// A full-screen message shown for a fixed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Banner {
    pub text: &'static str,
    pub row: usize,
    pub col: usize,
    pub duration_ms: u32,
}

impl Banner {
    const fn new(text: &'static str, row: usize, col: usize, duration_ms: u32) -> Self {
        Self {
            text,
            row,
            col,
            duration_ms,
        }
    }

    pub const SYSTEM_READY: Banner = Banner::new("System Ready", 1, 2, 1500);
    pub const CONFIG_MODE: Banner = Banner::new("CONFIG MODE", 1, 3, 500);
    pub const MANUAL_MODE: Banner = Banner::new("MANUAL MODE", 1, 3, 800);
    pub const AUTO_MODE: Banner = Banner::new("AUTO MODE", 1, 3, 800);
    pub const SAVE_OK: Banner = Banner::new("SAVE OK", 1, 4, 1000);
    pub const SAVE_FAIL: Banner = Banner::new("SAVE FAIL", 1, 3, 1000);
    /// Follows the save result when config mode is left with Key4.
    pub const BACK_TO_AUTO: Banner = Banner::new("AUTO MODE", 1, 3, 500);
    pub const AUTO_SAVE_OK: Banner = Banner::new("AUTO SAVE OK", 2, 0, 1000);
    pub const AUTO_SAVE_FAIL: Banner = Banner::new("AUTO SAVE FAIL", 2, 0, 1000);
}

/// Pending banners; the front one is on screen.
#[derive(Debug)]
struct BannerQueue {
    queue: Deque<Banner, BANNER_QUEUE>,
    since_ms: u32,
}

impl BannerQueue {
    const fn new() -> Self {
        Self {
            queue: Deque::new(),
            since_ms: 0,
        }
    }

    fn current(&self) -> Option<&Banner> {
        self.queue.front()
    }

    fn is_showing(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Queues a banner behind the pending ones. A full queue drops its
    /// oldest banner.
    fn push(&mut self, banner: Banner, display: &mut impl TextDisplay, now_ms: u32) {
        let mut front_changed = self.queue.is_empty();
        if self.queue.is_full() {
            #[cfg(feature = "debug-mode")]
            defmt::warn!("banner queue full, dropping oldest");
            self.queue.pop_front();
            front_changed = true;
        }
        if self.queue.push_back(banner).is_ok() && front_changed {
            self.show_front(display, now_ms);
        }
    }

    /// Drops every pending banner and shows `banner` at once.
    fn replace(&mut self, banner: Banner, display: &mut impl TextDisplay, now_ms: u32) {
        self.queue.clear();
        self.push(banner, display, now_ms);
    }

    fn show_front(&mut self, display: &mut impl TextDisplay, now_ms: u32) {
        if let Some(front) = self.queue.front() {
            self.since_ms = now_ms;
            draw_banner(front, display);
        }
    }

    /// Retires the front banner once its time is up and shows the next one.
    ///
    /// # Returns
    ///
    /// `true` when the last pending banner just ended
    fn expire(&mut self, display: &mut impl TextDisplay, now_ms: u32) -> bool {
        let Some(front) = self.queue.front() else {
            return false;
        };
        if now_ms.wrapping_sub(self.since_ms) < front.duration_ms {
            return false;
        }
        self.queue.pop_front();
        self.show_front(display, now_ms);
        !self.is_showing()
    }
}

fn draw_banner(banner: &Banner, display: &mut impl TextDisplay) {
    display.clear();
    display.write_str(banner.row, banner.col, banner.text);
}

/// What ended a config session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigExit {
    /// Key4 long press
    SaveKey,
    /// No key activity for the idle timeout
    IdleTimeout,
}

/// Top-level controller tying keys, sensors, lamps, screen and storage
/// together.
///
/// Generic over the three hardware seams so the whole state machine runs on
/// the host against test doubles.
pub struct Controller<O, D, F> {
    outputs: O,
    display: D,
    flash: ParamFlash<F>,
    params: ParamStore,
    engine: LightEngine,
    state: ModeState,
    dashboard: Dashboard,
    banners: BannerQueue,
}

impl<O: LampOutputs, D: TextDisplay, F: NorFlash> Controller<O, D, F> {
    /// Creates a controller in Auto mode with failed range readings treated
    /// as a clear road.
    ///
    /// # Arguments
    ///
    /// * `outputs` - Lamp PWM outputs, switched off here
    /// * `display` - Text surface for dashboard, editor and banners
    /// * `flash` - Parameter page; the thresholds are loaded from it
    pub fn new(outputs: O, display: D, flash: ParamFlash<F>) -> Self {
        Self::with_policy(outputs, display, flash, RangeFaultPolicy::default())
    }

    /// Creates a controller with an explicit range fault policy.
    pub fn with_policy(
        mut outputs: O,
        display: D,
        mut flash: ParamFlash<F>,
        policy: RangeFaultPolicy,
    ) -> Self {
        let params = ParamStore::load(&mut flash);

        #[cfg(feature = "debug-mode")]
        defmt::info!("thresholds: {}", params.thresholds());

        let mut engine = LightEngine::new(policy);
        engine.reset(&mut outputs);

        Self {
            outputs,
            display,
            flash,
            params,
            engine,
            state: ModeState::Auto,
            dashboard: Dashboard::new(),
            banners: BannerQueue::new(),
        }
    }

    /// Runs one control cycle.
    ///
    /// # Arguments
    ///
    /// * `env` - Latest sensor sample
    /// * `keys` - Key events; long presses of Key1 and Key4 are consumed
    ///   every cycle whatever the mode
    /// * `now_ms` - Current time, may wrap
    pub fn update(&mut self, env: &Environment, keys: &mut impl KeyEvents, now_ms: u32) {
        if self.banners.expire(&mut self.display, now_ms) {
            self.invalidate_screen();
        }

        let config_requested = keys.take_long_press(KeyId::Key1);
        let save_requested = keys.take_long_press(KeyId::Key4);

        match self.state.mode() {
            Mode::Config => {
                self.update_config(keys, save_requested, now_ms);
                return;
            }
            Mode::Auto if config_requested => {
                self.enter_config(&*keys, now_ms);
                return;
            }
            Mode::Auto | Mode::Manual => {}
        }

        if let Some(key) = keys.take_short_press() {
            self.handle_short_press(key, now_ms);
        }

        match self.state {
            ModeState::Auto => {
                self.engine.track_light(env.light);
                let thresholds = self.params.thresholds();
                self.engine.drive(env, &thresholds, &mut self.outputs);
            }
            ModeState::Manual => {
                self.engine.track_light(env.light);
            }
            ModeState::Config(_) => {}
        }

        if !self.banners.is_showing() {
            self.dashboard
                .render(env, self.state.mode(), &mut self.display, now_ms);
        }
    }

    /// Queues a banner, e.g. the start-up greeting.
    pub fn show_banner(&mut self, banner: Banner, now_ms: u32) {
        self.banners.push(banner, &mut self.display, now_ms);
    }

    /// Current operating mode.
    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    /// Text of the banner on screen, if any.
    pub fn banner(&self) -> Option<&'static str> {
        self.banners.current().map(|b| b.text)
    }

    /// Threshold editor, while in config mode.
    pub fn editor(&self) -> Option<&ConfigEditor> {
        match &self.state {
            ModeState::Config(editor) => Some(editor),
            _ => None,
        }
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn engine(&self) -> &LightEngine {
        &self.engine
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn flash(&self) -> &ParamFlash<F> {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut ParamFlash<F> {
        &mut self.flash
    }

    fn handle_short_press(&mut self, key: KeyId, now_ms: u32) {
        match (self.state.mode(), key) {
            (Mode::Manual, KeyId::Key1) => {
                self.engine.toggle_manual(Lamp::HighBeam, &mut self.outputs)
            }
            (Mode::Manual, KeyId::Key2) => {
                self.engine.toggle_manual(Lamp::LowBeam, &mut self.outputs)
            }
            (Mode::Manual, KeyId::Key3) => self.engine.toggle_manual(Lamp::Fog, &mut self.outputs),
            (Mode::Auto, KeyId::Key4) => {
                self.switch_to(ModeState::Manual);
                self.banners.replace(Banner::MANUAL_MODE, &mut self.display, now_ms);
            }
            (Mode::Manual, KeyId::Key4) => {
                self.switch_to(ModeState::Auto);
                self.banners.replace(Banner::AUTO_MODE, &mut self.display, now_ms);
            }
            _ => {}
        }
    }

    fn enter_config(&mut self, keys: &impl KeyEvents, now_ms: u32) {
        #[cfg(feature = "debug-mode")]
        defmt::info!("entering config mode");

        let editor = ConfigEditor::enter(&mut self.params, keys, now_ms);
        self.state = ModeState::Config(editor);
        self.show_banner(Banner::CONFIG_MODE, now_ms);
    }

    fn update_config(&mut self, keys: &mut impl KeyEvents, save_requested: bool, now_ms: u32) {
        if save_requested {
            self.leave_config(ConfigExit::SaveKey, now_ms);
            return;
        }

        let ModeState::Config(editor) = &mut self.state else {
            return;
        };
        editor.handle_keys(keys, &mut self.params, now_ms);
        if !self.banners.is_showing() {
            editor.render(&self.params, &mut self.display, now_ms);
        }
        if editor.poll_timeout(now_ms) {
            self.leave_config(ConfigExit::IdleTimeout, now_ms);
        }
    }

    /// Commits and persists the edited thresholds, then returns to Auto.
    fn leave_config(&mut self, exit: ConfigExit, now_ms: u32) {
        self.params.commit();
        let saved = self.save_params();

        match (exit, saved.is_ok()) {
            (ConfigExit::SaveKey, true) => self.show_banner(Banner::SAVE_OK, now_ms),
            (ConfigExit::SaveKey, false) => self.show_banner(Banner::SAVE_FAIL, now_ms),
            (ConfigExit::IdleTimeout, true) => self.show_banner(Banner::AUTO_SAVE_OK, now_ms),
            (ConfigExit::IdleTimeout, false) => self.show_banner(Banner::AUTO_SAVE_FAIL, now_ms),
        }
        if exit == ConfigExit::SaveKey {
            self.show_banner(Banner::BACK_TO_AUTO, now_ms);
        }

        self.switch_to(ModeState::Auto);
    }

    fn save_params(&mut self) -> Result<(), StoreError> {
        let result = self.params.save(&mut self.flash);
        #[cfg(feature = "debug-mode")]
        match &result {
            Ok(()) => defmt::info!("thresholds saved: {}", self.params.thresholds()),
            Err(e) => defmt::error!("saving thresholds failed: {}", defmt::Debug2Format(e)),
        }
        result
    }

    /// Changes mode, switching every lamp off and clearing engine state.
    fn switch_to(&mut self, state: ModeState) {
        #[cfg(feature = "debug-mode")]
        defmt::info!("mode {} -> {}", self.state.mode(), state.mode());

        self.engine.reset(&mut self.outputs);
        self.state = state;
        self.dashboard.invalidate();
    }

    fn invalidate_screen(&mut self) {
        match &mut self.state {
            ModeState::Config(editor) => editor.invalidate(),
            ModeState::Auto | ModeState::Manual => self.dashboard.invalidate(),
        }
    }
}
