//! Tunable threshold parameters and their flash persistence.
//!
//! Four thresholds (light, speed, distance, humidity) steer the light
//! decision engine. Each has a committed value, used by the engine, and a
//! temp value, edited in config mode and copied over on commit.
//!
//! # Flash record
//!
//! The parameters live in one dedicated flash page as four little-endian
//! 32-bit words:
//!
//! ```text
//! offset  word
//! 0x0     magic    0x504D4150 ("PMAP")
//! 0x4     version  1
//! 0x8     count    4
//! 0xC     packed   parameter i in bits i*8 .. i*8+8
//! ```
//!
//! An erased page (all `0xFF`) fails the magic check, so a fresh device boots
//! with defaults.

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

/// Number of tunable parameters.
pub const PARAM_COUNT: usize = 4;

/// Largest valid parameter value.
pub const PARAM_MAX: u8 = 100;

/// Record marker, ASCII "PMAP".
pub const RECORD_MAGIC: u32 = 0x504D_4150;

/// Record layout version.
pub const RECORD_VERSION: u32 = 1;

/// Parameter count written by the older layout that also stored a
/// temperature threshold. Its first four bytes are still valid.
const LEGACY_COUNT: u32 = 5;

/// Size of the record in bytes.
pub const RECORD_LEN: usize = 16;

/// Identifies a tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamId {
    /// Ambient light threshold, percent
    Light,
    /// Vehicle speed threshold, cm/s
    Speed,
    /// Obstacle distance threshold, cm
    Distance,
    /// Relative humidity threshold, percent
    Humidity,
}

impl ParamId {
    /// All parameters in display and record order.
    pub const ALL: [ParamId; PARAM_COUNT] = [
        ParamId::Light,
        ParamId::Speed,
        ParamId::Distance,
        ParamId::Humidity,
    ];

    /// Zero-based index of the parameter.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Parameter for an index, `None` when out of range.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Display metadata and default of the parameter.
    pub fn info(self) -> &'static ParamInfo {
        &PARAM_TABLE[self.index()]
    }
}

/// Display metadata of a parameter.
#[derive(Debug)]
pub struct ParamInfo {
    /// Three letter name shown in the config list
    pub name: &'static str,
    /// Letter shown in the bottom-right corner while selected
    pub symbol: char,
    /// Unit suffix
    pub unit: &'static str,
    /// Longer description
    pub description: &'static str,
    /// Factory value
    pub default: u8,
}

static PARAM_TABLE: [ParamInfo; PARAM_COUNT] = [
    ParamInfo {
        name: "LUX",
        symbol: 'L',
        unit: "lx",
        description: "Light threshold",
        default: 60,
    },
    ParamInfo {
        name: "SPD",
        symbol: 'S',
        unit: "cm/s",
        description: "Speed threshold",
        default: 40,
    },
    ParamInfo {
        name: "DIS",
        symbol: 'D',
        unit: "cm",
        description: "Distance threshold",
        default: 50,
    },
    ParamInfo {
        name: "HUM",
        symbol: 'H',
        unit: "%",
        description: "Humidity threshold",
        default: 85,
    },
];

/// Committed thresholds handed to the light decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Thresholds {
    pub light: u8,
    pub speed: u8,
    pub distance: u8,
    pub humidity: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        ParamStore::new().thresholds()
    }
}

/// Errors raised while persisting the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The parameter page could not be erased.
    #[error("flash erase failed: {0:?}")]
    Erase(NorFlashErrorKind),

    /// The record could not be programmed.
    #[error("flash write failed: {0:?}")]
    Write(NorFlashErrorKind),
}

/// Flash page holding the parameter record.
///
/// Wraps any `embedded-storage` NOR flash. `offset` is the start of an
/// erase page reserved for the record.
pub struct ParamFlash<F> {
    flash: F,
    offset: u32,
}

impl<F: NorFlash> ParamFlash<F> {
    /// # Arguments
    ///
    /// * `flash` - NOR flash driver
    /// * `offset` - Page-aligned offset of the parameter page
    pub fn new(flash: F, offset: u32) -> Self {
        Self { flash, offset }
    }

    /// Reads the raw record, `None` if the flash read fails.
    fn read_record(&mut self) -> Option<[u8; RECORD_LEN]> {
        let mut bytes = [0u8; RECORD_LEN];
        self.flash.read(self.offset, &mut bytes).ok()?;
        Some(bytes)
    }

    /// Erases the page, then programs the record.
    fn write_record(&mut self, bytes: &[u8; RECORD_LEN]) -> Result<(), StoreError> {
        let page = F::ERASE_SIZE as u32;
        self.flash
            .erase(self.offset, self.offset + page)
            .map_err(|e| StoreError::Erase(e.kind()))?;
        self.flash
            .write(self.offset, bytes)
            .map_err(|e| StoreError::Write(e.kind()))?;
        Ok(())
    }

    /// Underlying flash driver.
    pub fn inner(&self) -> &F {
        &self.flash
    }

    /// Mutable access to the underlying flash driver.
    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.flash
    }
}

/// Committed and in-edit values of all parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamStore {
    committed: [u8; PARAM_COUNT],
    temp: [u8; PARAM_COUNT],
}

impl ParamStore {
    /// Store holding factory defaults.
    pub fn new() -> Self {
        let defaults = PARAM_TABLE.each_ref().map(|p| p.default);
        Self {
            committed: defaults,
            temp: defaults,
        }
    }

    /// Loads the parameters from flash.
    ///
    /// A bad header or failed read yields defaults for every parameter; a
    /// stored value above [`PARAM_MAX`] yields the default for that
    /// parameter only.
    pub fn load<F: NorFlash>(flash: &mut ParamFlash<F>) -> Self {
        let mut store = Self::new();
        match flash.read_record() {
            Some(bytes) => store.apply_record(&bytes),
            None => {
                #[cfg(feature = "debug-mode")]
                defmt::warn!("parameter page unreadable, using defaults");
            }
        }
        store
    }

    /// Writes the committed values to flash.
    pub fn save<F: NorFlash>(&self, flash: &mut ParamFlash<F>) -> Result<(), StoreError> {
        flash.write_record(&self.to_record())
    }

    /// Replaces committed and temp values with the factory defaults.
    pub fn reset_to_defaults(&mut self) {
        *self = Self::new();
    }

    /// Encodes the committed values as a flash record.
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let packed = self
            .committed
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, &v)| acc | (u32::from(v) << (i * 8)));

        let mut bytes = [0u8; RECORD_LEN];
        let words = [RECORD_MAGIC, RECORD_VERSION, PARAM_COUNT as u32, packed];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Decodes a flash record over the current values.
    ///
    /// Leaves defaults in place when the header does not match.
    pub fn apply_record(&mut self, bytes: &[u8; RECORD_LEN]) {
        let mut words = [0u32; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let [magic, version, count, packed] = words;

        if magic != RECORD_MAGIC
            || version != RECORD_VERSION
            || (count != PARAM_COUNT as u32 && count != LEGACY_COUNT)
        {
            #[cfg(feature = "debug-mode")]
            defmt::info!("no valid parameter record, using defaults");
            self.reset_to_defaults();
            return;
        }

        for id in ParamId::ALL {
            let value = (packed >> (id.index() * 8)) as u8;
            self.committed[id.index()] = if value <= PARAM_MAX {
                value
            } else {
                #[cfg(feature = "debug-mode")]
                defmt::warn!("stored {} out of range: {}", id, value);
                id.info().default
            };
        }
        self.temp = self.committed;
    }

    /// Committed value of a parameter.
    pub fn value(&self, id: ParamId) -> u8 {
        self.committed[id.index()]
    }

    /// Committed value by index; 0 for an out-of-range index.
    pub fn value_at(&self, index: usize) -> u8 {
        self.committed.get(index).copied().unwrap_or(0)
    }

    /// In-edit value of a parameter.
    pub fn temp_value(&self, id: ParamId) -> u8 {
        self.temp[id.index()]
    }

    /// Starts an edit session: temp values mirror the committed ones.
    pub fn begin_edit(&mut self) {
        self.temp = self.committed;
    }

    /// Increments a temp value, wrapping 100 to 0.
    pub fn increment(&mut self, id: ParamId) {
        let value = &mut self.temp[id.index()];
        *value = if *value >= PARAM_MAX { 0 } else { *value + 1 };
    }

    /// Decrements a temp value, wrapping 0 to 100.
    pub fn decrement(&mut self, id: ParamId) {
        let value = &mut self.temp[id.index()];
        *value = if *value == 0 || *value > PARAM_MAX {
            PARAM_MAX
        } else {
            *value - 1
        };
    }

    /// Copies every temp value to its committed value.
    pub fn commit(&mut self) {
        self.committed = self.temp;
    }

    /// Committed thresholds for the decision engine.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            light: self.value(ParamId::Light),
            speed: self.value(ParamId::Speed),
            distance: self.value(ParamId::Distance),
            humidity: self.value(ParamId::Humidity),
        }
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RamFlash;

    const PAGE: u32 = 0x400;

    fn flash_with(record: [u8; RECORD_LEN]) -> ParamFlash<RamFlash> {
        let mut ram = RamFlash::new();
        ram.preload(PAGE, &record);
        ParamFlash::new(ram, PAGE)
    }

    fn record(magic: u32, version: u32, count: u32, values: [u8; 4]) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0..4].copy_from_slice(&magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&version.to_le_bytes());
        bytes[8..12].copy_from_slice(&count.to_le_bytes());
        bytes[12..16].copy_from_slice(&values);
        bytes
    }

    #[test]
    fn defaults_match_parameter_table() {
        let store = ParamStore::new();
        assert_eq!(
            store.thresholds(),
            Thresholds {
                light: 60,
                speed: 40,
                distance: 50,
                humidity: 85
            }
        );
        assert_eq!(store.temp_value(ParamId::Humidity), 85);
    }

    #[test]
    fn increment_wraps_from_100_to_0() {
        let mut store = ParamStore::new();
        store.begin_edit();
        for _ in 0..40 {
            store.increment(ParamId::Light);
        }
        assert_eq!(store.temp_value(ParamId::Light), 100);
        store.increment(ParamId::Light);
        assert_eq!(store.temp_value(ParamId::Light), 0);
    }

    #[test]
    fn decrement_wraps_from_0_to_100() {
        let mut store = ParamStore::new();
        for _ in 0..40 {
            store.decrement(ParamId::Speed);
        }
        assert_eq!(store.temp_value(ParamId::Speed), 0);
        store.decrement(ParamId::Speed);
        assert_eq!(store.temp_value(ParamId::Speed), 100);
    }

    #[test]
    fn values_stay_in_range_under_any_edit_sequence() {
        let mut store = ParamStore::new();
        for step in 0..1000u32 {
            let id = ParamId::ALL[(step % 4) as usize];
            if step % 3 == 0 {
                store.decrement(id);
            } else {
                store.increment(id);
            }
            assert!(ParamId::ALL.iter().all(|&p| store.temp_value(p) <= PARAM_MAX));
        }
    }

    #[test]
    fn edits_only_apply_after_commit() {
        let mut store = ParamStore::new();
        store.begin_edit();
        store.increment(ParamId::Distance);
        assert_eq!(store.value(ParamId::Distance), 50);
        store.commit();
        assert_eq!(store.value(ParamId::Distance), 51);
    }

    #[test]
    fn begin_edit_discards_uncommitted_changes() {
        let mut store = ParamStore::new();
        store.increment(ParamId::Light);
        store.begin_edit();
        assert_eq!(store.temp_value(ParamId::Light), 60);
    }

    #[test]
    fn value_at_out_of_range_is_zero() {
        let store = ParamStore::new();
        assert_eq!(store.value_at(1), 40);
        assert_eq!(store.value_at(PARAM_COUNT), 0);
        assert_eq!(ParamId::from_index(7), None);
    }

    #[test]
    fn save_then_load_reproduces_committed_values() {
        let mut flash = ParamFlash::new(RamFlash::new(), PAGE);
        let mut store = ParamStore::new();
        store.increment(ParamId::Light);
        store.decrement(ParamId::Speed);
        for _ in 0..30 {
            store.increment(ParamId::Humidity);
        }
        store.commit();
        store.save(&mut flash).unwrap();

        let loaded = ParamStore::load(&mut flash);
        assert_eq!(loaded.thresholds(), store.thresholds());
        assert_eq!(loaded.temp_value(ParamId::Humidity), store.value(ParamId::Humidity));
    }

    #[test]
    fn erased_page_loads_defaults() {
        let mut flash = ParamFlash::new(RamFlash::new(), PAGE);
        assert_eq!(ParamStore::load(&mut flash), ParamStore::new());
    }

    #[test]
    fn wrong_magic_loads_defaults() {
        let mut flash = flash_with(record(0xDEAD_BEEF, 1, 4, [10, 20, 30, 40]));
        assert_eq!(ParamStore::load(&mut flash), ParamStore::new());
    }

    #[test]
    fn wrong_version_loads_defaults() {
        let mut flash = flash_with(record(RECORD_MAGIC, 2, 4, [10, 20, 30, 40]));
        assert_eq!(ParamStore::load(&mut flash), ParamStore::new());
    }

    #[test]
    fn wrong_count_loads_defaults() {
        let mut flash = flash_with(record(RECORD_MAGIC, 1, 3, [10, 20, 30, 40]));
        assert_eq!(ParamStore::load(&mut flash), ParamStore::new());
    }

    #[test]
    fn legacy_five_parameter_count_is_accepted() {
        let mut flash = flash_with(record(RECORD_MAGIC, 1, 5, [10, 20, 30, 40]));
        let store = ParamStore::load(&mut flash);
        assert_eq!(store.value(ParamId::Light), 10);
        assert_eq!(store.value(ParamId::Humidity), 40);
    }

    #[test]
    fn out_of_range_byte_falls_back_for_that_parameter_only() {
        let mut flash = flash_with(record(RECORD_MAGIC, 1, 4, [10, 101, 30, 255]));
        let store = ParamStore::load(&mut flash);
        assert_eq!(store.value(ParamId::Light), 10);
        assert_eq!(store.value(ParamId::Speed), 40);
        assert_eq!(store.value(ParamId::Distance), 30);
        assert_eq!(store.value(ParamId::Humidity), 85);
    }

    #[test]
    fn record_layout_is_little_endian_words() {
        let bytes = ParamStore::new().to_record();
        assert_eq!(&bytes[0..4], &[0x50, 0x41, 0x4D, 0x50]);
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[4, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[60, 40, 50, 85]);
    }

    #[test]
    fn save_reports_erase_failure() {
        let mut ram = RamFlash::new();
        ram.fail_erase = true;
        let mut flash = ParamFlash::new(ram, PAGE);
        assert_eq!(
            ParamStore::new().save(&mut flash),
            Err(StoreError::Erase(NorFlashErrorKind::Other))
        );
    }

    #[test]
    fn save_reports_write_failure() {
        let mut ram = RamFlash::new();
        ram.fail_write = true;
        let mut flash = ParamFlash::new(ram, PAGE);
        assert_eq!(
            ParamStore::new().save(&mut flash),
            Err(StoreError::Write(NorFlashErrorKind::Other))
        );
    }

    #[test]
    fn unreadable_flash_loads_defaults() {
        let mut ram = RamFlash::new();
        ram.preload(PAGE, &record(RECORD_MAGIC, 1, 4, [1, 2, 3, 4]));
        ram.fail_read = true;
        let mut flash = ParamFlash::new(ram, PAGE);
        assert_eq!(ParamStore::load(&mut flash), ParamStore::new());
    }

    #[test]
    fn reset_to_defaults_restores_both_value_sets() {
        let mut store = ParamStore::new();
        store.increment(ParamId::Light);
        store.commit();
        store.increment(ParamId::Light);
        store.reset_to_defaults();
        assert_eq!(store, ParamStore::new());
    }
}
