//! Adaptive headlight controller.
//!
//! # Overview
//!
//! Drives the high beam, low beam and fog light of a small vehicle from
//! ambient light, speed, obstacle distance and humidity readings:
//! - Auto mode picks and smooths lamp duty cycles from the readings
//! - Manual mode lets the driver toggle each lamp with a key
//! - Config mode edits the four decision thresholds on a 4 x 16 text screen
//!   and persists them to a flash page
//!
//! # Module Organization
//!
//! - [`keypad`] - Debounced four-key input with short, long and repeat
//!   presses
//! - [`params`] - Thresholds and their flash record
//! - [`config_editor`] - Threshold editing screen
//! - [`lighting`] - Lamp decision rules, smoothing and tunnel detection
//! - [`controller`] - Mode state machine tying everything together
//! - [`display`] - Text surface abstraction and frame buffer
//! - [`dashboard`] - Live readings screen
//! - [`sensors`] - Raw sensor reading conversions
//!
//! Everything here is hardware independent: lamps, screen and flash are
//! reached through [`lighting::LampOutputs`], [`display::TextDisplay`] and
//! `embedded_storage::nor_flash::NorFlash`. The firmware binary binds them
//! to the STM32F103 peripherals.

#![cfg_attr(not(test), no_std)]

pub mod config_editor;
pub mod controller;
pub mod dashboard;
pub mod display;
pub mod keypad;
pub mod lighting;
pub mod params;
pub mod sensors;

#[cfg(test)]
mod testing;

pub use controller::{Banner, Controller, Mode};
pub use display::{FrameBuffer, TextDisplay};
pub use keypad::{KeyEvents, KeyId, KeyPad, KeyTiming};
pub use lighting::{Environment, Lamp, LampOutputs, RangeFaultPolicy};
pub use params::{ParamFlash, ParamId, ParamStore, StoreError, Thresholds};
