//! Board-agnostic dispense logic for the cocktail machine
//!
//! This crate contains all pump coordination logic that does not depend on
//! specific hardware implementations:
//!
//! - Pump driver trait and the pump arena (per-pump exclusive access)
//! - Calibration engine (volume to actuation time)
//! - Safety validation (all-or-nothing admission)
//! - Preparation and cleaning orchestration with explicit state machines
//! - Emergency stop controller
//! - Configuration type definitions
//!
//! Everything is driven through [`Machine`], which owns the pump array and
//! the shared safety state.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// Must come first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub mod calibration;
pub mod cleaning;
pub mod config;
mod dispatch;
pub mod estop;
pub mod machine;
pub mod preparation;
pub mod pump;
pub mod safety;
pub mod state;
pub mod traits;

#[cfg(test)]
mod testing;

pub use machine::Machine;
