//! Calibration engine
//!
//! Converts target volumes into actuation durations per pump and refines
//! each pump's calibration factor from measured test pours.

pub mod engine;

pub use engine::{duration_for_volume, volume_for_duration, CalibrationEngine, CalibrationError};
