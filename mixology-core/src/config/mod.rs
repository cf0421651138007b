//! Configuration types
//!
//! Board-agnostic configuration structures. The application loads them from
//! TOML; calibration results are stored separately as postcard binary data.

pub mod calibration;
pub mod hardware;
pub mod types;

pub use calibration::{CalibrationData, PumpCalibration};
pub use hardware::*;
pub use types::*;
