//! Peristaltic pump drivers
//!
//! Both drivers implement the same contract, so the dispense engine is
//! identical whichever one is selected at startup.

pub mod simulated;
pub mod tb6612;

pub use simulated::SimulatedPump;
pub use tb6612::Tb6612Channel;
