//! Hardware abstraction traits
//!
//! These traits define the interface between the dispense logic and the
//! pump driver implementations.

pub mod pump;

pub use pump::{PumpDriver, PumpFault};
