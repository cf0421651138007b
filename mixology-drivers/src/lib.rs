//! Pump driver implementations
//!
//! Concrete [`PumpDriver`](mixology_core::traits::PumpDriver) variants:
//!
//! - TB6612FNG H-bridge channel over `embedded-hal` pins
//! - Simulated pump for hosts without GPIO

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod pump;
