//! Pump units and the pump arena
//!
//! Each pump is a [`PumpUnit`] with its own lock, so unrelated pumps never
//! contend. The [`PumpArray`] addresses units by stable id and records which
//! job currently holds which pump.

pub mod array;
pub mod unit;

pub use array::{Claim, ClaimError, Holder, PumpArray};
pub use unit::{Actuation, PumpUnit};

use embassy_time::Duration;

use crate::config::PumpId;
use crate::traits::PumpFault;

/// Runtime state of a pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PumpState {
    /// Stopped and available
    #[default]
    Idle,
    /// Driven for an actuation
    Running,
    /// Hardware fault or timeout; needs reset
    Faulted,
    /// Stopped by the emergency stop; needs reset
    EmergencyHalted,
}

impl PumpState {
    /// Check if the pump needs an operator reset before it can run again
    pub fn needs_reset(&self) -> bool {
        matches!(self, PumpState::Faulted | PumpState::EmergencyHalted)
    }
}

/// Errors from pump operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PumpError {
    /// Pump is not idle
    AlreadyBusy,
    /// Pump is configured off
    Disabled,
    /// Pump is emergency-halted
    HaltedState,
    /// Actuation exceeded the per-pump ceiling
    Timeout,
    /// Actuation was cut short by a halt
    Interrupted,
    /// Driver reported a hardware fault
    Fault(PumpFault),
    /// No pump with this id
    UnknownPump(PumpId),
}

impl core::fmt::Display for PumpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PumpError::AlreadyBusy => write!(f, "pump busy"),
            PumpError::Disabled => write!(f, "pump disabled"),
            PumpError::HaltedState => write!(f, "pump emergency-halted"),
            PumpError::Timeout => write!(f, "actuation timed out"),
            PumpError::Interrupted => write!(f, "actuation interrupted"),
            PumpError::Fault(fault) => write!(f, "hardware fault: {}", fault),
            PumpError::UnknownPump(id) => write!(f, "unknown pump {}", id),
        }
    }
}

impl core::error::Error for PumpError {}

/// Failed actuation with the time the pump actually ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActuationError {
    /// What went wrong
    pub error: PumpError,
    /// Time the pump was driven before it stopped
    pub elapsed: Duration,
}

impl ActuationError {
    /// Refusal before the pump was started
    pub const fn refused(error: PumpError) -> Self {
        Self {
            error,
            elapsed: Duration::from_ticks(0),
        }
    }
}

impl core::fmt::Display for ActuationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} after {} ms", self.error, self.elapsed.as_millis())
    }
}

impl core::error::Error for ActuationError {}
