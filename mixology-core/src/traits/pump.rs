//! Pump driver trait
//!
//! A pump driver switches one peristaltic pump on and off. Timing is owned
//! by the pump unit; drivers never sleep.

/// Hardware-reported pump faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PumpFault {
    /// Driver pin or PWM write failed
    Driver,
    /// Motor stalled (blocked tube, dry run)
    Stalled,
    /// Over-current reported by the driver
    Overcurrent,
    /// Pump disconnected
    Disconnected,
}

impl core::fmt::Display for PumpFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            PumpFault::Driver => "driver write failed",
            PumpFault::Stalled => "pump stalled",
            PumpFault::Overcurrent => "over-current",
            PumpFault::Disconnected => "pump disconnected",
        };
        f.write_str(s)
    }
}

/// Trait for pump drivers
///
/// Both calls must return quickly; they are made while the pump's lock is
/// held. `stop` is called on every halt, so it must be safe to call on an
/// already stopped pump.
pub trait PumpDriver {
    /// Start pumping forward
    fn start(&mut self) -> Result<(), PumpFault>;

    /// Stop pumping
    fn stop(&mut self) -> Result<(), PumpFault>;

    /// Check if the pump is currently driven
    fn is_running(&self) -> bool;
}
