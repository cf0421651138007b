//! Emergency stop controller
//!
//! One process-wide latch. Triggering it halts every pump inside a single
//! critical section, so no actuation can start between the latch being set
//! and the last pump being stopped. The latch never clears itself.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::pump::{PumpArray, PumpError};
use crate::state::{publish, MachineEvent};
use crate::traits::PumpDriver;

/// Where an emergency stop came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HaltSource {
    /// Hardware interrupt line (index into the configured trigger list)
    Line(u8),
    /// Operator control in the UI
    Operator,
    /// Internal safety condition
    Internal,
}

#[derive(Debug, Clone, Copy, Default)]
struct Latch {
    active: bool,
    /// Incremented on every trigger; sessions compare it to detect a halt
    epoch: u32,
    source: Option<HaltSource>,
}

/// Process-wide emergency stop
pub struct EmergencyStop {
    latch: Mutex<CriticalSectionRawMutex, Cell<Latch>>,
}

impl Default for EmergencyStop {
    fn default() -> Self {
        Self::new()
    }
}

impl EmergencyStop {
    /// Create an inactive controller
    pub const fn new() -> Self {
        Self {
            latch: Mutex::new(Cell::new(Latch {
                active: false,
                epoch: 0,
                source: None,
            })),
        }
    }

    /// Halt every pump and latch the stop
    pub fn trigger_halt<D: PumpDriver>(&self, pumps: &PumpArray<D>, source: HaltSource) {
        let first = self.latch.lock(|latch| {
            let mut state = latch.get();
            let first = !state.active;
            state.active = true;
            state.epoch = state.epoch.wrapping_add(1);
            state.source = Some(source);
            latch.set(state);

            pumps.halt_all();
            first
        });

        error!("emergency stop triggered: {:?}", source);
        if first {
            publish(pumps.events(), MachineEvent::EmergencyHalt { active: true });
        }
    }

    /// Release the latch
    ///
    /// Pumps stay EmergencyHalted until each is reset.
    pub fn clear_halt<D: PumpDriver>(&self, pumps: &PumpArray<D>) {
        let was_active = self.latch.lock(|latch| {
            let mut state = latch.get();
            let was_active = state.active;
            state.active = false;
            state.source = None;
            latch.set(state);
            was_active
        });

        if was_active {
            info!("emergency stop cleared");
            publish(pumps.events(), MachineEvent::EmergencyHalt { active: false });
        }
    }

    /// Whether the stop is latched
    pub fn is_halted(&self) -> bool {
        self.latch.lock(|latch| latch.get().active)
    }

    /// Trigger counter
    pub fn epoch(&self) -> u32 {
        self.latch.lock(|latch| latch.get().epoch)
    }

    /// Source of the active stop
    pub fn source(&self) -> Option<HaltSource> {
        self.latch.lock(|latch| latch.get().source)
    }

    /// Run `f` only while the stop is clear, atomically with respect to
    /// [`trigger_halt`](Self::trigger_halt)
    pub fn while_clear<R>(&self, f: impl FnOnce() -> Result<R, PumpError>) -> Result<R, PumpError> {
        self.latch.lock(|latch| {
            if latch.get().active {
                Err(PumpError::HaltedState)
            } else {
                f()
            }
        })
    }
}
