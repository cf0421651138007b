//! Test doubles shared by the unit tests

use crate::state::EventBus;
use crate::traits::{PumpDriver, PumpFault};

/// Recording pump driver
#[derive(Debug, Default)]
pub struct TestPump {
    pub starts: u32,
    pub stops: u32,
    pub running: bool,
    /// Set when `start` is called on a pump that is already driven
    pub overlapped: bool,
    /// Fault returned by the next `start`
    pub fail_start: Option<PumpFault>,
}

impl PumpDriver for TestPump {
    fn start(&mut self) -> Result<(), PumpFault> {
        if let Some(fault) = self.fail_start {
            return Err(fault);
        }
        if self.running {
            self.overlapped = true;
        }
        self.starts += 1;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PumpFault> {
        self.stops += 1;
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

pub fn bus() -> EventBus {
    EventBus::new()
}
