//! Simulated pump
//!
//! Stands in for the H-bridge on hosts without GPIO. Tracks run time so a
//! front end can show how much liquid would have been pumped, and can be
//! told to fail its next start.

use embassy_time::{Duration, Instant};
use mixology_core::config::{PumpConfig, PumpId};
use mixology_core::traits::{PumpDriver, PumpFault};

/// Pump that only keeps time
#[derive(Debug)]
pub struct SimulatedPump {
    id: PumpId,
    flow_rate_ml_s: f32,
    started_at: Option<Instant>,
    total_run: Duration,
    starts: u32,
    fail_next_start: Option<PumpFault>,
}

impl SimulatedPump {
    /// Create a stopped pump
    pub fn new(id: PumpId, flow_rate_ml_s: f32) -> Self {
        Self {
            id,
            flow_rate_ml_s,
            started_at: None,
            total_run: Duration::from_ticks(0),
            starts: 0,
            fail_next_start: None,
        }
    }

    /// Create a pump matching a configuration entry
    ///
    /// Uses the true flow rate, so a miscalibrated factor shows up as a
    /// volume error.
    pub fn from_config(config: &PumpConfig) -> Self {
        Self::new(config.id, config.flow_rate_ml_s)
    }

    /// Pump id
    pub fn id(&self) -> PumpId {
        self.id
    }

    /// Make the next `start` fail with `fault`
    pub fn fail_next_start(&mut self, fault: PumpFault) {
        self.fail_next_start = Some(fault);
    }

    /// Number of successful starts
    pub fn starts(&self) -> u32 {
        self.starts
    }

    /// Total time driven, including the current run
    pub fn total_run(&self) -> Duration {
        match self.started_at {
            Some(at) => self.total_run + at.elapsed(),
            None => self.total_run,
        }
    }

    /// Volume pumped at the nominal flow rate (ml)
    pub fn pumped_ml(&self) -> f32 {
        self.total_run().as_micros() as f32 / 1_000_000.0 * self.flow_rate_ml_s
    }
}

impl PumpDriver for SimulatedPump {
    fn start(&mut self) -> Result<(), PumpFault> {
        if let Some(fault) = self.fail_next_start.take() {
            return Err(fault);
        }
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PumpFault> {
        if let Some(at) = self.started_at.take() {
            self.total_run += at.elapsed();
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.started_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait(ms: u64) {
        let end = Instant::now() + Duration::from_millis(ms);
        while Instant::now() < end {
            std::thread::yield_now();
        }
    }

    #[test]
    fn test_accumulates_run_time() {
        let mut pump = SimulatedPump::new(1, 100.0);
        pump.start().unwrap();
        assert!(pump.is_running());
        wait(20);
        pump.stop().unwrap();
        assert!(!pump.is_running());

        let first = pump.total_run();
        assert!(first >= Duration::from_millis(20));

        pump.start().unwrap();
        wait(20);
        pump.stop().unwrap();
        assert!(pump.total_run() >= first + Duration::from_millis(20));
        assert!(pump.pumped_ml() >= 4.0);
        assert_eq!(pump.starts(), 2);
    }

    #[test]
    fn test_stop_when_stopped() {
        let mut pump = SimulatedPump::new(1, 1.0);
        pump.stop().unwrap();
        assert_eq!(pump.total_run(), Duration::from_ticks(0));
    }

    #[test]
    fn test_injected_fault_fires_once() {
        let mut pump = SimulatedPump::from_config(&PumpConfig::new(3, "Tonic", 5.0));
        assert_eq!(pump.id(), 3);
        pump.fail_next_start(PumpFault::Stalled);
        assert_eq!(pump.start(), Err(PumpFault::Stalled));
        assert!(!pump.is_running());
        assert!(pump.start().is_ok());
    }
}
