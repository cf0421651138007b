//! Machine facade
//!
//! Owns the pump array, emergency stop, calibration engine and maintenance
//! bookkeeping, and hands out session ids. Front ends talk to this type
//! only.

use core::cell::{Cell, RefCell};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::pubsub;
use embassy_time::Duration;
use heapless::Vec;

use crate::calibration::{CalibrationEngine, CalibrationError};
use crate::cleaning::{
    runnable_kinds, CleaningCycle, CleaningHistory, CleaningKind, CleaningRecord, CleaningRequest,
    CleaningScheduler, CleaningTarget,
};
use crate::config::{
    CalibrationData, ConfigError, MachineConfig, PumpCalibration, PumpConfig, PumpId, Recipe,
};
use crate::estop::{EmergencyStop, HaltSource};
use crate::preparation::{AdmissionError, DoseMode, PreparationOrchestrator, PreparationSession};
use crate::pump::{PumpArray, PumpError};
use crate::state::{EventBus, EventSubscriber, SessionState};
use crate::traits::{PumpDriver, PumpFault};

#[derive(Debug, Default)]
struct MaintenanceLog {
    history: CleaningHistory,
    cocktails_since_cleaning: u32,
}

/// The dispense engine
pub struct Machine<D> {
    config: MachineConfig,
    pumps: PumpArray<D>,
    estop: EmergencyStop,
    calibration: CalibrationEngine,
    next_id: Mutex<CriticalSectionRawMutex, Cell<u32>>,
    maintenance: Mutex<CriticalSectionRawMutex, RefCell<MaintenanceLog>>,
    calibration_log: Mutex<CriticalSectionRawMutex, RefCell<CalibrationData>>,
}

impl<D: PumpDriver> Machine<D> {
    /// Validate `config` and build one driver per configured pump
    pub fn new(
        config: MachineConfig,
        make_driver: impl FnMut(&PumpConfig) -> D,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pumps = PumpArray::new(&config.pumps, make_driver)?;
        let calibration = CalibrationEngine::new(config.calibration);

        info!(
            "machine ready: {} pumps, max {} ml per cocktail",
            pumps.len(),
            config.safety.max_volume_ml
        );

        Ok(Self {
            config,
            pumps,
            estop: EmergencyStop::new(),
            calibration,
            next_id: Mutex::new(Cell::new(1)),
            maintenance: Mutex::new(RefCell::new(MaintenanceLog::default())),
            calibration_log: Mutex::new(RefCell::new(CalibrationData::new())),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The pump array
    pub fn pumps(&self) -> &PumpArray<D> {
        &self.pumps
    }

    /// Progress event bus
    pub fn events(&self) -> &EventBus {
        self.pumps.events()
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> Result<EventSubscriber<'_>, pubsub::Error> {
        self.pumps.subscribe()
    }

    fn next_id(&self) -> u32 {
        self.next_id.lock(|id| {
            let next = id.get();
            id.set(next.wrapping_add(1).max(1));
            next
        })
    }

    fn orchestrator(&self) -> PreparationOrchestrator<'_, D> {
        PreparationOrchestrator::new(
            &self.pumps,
            &self.estop,
            &self.calibration,
            &self.config.safety,
        )
    }

    // ---- Preparation ----

    /// Prepare a cocktail
    pub async fn prepare(
        &self,
        recipe: &Recipe,
        dose: DoseMode,
    ) -> Result<PreparationSession, AdmissionError> {
        let session = self.orchestrator().prepare(self.next_id(), recipe, dose).await?;
        if session.state.dispensed_anything() {
            self.maintenance
                .lock(|log| log.borrow_mut().cocktails_since_cleaning += 1);
        }
        Ok(session)
    }

    /// Pour `volume_ml` from one pump so the operator can measure it
    ///
    /// Runs through the same admission checks as a cocktail, alcohol limit
    /// included, but does not count toward cleaning.
    pub async fn test_pour(
        &self,
        pump: PumpId,
        volume_ml: f32,
    ) -> Result<PreparationSession, AdmissionError> {
        let config = self
            .config
            .find_pump(pump)
            .ok_or(AdmissionError::UnknownPump(pump))?;
        let recipe = Recipe::new("test-pour").with(
            config.ingredient.as_str(),
            config.category,
            volume_ml,
        );
        self.orchestrator()
            .prepare(self.next_id(), &recipe, DoseMode::Simple)
            .await
    }

    // ---- Cleaning ----

    /// Run a cleaning cycle and record it in the history
    pub async fn clean(&self, request: CleaningRequest) -> Result<CleaningCycle, AdmissionError> {
        let scheduler = CleaningScheduler::new(
            &self.pumps,
            &self.estop,
            &self.config.safety,
            &self.config.cleaning,
        );
        let cycle = scheduler.clean(self.next_id(), request).await?;

        let record = CleaningRecord::from_cycle(&cycle, request.requested_at_s);
        self.maintenance.lock(|log| {
            let mut log = log.borrow_mut();
            if record.full_array && cycle.state == SessionState::Completed {
                log.cocktails_since_cleaning = 0;
            }
            log.history.push(record);
        });
        Ok(cycle)
    }

    /// Cycle kinds currently admissible on `target`
    pub fn runnable_cleaning(&self, target: CleaningTarget) -> Vec<CleaningKind, 4> {
        runnable_kinds(&self.pumps, target)
    }

    /// Copy of the cleaning history
    pub fn cleaning_history(&self) -> CleaningHistory {
        self.maintenance.lock(|log| log.borrow().history.clone())
    }

    /// Restore persisted maintenance state
    pub fn load_maintenance(&self, history: CleaningHistory, cocktails_since_cleaning: u32) {
        debug!(
            "loaded {} cleaning records, {} cocktails since cleaning",
            history.len(),
            cocktails_since_cleaning
        );
        self.maintenance.lock(|log| {
            *log.borrow_mut() = MaintenanceLog {
                history,
                cocktails_since_cleaning,
            }
        });
    }

    /// Cocktails poured since the last completed full-array cleaning
    pub fn cocktails_since_cleaning(&self) -> u32 {
        self.maintenance.lock(|log| log.borrow().cocktails_since_cleaning)
    }

    /// Cleaning recommended at `now_s`, if any
    pub fn recommend_cleaning(&self, now_s: u64) -> Option<CleaningKind> {
        self.maintenance.lock(|log| {
            let log = log.borrow();
            self.config
                .maintenance
                .recommend(&log.history, log.cocktails_since_cleaning, now_s)
        })
    }

    /// Next time-based cleaning as `(due_s, kind)`
    pub fn next_cleaning_due(&self, now_s: u64) -> (u64, CleaningKind) {
        self.maintenance
            .lock(|log| self.config.maintenance.next_due(&log.borrow().history, now_s))
    }

    // ---- Emergency stop ----

    /// Halt every pump and latch the emergency stop
    pub fn trigger_halt(&self, source: HaltSource) {
        self.estop.trigger_halt(&self.pumps, source);
    }

    /// Release the emergency stop; pumps still need [`reset_pump`](Self::reset_pump)
    pub fn clear_halt(&self) {
        self.estop.clear_halt(&self.pumps);
    }

    /// Whether the emergency stop is latched
    pub fn is_halted(&self) -> bool {
        self.estop.is_halted()
    }

    /// Source of the active emergency stop
    pub fn halt_source(&self) -> Option<HaltSource> {
        self.estop.source()
    }

    // ---- Pump maintenance ----

    /// Return a faulted or halted pump to Idle
    ///
    /// Refused while the emergency stop is latched.
    pub fn reset_pump(&self, pump: PumpId) -> Result<(), PumpError> {
        let unit = self.pumps.get(pump).ok_or(PumpError::UnknownPump(pump))?;
        self.estop.while_clear(|| unit.reset(self.pumps.events()))
    }

    /// Reset every pump that needs it
    pub fn reset_all(&self) -> Result<(), PumpError> {
        self.pumps
            .iter()
            .filter(|u| u.state().needs_reset())
            .try_for_each(|u| self.reset_pump(u.id()))
    }

    /// Report a fault raised outside a driver call
    pub fn report_fault(&self, pump: PumpId, fault: PumpFault) -> Result<(), PumpError> {
        let unit = self.pumps.get(pump).ok_or(PumpError::UnknownPump(pump))?;
        unit.report_fault(fault, self.pumps.events());
        Ok(())
    }

    /// Enable or disable a pump for future requests
    pub fn set_pump_enabled(&self, pump: PumpId, enabled: bool) -> Result<(), PumpError> {
        let unit = self.pumps.get(pump).ok_or(PumpError::UnknownPump(pump))?;
        unit.set_enabled(enabled);
        Ok(())
    }

    // ---- Calibration ----

    /// Actuation time for `volume_ml` on a pump
    pub fn duration_for(&self, pump: PumpId, volume_ml: f32) -> Result<Duration, CalibrationError> {
        self.calibration.duration_for(&self.pumps, pump, volume_ml)
    }

    /// Feed back a measured test pour; returns the new factor
    pub fn record_measurement(
        &self,
        pump: PumpId,
        requested_ml: f32,
        measured_ml: f32,
    ) -> Result<f32, CalibrationError> {
        let factor =
            self.calibration
                .record_measurement(&self.pumps, pump, requested_ml, measured_ml)?;

        self.calibration_log.lock(|data| {
            let mut data = data.borrow_mut();
            let samples = data.get(pump).map_or(0, |c| c.samples);
            if !data.set(PumpCalibration::new(pump, factor, samples.saturating_add(1))) {
                warn!("no calibration slot for pump {}", pump);
            }
        });
        Ok(factor)
    }

    /// Calibration state ready to persist
    pub fn calibration_snapshot(&self) -> CalibrationData {
        let mut data = self.calibration_log.lock(|data| data.borrow().clone());
        data.update_crc();
        data
    }

    /// Restore persisted calibration factors
    ///
    /// Invalid data is ignored. Entries for unknown pumps, non-positive
    /// factors and pumps that are running are skipped. Returns the number
    /// of factors applied.
    pub fn apply_calibration(&self, data: &CalibrationData) -> usize {
        if !data.is_valid() {
            warn!("ignoring calibration data with bad header or crc");
            return 0;
        }

        let mut applied = 0;
        for entry in data.pumps.iter().filter(|c| c.valid) {
            let Some(unit) = self.pumps.get(entry.pump) else {
                continue;
            };
            if !(entry.factor > 0.0) || !entry.factor.is_finite() {
                continue;
            }
            if unit.set_calibration_factor(entry.factor).is_ok() {
                self.calibration_log
                    .lock(|log| log.borrow_mut().set(*entry));
                applied += 1;
            }
        }
        info!("restored {} calibration factors", applied);
        applied
    }
}
