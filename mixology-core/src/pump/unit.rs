//! Single pump unit
//!
//! Wraps one [`PumpDriver`] together with its runtime state. All state
//! changes happen inside the unit's critical section, so a halt issued from
//! any context takes effect before the next instruction of a running
//! actuation, and the actuation future is woken through the interrupt
//! signal instead of polling.

use core::cell::RefCell;

use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};

use super::{ActuationError, PumpError, PumpState};
use crate::config::{Label, PumpConfig, PumpId};
use crate::state::{publish, EventBus, MachineEvent};
use crate::traits::{PumpDriver, PumpFault};

/// Why a running actuation was woken early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Halt,
    Fault,
}

struct UnitInner<D> {
    driver: D,
    state: PumpState,
    calibration_factor: f32,
    enabled: bool,
    last_fault: Option<PumpFault>,
    /// When a halt or fault stopped the current actuation
    stopped_at: Option<Instant>,
}

/// One peristaltic pump
pub struct PumpUnit<D> {
    id: PumpId,
    ingredient: Label,
    flow_rate_ml_s: f32,
    inner: Mutex<CriticalSectionRawMutex, RefCell<UnitInner<D>>>,
    interrupt: Signal<CriticalSectionRawMutex, Interrupt>,
}

impl<D: PumpDriver> PumpUnit<D> {
    /// Create a unit from its configuration
    pub fn new(config: &PumpConfig, driver: D) -> Self {
        Self {
            id: config.id,
            ingredient: config.ingredient.clone(),
            flow_rate_ml_s: config.flow_rate_ml_s,
            inner: Mutex::new(RefCell::new(UnitInner {
                driver,
                state: PumpState::Idle,
                calibration_factor: config.calibration_factor,
                enabled: config.enabled,
                last_fault: None,
                stopped_at: None,
            })),
            interrupt: Signal::new(),
        }
    }

    /// Stable pump id
    pub fn id(&self) -> PumpId {
        self.id
    }

    /// Assigned ingredient
    pub fn ingredient(&self) -> &str {
        self.ingredient.as_str()
    }

    /// Nominal flow rate (ml/s)
    pub fn flow_rate_ml_s(&self) -> f32 {
        self.flow_rate_ml_s
    }

    /// Current runtime state
    pub fn state(&self) -> PumpState {
        self.inner.lock(|inner| inner.borrow().state)
    }

    /// Current calibration factor
    pub fn calibration_factor(&self) -> f32 {
        self.inner.lock(|inner| inner.borrow().calibration_factor)
    }

    /// Whether the pump is configured on
    pub fn is_enabled(&self) -> bool {
        self.inner.lock(|inner| inner.borrow().enabled)
    }

    /// Last hardware fault, cleared by [`reset`](Self::reset)
    pub fn last_fault(&self) -> Option<PumpFault> {
        self.inner.lock(|inner| inner.borrow().last_fault)
    }

    /// Run `f` with exclusive access to the driver
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.inner.lock(|inner| f(&mut inner.borrow_mut().driver))
    }

    /// Enable or disable the pump
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock(|inner| inner.borrow_mut().enabled = enabled);
    }

    /// Replace the calibration factor
    ///
    /// Refused while the pump is running so an actuation in flight keeps the
    /// factor it was sized with.
    pub fn set_calibration_factor(&self, factor: f32) -> Result<(), PumpError> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.state == PumpState::Running {
                return Err(PumpError::AlreadyBusy);
            }
            inner.calibration_factor = factor;
            Ok(())
        })
    }

    /// Read-modify-write the calibration factor under the pump's lock
    ///
    /// Returns the `(old, new)` factors.
    pub fn update_calibration_factor(
        &self,
        f: impl FnOnce(f32) -> f32,
    ) -> Result<(f32, f32), PumpError> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.state == PumpState::Running {
                return Err(PumpError::AlreadyBusy);
            }
            let old = inner.calibration_factor;
            inner.calibration_factor = f(old);
            Ok((old, inner.calibration_factor))
        })
    }

    /// Drive the pump for `duration`, never longer than `timeout`
    ///
    /// Returns the time the pump actually ran. On failure the elapsed time
    /// is still reported so partial volume can be estimated.
    pub async fn actuate(
        &self,
        duration: Duration,
        timeout: Duration,
        events: &EventBus,
    ) -> Result<Duration, ActuationError> {
        let actuation = self
            .start(duration, timeout, events)
            .map_err(ActuationError::refused)?;
        actuation.wait().await
    }

    /// Start an actuation without waiting for it
    ///
    /// Refusal order: halted, disabled, not idle.
    pub fn start<'a>(
        &'a self,
        duration: Duration,
        timeout: Duration,
        events: &'a EventBus,
    ) -> Result<Actuation<'a, D>, PumpError> {
        let started = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.state == PumpState::EmergencyHalted {
                return Err(PumpError::HaltedState);
            }
            if !inner.enabled {
                return Err(PumpError::Disabled);
            }
            if inner.state != PumpState::Idle {
                return Err(PumpError::AlreadyBusy);
            }

            self.interrupt.reset();
            if let Err(fault) = inner.driver.start() {
                let _ = inner.driver.stop();
                inner.state = PumpState::Faulted;
                inner.last_fault = Some(fault);
                return Err(PumpError::Fault(fault));
            }

            inner.state = PumpState::Running;
            inner.stopped_at = None;
            Ok(Instant::now())
        });

        let started = match started {
            Ok(at) => at,
            Err(PumpError::Fault(fault)) => {
                error!("pump {} failed to start: {:?}", self.id, fault);
                self.emit(events, PumpState::Faulted);
                return Err(PumpError::Fault(fault));
            }
            Err(e) => return Err(e),
        };

        debug!("pump {} running for {} ms", self.id, duration.as_millis());
        self.emit(events, PumpState::Running);

        Ok(Actuation {
            unit: self,
            events,
            started,
            duration,
            timeout,
            finished: false,
        })
    }

    /// Stop the pump immediately and latch EmergencyHalted
    ///
    /// Always succeeds and may be called in any state.
    pub fn halt(&self, events: &EventBus) {
        let changed = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if let Err(fault) = inner.driver.stop() {
                error!("pump {} stop failed during halt: {:?}", self.id, fault);
            }
            if inner.state == PumpState::Running {
                inner.stopped_at = Some(Instant::now());
            }
            let changed = inner.state != PumpState::EmergencyHalted;
            inner.state = PumpState::EmergencyHalted;
            changed
        });

        self.interrupt.signal(Interrupt::Halt);
        if changed {
            warn!("pump {} emergency-halted", self.id);
            self.emit(events, PumpState::EmergencyHalted);
        }
    }

    /// Record a hardware fault reported outside a driver call
    ///
    /// A running pump is stopped and its actuation ends with the fault. A
    /// halted pump stays halted.
    pub fn report_fault(&self, fault: PumpFault, events: &EventBus) {
        let changed = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            match inner.state {
                PumpState::EmergencyHalted => false,
                PumpState::Running => {
                    if let Err(stop) = inner.driver.stop() {
                        error!("pump {} stop failed after fault: {:?}", self.id, stop);
                    }
                    inner.stopped_at = Some(Instant::now());
                    inner.state = PumpState::Faulted;
                    inner.last_fault = Some(fault);
                    true
                }
                PumpState::Idle | PumpState::Faulted => {
                    let changed = inner.state != PumpState::Faulted;
                    inner.state = PumpState::Faulted;
                    inner.last_fault = Some(fault);
                    changed
                }
            }
        });

        if changed {
            error!("pump {} fault: {:?}", self.id, fault);
            self.interrupt.signal(Interrupt::Fault);
            self.emit(events, PumpState::Faulted);
        }
    }

    /// Return a faulted or halted pump to Idle
    pub fn reset(&self, events: &EventBus) -> Result<(), PumpError> {
        let changed = self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.state == PumpState::Running {
                return Err(PumpError::AlreadyBusy);
            }
            let changed = inner.state != PumpState::Idle;
            inner.state = PumpState::Idle;
            inner.last_fault = None;
            inner.stopped_at = None;
            Ok(changed)
        })?;

        self.interrupt.reset();
        if changed {
            info!("pump {} reset", self.id);
            self.emit(events, PumpState::Idle);
        }
        Ok(())
    }

    /// Settle a started actuation; the unit state is the source of truth
    fn finish(
        &self,
        started: Instant,
        duration: Duration,
        timeout: Duration,
    ) -> (Result<Duration, ActuationError>, Option<PumpState>) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let elapsed = inner.stopped_at.unwrap_or_else(Instant::now) - started;
            let fail = |error| Err(ActuationError { error, elapsed });

            match inner.state {
                PumpState::EmergencyHalted | PumpState::Idle => {
                    (fail(PumpError::Interrupted), None)
                }
                PumpState::Faulted => {
                    let fault = inner.last_fault.unwrap_or(PumpFault::Driver);
                    (fail(PumpError::Fault(fault)), None)
                }
                PumpState::Running => {
                    let stopped = inner.driver.stop();
                    if duration > timeout {
                        inner.state = PumpState::Faulted;
                        (fail(PumpError::Timeout), Some(PumpState::Faulted))
                    } else if let Err(fault) = stopped {
                        inner.state = PumpState::Faulted;
                        inner.last_fault = Some(fault);
                        (fail(PumpError::Fault(fault)), Some(PumpState::Faulted))
                    } else {
                        inner.state = PumpState::Idle;
                        (Ok(elapsed), Some(PumpState::Idle))
                    }
                }
            }
        })
    }

    fn emit(&self, events: &EventBus, state: PumpState) {
        publish(events, MachineEvent::Pump { id: self.id, state });
    }
}

/// A running actuation
///
/// Dropping it before [`wait`](Self::wait) completes stops the pump.
pub struct Actuation<'a, D: PumpDriver> {
    unit: &'a PumpUnit<D>,
    events: &'a EventBus,
    started: Instant,
    duration: Duration,
    timeout: Duration,
    finished: bool,
}

impl<D: PumpDriver> Actuation<'_, D> {
    /// When the pump was started
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Wait until the duration elapses, the ceiling is hit, or the pump is
    /// interrupted
    pub async fn wait(mut self) -> Result<Duration, ActuationError> {
        let limit = if self.duration > self.timeout {
            self.timeout
        } else {
            self.duration
        };

        select(
            Timer::at(self.started + limit),
            self.unit.interrupt.wait(),
        )
        .await;

        self.settle()
    }

    fn settle(&mut self) -> Result<Duration, ActuationError> {
        self.finished = true;
        let (result, new_state) = self.unit.finish(self.started, self.duration, self.timeout);
        if let Some(state) = new_state {
            self.unit.emit(self.events, state);
        }
        match &result {
            Ok(elapsed) => debug!("pump {} done after {} ms", self.unit.id, elapsed.as_millis()),
            Err(e) => warn!("pump {} actuation failed: {:?}", self.unit.id, e.error),
        }
        result
    }
}

impl<D: PumpDriver> Drop for Actuation<'_, D> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.settle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bus, TestPump};
    use embassy_futures::block_on;
    use embassy_futures::join::join;

    fn unit() -> PumpUnit<TestPump> {
        PumpUnit::new(&PumpConfig::new(1, "Gin", 2.5), TestPump::default())
    }

    #[test]
    fn test_actuate_runs_and_returns_to_idle() {
        let events = bus();
        let unit = unit();
        let elapsed = block_on(unit.actuate(
            Duration::from_millis(20),
            Duration::from_secs(1),
            &events,
        ))
        .unwrap();

        assert!(elapsed >= Duration::from_millis(20));
        assert_eq!(unit.state(), PumpState::Idle);
        unit.with_driver(|d| {
            assert_eq!(d.starts, 1);
            assert_eq!(d.stops, 1);
            assert!(!d.running);
        });
    }

    #[test]
    fn test_refusal_precedence() {
        let events = bus();
        let unit = unit();
        let short = Duration::from_millis(5);
        let timeout = Duration::from_secs(1);

        unit.set_enabled(false);
        let err = block_on(unit.actuate(short, timeout, &events)).unwrap_err();
        assert_eq!(err.error, PumpError::Disabled);

        unit.halt(&events);
        let err = block_on(unit.actuate(short, timeout, &events)).unwrap_err();
        assert_eq!(err.error, PumpError::HaltedState);
        assert_eq!(unit.with_driver(|d| d.starts), 0);
    }

    #[test]
    fn test_busy_pump_refuses_second_actuation() {
        let events = bus();
        let unit = unit();
        let _running = unit
            .start(Duration::from_secs(5), Duration::from_secs(10), &events)
            .unwrap();
        let second = unit.start(Duration::from_millis(5), Duration::from_secs(10), &events);
        assert!(matches!(second, Err(PumpError::AlreadyBusy)));
        assert_eq!(unit.with_driver(|d| d.starts), 1);
    }

    #[test]
    fn test_halt_interrupts_running_actuation() {
        let events = bus();
        let unit = unit();

        let (result, _) = block_on(join(
            unit.actuate(Duration::from_secs(10), Duration::from_secs(20), &events),
            async {
                Timer::after(Duration::from_millis(20)).await;
                unit.halt(&events);
            },
        ));

        let err = result.unwrap_err();
        assert_eq!(err.error, PumpError::Interrupted);
        assert!(err.elapsed < Duration::from_secs(1));
        assert_eq!(unit.state(), PumpState::EmergencyHalted);
        assert!(!unit.with_driver(|d| d.running));
    }

    #[test]
    fn test_halt_is_idempotent() {
        let events = bus();
        let unit = unit();
        unit.halt(&events);
        unit.halt(&events);
        assert_eq!(unit.state(), PumpState::EmergencyHalted);
    }

    #[test]
    fn test_reported_fault_fails_actuation() {
        let events = bus();
        let unit = unit();

        let (result, _) = block_on(join(
            unit.actuate(Duration::from_secs(10), Duration::from_secs(20), &events),
            async {
                Timer::after(Duration::from_millis(20)).await;
                unit.report_fault(PumpFault::Stalled, &events);
            },
        ));

        assert_eq!(result.unwrap_err().error, PumpError::Fault(PumpFault::Stalled));
        assert_eq!(unit.state(), PumpState::Faulted);
        assert_eq!(unit.last_fault(), Some(PumpFault::Stalled));
    }

    #[test]
    fn test_start_fault_marks_pump_faulted() {
        let events = bus();
        let unit = unit();
        unit.with_driver(|d| d.fail_start = Some(PumpFault::Disconnected));

        let err = block_on(unit.actuate(
            Duration::from_millis(5),
            Duration::from_secs(1),
            &events,
        ))
        .unwrap_err();
        assert_eq!(err.error, PumpError::Fault(PumpFault::Disconnected));
        assert_eq!(unit.state(), PumpState::Faulted);

        // Faulted pumps refuse work until reset
        unit.with_driver(|d| d.fail_start = None);
        let err = block_on(unit.actuate(
            Duration::from_millis(5),
            Duration::from_secs(1),
            &events,
        ))
        .unwrap_err();
        assert_eq!(err.error, PumpError::AlreadyBusy);

        unit.reset(&events).unwrap();
        assert!(block_on(unit.actuate(
            Duration::from_millis(5),
            Duration::from_secs(1),
            &events,
        ))
        .is_ok());
    }

    #[test]
    fn test_duration_beyond_timeout_faults() {
        let events = bus();
        let unit = unit();
        let err = block_on(unit.actuate(
            Duration::from_millis(200),
            Duration::from_millis(20),
            &events,
        ))
        .unwrap_err();

        assert_eq!(err.error, PumpError::Timeout);
        assert!(err.elapsed < Duration::from_millis(200));
        assert_eq!(unit.state(), PumpState::Faulted);
        assert!(!unit.with_driver(|d| d.running));
    }

    #[test]
    fn test_reset_refused_while_running() {
        let events = bus();
        let unit = unit();
        let running = unit
            .start(Duration::from_secs(5), Duration::from_secs(10), &events)
            .unwrap();
        assert_eq!(unit.reset(&events), Err(PumpError::AlreadyBusy));
        drop(running);
        assert_eq!(unit.state(), PumpState::Idle);
        assert!(!unit.with_driver(|d| d.running));
    }

    #[test]
    fn test_calibration_locked_while_running() {
        let events = bus();
        let unit = unit();
        let running = unit
            .start(Duration::from_secs(5), Duration::from_secs(10), &events)
            .unwrap();
        assert_eq!(unit.set_calibration_factor(1.2), Err(PumpError::AlreadyBusy));
        drop(running);
        assert_eq!(unit.set_calibration_factor(1.2), Ok(()));
        assert_eq!(unit.calibration_factor(), 1.2);
    }
}
