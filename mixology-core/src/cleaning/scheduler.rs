//! Cleaning scheduler
//!
//! Runs a cleaning cycle's phase table on every targeted pump
//! concurrently. Deep and Sanitize need the whole array to themselves;
//! Quick and Standard clean whichever targeted pumps are free and mark the
//! rest as failed.

use embassy_futures::join::join_array;
use embassy_time::{Duration, Instant};
use heapless::Vec;

use super::cycle::{
    CleaningCycle, CleaningJob, CleaningKind, CleaningRequest, CleaningTables, CleaningTarget,
    PhaseStep,
};
use crate::config::{PumpId, SafetyLimits, MAX_PUMPS};
use crate::estop::EmergencyStop;
use crate::preparation::AdmissionError;
use crate::pump::{ActuationError, Claim, Holder, PumpArray, PumpError, PumpState};
use crate::safety::{validate_actuations, SafetyViolation};
use crate::state::{
    publish, ActivityKind, JobEvent, JobState, MachineEvent, SessionEvent, SessionState,
};
use crate::traits::PumpDriver;

/// Runs cleaning cycles over a shared pump array
pub struct CleaningScheduler<'a, D> {
    pumps: &'a PumpArray<D>,
    estop: &'a EmergencyStop,
    limits: &'a SafetyLimits,
    tables: &'a CleaningTables,
}

impl<'a, D: PumpDriver> CleaningScheduler<'a, D> {
    /// Create a scheduler
    pub fn new(
        pumps: &'a PumpArray<D>,
        estop: &'a EmergencyStop,
        limits: &'a SafetyLimits,
        tables: &'a CleaningTables,
    ) -> Self {
        Self {
            pumps,
            estop,
            limits,
            tables,
        }
    }

    /// Run `request` as cycle `id`
    ///
    /// Admission errors are returned before any pump moves.
    pub async fn clean(
        &self,
        id: u32,
        request: CleaningRequest,
    ) -> Result<CleaningCycle, AdmissionError> {
        match self.admit(id, &request) {
            Ok((targets, claim, epoch)) => Ok(self.run(id, request, targets, claim, epoch).await),
            Err(e) => {
                warn!("cycle {} {} rejected: {:?}", id, request.kind.as_str(), e);
                self.emit(id, SessionState::Pending.transition(SessionEvent::Rejected));
                Err(e)
            }
        }
    }

    fn targets(&self, target: CleaningTarget) -> Result<Vec<PumpId, MAX_PUMPS>, AdmissionError> {
        match target {
            CleaningTarget::All => {
                let ids: Vec<PumpId, MAX_PUMPS> = self
                    .pumps
                    .iter()
                    .filter(|u| u.is_enabled())
                    .map(|u| u.id())
                    .collect();
                if ids.is_empty() {
                    return Err(AdmissionError::NothingToDispense);
                }
                Ok(ids)
            }
            CleaningTarget::Pump(pump) => {
                let unit = self.pumps.get(pump).ok_or(AdmissionError::UnknownPump(pump))?;
                if !unit.is_enabled() {
                    return Err(SafetyViolation::PumpDisabled(pump).into());
                }
                let mut ids = Vec::new();
                let _ = ids.push(pump);
                Ok(ids)
            }
        }
    }

    fn admit(
        &self,
        id: u32,
        request: &CleaningRequest,
    ) -> Result<(Vec<PumpId, MAX_PUMPS>, Claim<'a, D>, u32), AdmissionError> {
        let epoch = self.estop.epoch();
        if self.estop.is_halted() {
            return Err(AdmissionError::EmergencyHalted);
        }

        let targets = self.targets(request.target)?;
        let phases = self.tables.phases(request.kind);
        if phases.is_empty() {
            return Err(AdmissionError::NothingToDispense);
        }

        let actuations = targets
            .iter()
            .flat_map(|&pump| phases.iter().map(move |step| (pump, step.duration())));
        validate_actuations(actuations, self.pumps, self.limits)?;

        let holder = Holder::Cycle(id);
        let claim = if request.kind.is_exclusive() {
            self.pumps.claim_exclusive(&targets, holder)?
        } else if let CleaningTarget::Pump(_) = request.target {
            self.pumps.claim(&targets, holder)?
        } else {
            let claim = self.pumps.claim_available(&targets, holder)?;
            if claim.is_empty() {
                return Err(AdmissionError::SystemBusy);
            }
            claim
        };

        if targets.iter().any(|&pump| {
            claim.holds(pump) && self.pumps.state(pump) == Some(PumpState::EmergencyHalted)
        }) {
            return Err(AdmissionError::EmergencyHalted);
        }

        Ok((targets, claim, epoch))
    }

    async fn run(
        &self,
        id: u32,
        request: CleaningRequest,
        targets: Vec<PumpId, MAX_PUMPS>,
        claim: Claim<'a, D>,
        epoch: u32,
    ) -> CleaningCycle {
        let started_at = Instant::now();
        let state = SessionState::Pending.transition(SessionEvent::Admitted);
        info!(
            "cycle {} {} running on {} of {} pumps",
            id,
            request.kind.as_str(),
            claim.len(),
            targets.len()
        );
        self.emit(id, state);

        let phases = self.tables.phases(request.kind);
        let timeout = self.limits.pump_timeout();
        let jobs: [Option<CleaningJob>; MAX_PUMPS] = join_array(core::array::from_fn(|i| {
            let target = targets.get(i).map(|&pump| (pump, claim.holds(pump)));
            self.run_job(id, target, phases, timeout)
        }))
        .await;
        drop(claim);

        let mut cycle = CleaningCycle {
            id,
            kind: request.kind,
            target: request.target,
            jobs: jobs.into_iter().flatten().collect(),
            state,
            started_at,
            ended_at: Some(Instant::now()),
        };

        if self.estop.epoch() != epoch {
            cycle.state = cycle.state.transition(SessionEvent::Halted);
        }
        cycle.state = cycle.state.transition(SessionEvent::Settled(cycle.tally()));

        match cycle.state {
            SessionState::Completed => info!("cycle {} completed", id),
            state => warn!("cycle {} ended {:?}", id, state),
        }
        self.emit(id, cycle.state);
        cycle
    }

    async fn run_job(
        &self,
        cycle: u32,
        target: Option<(PumpId, bool)>,
        phases: &[PhaseStep],
        timeout: Duration,
    ) -> Option<CleaningJob> {
        let (pump, claimed) = target?;
        let events = self.pumps.events();
        let emit = |state| {
            publish(
                events,
                MachineEvent::Job {
                    session: cycle,
                    pump,
                    state,
                },
            )
        };

        let mut job = CleaningJob {
            pump,
            state: JobState::Pending,
            phase: None,
            error: None,
            elapsed: Duration::from_ticks(0),
        };

        // Held by another session
        if !claimed {
            job.error = Some(PumpError::AlreadyBusy);
            job.state = job.state.transition(JobEvent::Errored(PumpError::AlreadyBusy));
            emit(job.state);
            return Some(job);
        }

        let unit = self.pumps.get(pump)?;
        for step in phases {
            job.phase = Some(step.phase);
            publish(
                events,
                MachineEvent::CleaningPhase {
                    cycle,
                    pump,
                    phase: step.phase,
                },
            );

            let result = match unit.start(step.duration(), timeout, events) {
                Ok(actuation) => {
                    if job.state == JobState::Pending {
                        job.state = job.state.transition(JobEvent::Started);
                        emit(job.state);
                    }
                    actuation.wait().await
                }
                Err(error) => Err(ActuationError::refused(error)),
            };

            match result {
                Ok(elapsed) => job.elapsed += elapsed,
                Err(e) => {
                    debug!("pump {} stopped in {:?}: {:?}", pump, step.phase, e.error);
                    job.elapsed += e.elapsed;
                    job.error = Some(e.error);
                    job.state = job.state.transition(JobEvent::Errored(e.error));
                    emit(job.state);
                    return Some(job);
                }
            }
        }

        job.state = job.state.transition(JobEvent::Finished);
        emit(job.state);
        Some(job)
    }

    fn emit(&self, id: u32, state: SessionState) {
        publish(
            self.pumps.events(),
            MachineEvent::Session {
                id,
                kind: ActivityKind::Cleaning,
                state,
            },
        );
    }
}

/// Cycle kinds that may run on `target` given the current claims
///
/// Used by front ends to grey out options.
pub fn runnable_kinds<D: PumpDriver>(
    pumps: &PumpArray<D>,
    target: CleaningTarget,
) -> Vec<CleaningKind, 4> {
    let busy = match target {
        CleaningTarget::All => pumps.any_claimed(),
        CleaningTarget::Pump(id) => pumps.holder(id).is_some(),
    };
    [
        CleaningKind::Quick,
        CleaningKind::Standard,
        CleaningKind::Deep,
        CleaningKind::Sanitize,
    ]
    .into_iter()
    .filter(|kind| !(busy && kind.is_exclusive()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationEngine;
    use crate::cleaning::CleaningPhase;
    use crate::config::{IngredientCategory, PumpConfig, Recipe};
    use crate::preparation::{DoseMode, PreparationOrchestrator};
    use crate::estop::HaltSource;
    use crate::testing::TestPump;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::Timer;

    fn pumps() -> PumpArray<TestPump> {
        let configs = [
            PumpConfig::new(1, "Gin", 1000.0),
            PumpConfig::new(2, "Tonic", 1000.0),
            PumpConfig::new(3, "Lime juice", 1000.0),
        ];
        PumpArray::new(&configs, |_| TestPump::default()).unwrap()
    }

    fn steps(steps: &[PhaseStep]) -> crate::cleaning::PhaseTable {
        Vec::from_slice(steps).unwrap()
    }

    /// Millisecond phase tables
    fn tables() -> CleaningTables {
        use CleaningPhase::*;
        CleaningTables {
            quick: steps(&[PhaseStep::new(Rinse, 20), PhaseStep::new(Clean, 20)]),
            standard: steps(&[PhaseStep::new(Rinse, 20), PhaseStep::new(Clean, 20)]),
            deep: steps(&[
                PhaseStep::new(Rinse, 20),
                PhaseStep::new(Clean, 20),
                PhaseStep::new(Sanitize, 20),
                PhaseStep::new(FinalRinse, 20),
                PhaseStep::new(Dry, 20),
            ]),
            sanitize: steps(&[PhaseStep::new(Sanitize, 300), PhaseStep::new(FinalRinse, 300)]),
        }
    }

    struct Fixture {
        pumps: PumpArray<TestPump>,
        estop: EmergencyStop,
        limits: SafetyLimits,
        tables: CleaningTables,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pumps: pumps(),
                estop: EmergencyStop::new(),
                limits: SafetyLimits::default(),
                tables: tables(),
            }
        }

        fn scheduler(&self) -> CleaningScheduler<'_, TestPump> {
            CleaningScheduler::new(&self.pumps, &self.estop, &self.limits, &self.tables)
        }
    }

    #[test]
    fn test_deep_waits_for_exclusive_access() {
        let fx = Fixture::new();
        let calibration = CalibrationEngine::default();
        let orchestrator =
            PreparationOrchestrator::new(&fx.pumps, &fx.estop, &calibration, &fx.limits);
        let recipe = Recipe::new("lime").with("Lime juice", IngredientCategory::Juice, 200.0);

        // Deep is requested while the cocktail is still pouring
        let (session, busy) = block_on(join(
            orchestrator.prepare(7, &recipe, DoseMode::Simple),
            async {
                Timer::after(Duration::from_millis(50)).await;
                fx.scheduler()
                    .clean(1, CleaningRequest::all(CleaningKind::Deep, 0))
                    .await
            },
        ));
        assert_eq!(session.unwrap().state, SessionState::Completed);
        assert_eq!(busy.unwrap_err(), AdmissionError::SystemBusy);
        assert_eq!(fx.pumps.with_driver(1, |d| d.starts), Some(0));
        assert_eq!(fx.pumps.with_driver(3, |d| d.starts), Some(1));

        let cycle = block_on(
            fx.scheduler()
                .clean(2, CleaningRequest::all(CleaningKind::Deep, 0)),
        )
        .unwrap();
        assert_eq!(cycle.state, SessionState::Completed);
        assert_eq!(cycle.jobs.len(), 3);
        for id in 1..=3 {
            assert_eq!(fx.pumps.with_driver(id, |d| d.overlapped), Some(false));
            assert_eq!(cycle.job(id).unwrap().phase, Some(CleaningPhase::Dry));
        }
        assert_eq!(fx.pumps.with_driver(1, |d| d.starts), Some(5));
        assert_eq!(fx.pumps.with_driver(3, |d| d.starts), Some(6));
        assert!(!fx.pumps.any_claimed());
    }

    #[test]
    fn test_zero_length_phase_rejected() {
        let mut fx = Fixture::new();
        fx.tables.quick = steps(&[PhaseStep::new(CleaningPhase::Rinse, 0)]);
        let err = block_on(
            fx.scheduler()
                .clean(1, CleaningRequest::all(CleaningKind::Quick, 0)),
        )
        .unwrap_err();
        assert_eq!(
            err,
            AdmissionError::Safety(SafetyViolation::ZeroDuration(1))
        );
        assert!(fx.pumps.iter().all(|u| u.with_driver(|d| d.starts == 0)));
        assert!(!fx.pumps.any_claimed());
    }

    #[test]
    fn test_single_pump_cycle() {
        let fx = Fixture::new();
        let cycle = block_on(
            fx.scheduler()
                .clean(1, CleaningRequest::pump(CleaningKind::Quick, 2, 0)),
        )
        .unwrap();

        assert_eq!(cycle.state, SessionState::Completed);
        assert_eq!(cycle.jobs.len(), 1);
        assert!(cycle.job(2).unwrap().elapsed >= Duration::from_millis(40));
        assert_eq!(fx.pumps.with_driver(1, |d| d.starts), Some(0));
        assert_eq!(fx.pumps.with_driver(2, |d| d.starts), Some(2));
    }

    #[test]
    fn test_single_pump_rejections() {
        let fx = Fixture::new();
        let err = block_on(
            fx.scheduler()
                .clean(1, CleaningRequest::pump(CleaningKind::Quick, 9, 0)),
        )
        .unwrap_err();
        assert_eq!(err, AdmissionError::UnknownPump(9));

        fx.pumps.get(2).unwrap().set_enabled(false);
        let err = block_on(
            fx.scheduler()
                .clean(2, CleaningRequest::pump(CleaningKind::Quick, 2, 0)),
        )
        .unwrap_err();
        assert_eq!(
            err,
            AdmissionError::Safety(SafetyViolation::PumpDisabled(2))
        );

        let _held = fx.pumps.claim(&[1], Holder::Session(5)).unwrap();
        let err = block_on(
            fx.scheduler()
                .clean(3, CleaningRequest::pump(CleaningKind::Quick, 1, 0)),
        )
        .unwrap_err();
        assert_eq!(err, AdmissionError::SystemBusy);
    }

    #[test]
    fn test_phase_longer_than_timeout_rejected() {
        let mut fx = Fixture::new();
        fx.limits.pump_timeout_ms = 100;
        let err = block_on(
            fx.scheduler()
                .clean(1, CleaningRequest::all(CleaningKind::Sanitize, 0)),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::Safety(SafetyViolation::TimeoutExceeded { .. })
        ));
        assert!(fx.pumps.iter().all(|u| u.with_driver(|d| d.starts == 0)));
    }

    #[test]
    fn test_quick_skips_held_pump() {
        let fx = Fixture::new();
        let _held = fx.pumps.claim(&[2], Holder::Session(7)).unwrap();

        let cycle = block_on(
            fx.scheduler()
                .clean(1, CleaningRequest::all(CleaningKind::Quick, 0)),
        )
        .unwrap();

        assert_eq!(cycle.state, SessionState::PartiallyFailed);
        let skipped = cycle.job(2).unwrap();
        assert_eq!(skipped.state, JobState::Failed);
        assert_eq!(skipped.error, Some(PumpError::AlreadyBusy));
        assert_eq!(fx.pumps.with_driver(2, |d| d.starts), Some(0));
        assert_eq!(cycle.job(1).unwrap().state, JobState::Completed);

        // The held pump is still held by its session
        assert_eq!(fx.pumps.holder(2), Some(Holder::Session(7)));
    }

    #[test]
    fn test_quick_rejected_when_everything_held() {
        let fx = Fixture::new();
        let _held = fx.pumps.claim(&[1, 2, 3], Holder::Session(7)).unwrap();
        let err = block_on(
            fx.scheduler()
                .clean(1, CleaningRequest::all(CleaningKind::Quick, 0)),
        )
        .unwrap_err();
        assert_eq!(err, AdmissionError::SystemBusy);
    }

    #[test]
    fn test_halt_aborts_cycle() {
        let fx = Fixture::new();
        let (cycle, _) = block_on(join(
            fx.scheduler()
                .clean(1, CleaningRequest::all(CleaningKind::Sanitize, 0)),
            async {
                Timer::after(Duration::from_millis(100)).await;
                fx.estop.trigger_halt(&fx.pumps, HaltSource::Line(0));
            },
        ));
        let cycle = cycle.unwrap();

        assert_eq!(cycle.state, SessionState::Aborted);
        for job in &cycle.jobs {
            assert_eq!(job.state, JobState::Cancelled);
            assert_eq!(job.phase, Some(CleaningPhase::Sanitize));
            assert!(job.elapsed < Duration::from_millis(300));
        }
        assert!(fx.pumps.iter().all(|u| !u.with_driver(|d| d.running)));
        assert!(!fx.pumps.any_claimed());
    }

    #[test]
    fn test_publishes_phase_events() {
        let fx = Fixture::new();
        let mut events = fx.pumps.subscribe().unwrap();
        block_on(
            fx.scheduler()
                .clean(4, CleaningRequest::pump(CleaningKind::Quick, 1, 0)),
        )
        .unwrap();

        let mut phases: Vec<CleaningPhase, 4> = Vec::new();
        let mut last_session = None;
        while let Some(event) = events.try_next_message_pure() {
            match event {
                MachineEvent::CleaningPhase { cycle: 4, pump: 1, phase } => {
                    phases.push(phase).unwrap();
                }
                MachineEvent::Session { id: 4, kind, state } => {
                    assert_eq!(kind, ActivityKind::Cleaning);
                    last_session = Some(state);
                }
                _ => {}
            }
        }
        assert_eq!(phases.as_slice(), &[CleaningPhase::Rinse, CleaningPhase::Clean]);
        assert_eq!(last_session, Some(SessionState::Completed));
    }

    #[test]
    fn test_runnable_kinds() {
        let fx = Fixture::new();
        assert_eq!(runnable_kinds(&fx.pumps, CleaningTarget::All).len(), 4);

        let _held = fx.pumps.claim(&[1], Holder::Session(1)).unwrap();
        let kinds = runnable_kinds(&fx.pumps, CleaningTarget::All);
        assert_eq!(kinds.as_slice(), &[CleaningKind::Quick, CleaningKind::Standard]);
        assert_eq!(runnable_kinds(&fx.pumps, CleaningTarget::Pump(2)).len(), 4);
    }
}
