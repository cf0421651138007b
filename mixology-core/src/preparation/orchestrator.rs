//! Preparation orchestrator
//!
//! Admits a cocktail request, dispatches one pour job per pump
//! concurrently and aggregates the outcome. A fault on one pump does not
//! stop the others; an emergency stop aborts the session.

use embassy_futures::join::join_array;
use embassy_time::{Duration, Instant};
use heapless::Vec;

use super::admission::{plan_doses, AdmissionError};
use super::dose::{DoseMode, DoseSpec};
use super::session::{PourJob, PreparationSession};
use crate::calibration::{volume_for_duration, CalibrationEngine};
use crate::config::{PumpId, Recipe, SafetyLimits, MAX_INGREDIENTS};
use crate::dispatch::{drive, JobOutcome};
use crate::estop::EmergencyStop;
use crate::pump::{Claim, Holder, PumpArray, PumpState};
use crate::state::{publish, ActivityKind, JobState, MachineEvent, SessionEvent, SessionState};
use crate::traits::PumpDriver;

/// Runs preparation sessions over a shared pump array
pub struct PreparationOrchestrator<'a, D> {
    pumps: &'a PumpArray<D>,
    estop: &'a EmergencyStop,
    calibration: &'a CalibrationEngine,
    limits: &'a SafetyLimits,
}

impl<'a, D: PumpDriver> PreparationOrchestrator<'a, D> {
    /// Create an orchestrator
    pub fn new(
        pumps: &'a PumpArray<D>,
        estop: &'a EmergencyStop,
        calibration: &'a CalibrationEngine,
        limits: &'a SafetyLimits,
    ) -> Self {
        Self {
            pumps,
            estop,
            calibration,
            limits,
        }
    }

    /// Prepare `recipe` at `dose` as session `id`
    ///
    /// Admission errors are returned before any pump moves. Once admitted,
    /// the session always runs to a terminal state and is returned, whatever
    /// the outcome of its jobs.
    pub async fn prepare(
        &self,
        id: u32,
        recipe: &Recipe,
        dose: DoseMode,
    ) -> Result<PreparationSession, AdmissionError> {
        match self.admit(id, recipe, dose) {
            Ok((doses, claim, epoch)) => Ok(self.run(id, recipe, dose, doses, claim, epoch).await),
            Err(e) => {
                warn!("session {} '{}' rejected: {:?}", id, recipe.id.as_str(), e);
                self.emit(id, SessionState::Pending.transition(SessionEvent::Rejected));
                Err(e)
            }
        }
    }

    fn admit(
        &self,
        id: u32,
        recipe: &Recipe,
        dose: DoseMode,
    ) -> Result<(Vec<DoseSpec, MAX_INGREDIENTS>, Claim<'a, D>, u32), AdmissionError> {
        let epoch = self.estop.epoch();
        if self.estop.is_halted() {
            return Err(AdmissionError::EmergencyHalted);
        }

        let doses = plan_doses(recipe, dose, self.pumps, self.calibration, self.limits)?;

        let ids: Vec<PumpId, MAX_INGREDIENTS> = doses.iter().map(|d| d.pump).collect();
        let claim = self.pumps.claim(&ids, Holder::Session(id))?;

        if ids
            .iter()
            .any(|&pump| self.pumps.state(pump) == Some(PumpState::EmergencyHalted))
        {
            return Err(AdmissionError::EmergencyHalted);
        }

        Ok((doses, claim, epoch))
    }

    async fn run(
        &self,
        id: u32,
        recipe: &Recipe,
        dose: DoseMode,
        doses: Vec<DoseSpec, MAX_INGREDIENTS>,
        claim: Claim<'a, D>,
        epoch: u32,
    ) -> PreparationSession {
        let mut session = PreparationSession {
            id,
            recipe: recipe.id.clone(),
            dose,
            jobs: doses.into_iter().map(PourJob::new).collect(),
            state: SessionState::Pending.transition(SessionEvent::Admitted),
            started_at: Instant::now(),
            ended_at: None,
            total_dispensed_ml: 0.0,
        };
        info!(
            "session {} '{}' running {} jobs at x{}",
            id,
            recipe.id.as_str(),
            session.jobs.len(),
            dose.multiplier()
        );
        self.emit(id, session.state);

        let timeout = self.limits.pump_timeout();
        let jobs = &session.jobs;
        let outcomes: [Option<JobOutcome>; MAX_INGREDIENTS] =
            join_array(core::array::from_fn(|i| {
                self.run_job(id, jobs.get(i).map(|j| &j.dose), timeout)
            }))
            .await;
        drop(claim);

        session.ended_at = Some(Instant::now());
        for (job, outcome) in session.jobs.iter_mut().zip(outcomes.iter()) {
            if let Some(outcome) = outcome {
                self.settle_job(job, outcome);
            }
        }
        session.total_dispensed_ml = session.jobs.iter().map(|j| j.dispensed_ml).sum();

        if self.estop.epoch() != epoch {
            session.state = session.state.transition(SessionEvent::Halted);
        }
        session.state = session.state.transition(SessionEvent::Settled(session.tally()));

        match session.state {
            SessionState::Completed => info!(
                "session {} completed, {} ml",
                id, session.total_dispensed_ml
            ),
            state => warn!(
                "session {} ended {:?}, {} ml dispensed",
                id, state, session.total_dispensed_ml
            ),
        }
        self.emit(id, session.state);
        session
    }

    async fn run_job(
        &self,
        session: u32,
        dose: Option<&DoseSpec>,
        timeout: Duration,
    ) -> Option<JobOutcome> {
        let dose = dose?;
        let unit = self.pumps.get(dose.pump)?;
        Some(drive(unit, session, dose.duration, timeout, self.pumps.events()).await)
    }

    fn settle_job(&self, job: &mut PourJob, outcome: &JobOutcome) {
        job.state = outcome.state;
        job.error = outcome.error;
        job.elapsed = outcome.elapsed;
        job.dispensed_ml = match outcome.state {
            JobState::Completed => job.dose.volume_ml,
            _ => self
                .pumps
                .get(job.dose.pump)
                .map(|u| volume_for_duration(u.flow_rate_ml_s(), u.calibration_factor(), outcome.elapsed))
                .unwrap_or(0.0)
                .min(job.dose.volume_ml),
        };
    }

    fn emit(&self, id: u32, state: SessionState) {
        publish(
            self.pumps.events(),
            MachineEvent::Session {
                id,
                kind: ActivityKind::Preparation,
                state,
            },
        );
    }
}
