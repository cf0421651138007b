//! Job dispatch shared by preparation and cleaning
//!
//! Drives one pump actuation as a job and publishes its transitions.

use embassy_time::Duration;

use crate::pump::{PumpError, PumpUnit};
use crate::state::{publish, EventBus, JobEvent, JobState, MachineEvent};
use crate::traits::PumpDriver;

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JobOutcome {
    pub state: JobState,
    pub error: Option<PumpError>,
    pub elapsed: Duration,
}

/// Run one actuation on `unit` as part of session or cycle `session`
pub(crate) async fn drive<D: PumpDriver>(
    unit: &PumpUnit<D>,
    session: u32,
    duration: Duration,
    timeout: Duration,
    events: &EventBus,
) -> JobOutcome {
    let emit = |state| {
        publish(
            events,
            MachineEvent::Job {
                session,
                pump: unit.id(),
                state,
            },
        )
    };

    let state = JobState::Pending;
    let actuation = match unit.start(duration, timeout, events) {
        Ok(actuation) => actuation,
        Err(error) => {
            let state = state.transition(JobEvent::Errored(error));
            emit(state);
            return JobOutcome {
                state,
                error: Some(error),
                elapsed: Duration::from_ticks(0),
            };
        }
    };

    let state = state.transition(JobEvent::Started);
    emit(state);

    let outcome = match actuation.wait().await {
        Ok(elapsed) => JobOutcome {
            state: state.transition(JobEvent::Finished),
            error: None,
            elapsed,
        },
        Err(e) => JobOutcome {
            state: state.transition(JobEvent::Errored(e.error)),
            error: Some(e.error),
            elapsed: e.elapsed,
        },
    };
    emit(outcome.state);
    outcome
}
