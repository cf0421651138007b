//! Per-job state machine
//!
//! A job is one pump's actuation inside a session or cleaning cycle.

use crate::pump::PumpError;

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JobState {
    /// Created, pump not yet started
    #[default]
    Pending,
    /// Pump running
    Running,
    /// Ran for the full duration
    Completed,
    /// Refused, timed out or faulted
    Failed,
    /// Cut short by the emergency stop
    Cancelled,
}

/// Events driving a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JobEvent {
    /// Pump accepted the actuation
    Started,
    /// Actuation ran to completion
    Finished,
    /// Actuation ended with an error
    Errored(PumpError),
}

impl JobState {
    /// Check if the job has settled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Process an event and return the next state
    ///
    /// An interrupted actuation cancels the job; every other error fails it.
    /// A pending job refused by a halted pump is cancelled as well, since it
    /// lost the race with the emergency stop.
    pub fn transition(self, event: JobEvent) -> Self {
        use JobEvent::*;
        use JobState::*;

        match (self, event) {
            (Pending, Started) => Running,
            (Running, Finished) => Completed,
            (Pending | Running, Errored(PumpError::Interrupted | PumpError::HaltedState)) => {
                Cancelled
            }
            (Pending | Running, Errored(_)) => Failed,
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::PumpFault;

    #[test]
    fn test_normal_run() {
        let state = JobState::Pending.transition(JobEvent::Started);
        assert_eq!(state, JobState::Running);
        assert_eq!(state.transition(JobEvent::Finished), JobState::Completed);
    }

    #[test]
    fn test_interrupt_cancels() {
        let state = JobState::Running.transition(JobEvent::Errored(PumpError::Interrupted));
        assert_eq!(state, JobState::Cancelled);
    }

    #[test]
    fn test_fault_and_timeout_fail() {
        let faulted = JobState::Running.transition(JobEvent::Errored(PumpError::Fault(
            PumpFault::Stalled,
        )));
        assert_eq!(faulted, JobState::Failed);

        let timed_out = JobState::Running.transition(JobEvent::Errored(PumpError::Timeout));
        assert_eq!(timed_out, JobState::Failed);
    }

    #[test]
    fn test_refused_start() {
        let busy = JobState::Pending.transition(JobEvent::Errored(PumpError::AlreadyBusy));
        assert_eq!(busy, JobState::Failed);

        let halted = JobState::Pending.transition(JobEvent::Errored(PumpError::HaltedState));
        assert_eq!(halted, JobState::Cancelled);
    }

    #[test]
    fn test_completed_is_final() {
        let state = JobState::Completed.transition(JobEvent::Errored(PumpError::Interrupted));
        assert_eq!(state, JobState::Completed);
        assert!(state.is_terminal());
    }
}
