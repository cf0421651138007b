//! Aggregate state machine for preparation sessions and cleaning cycles
//!
//! `Pending -> Running -> {Completed | PartiallyFailed | Failed}`, or
//! `Aborted` from any non-terminal state when the emergency stop fires.

use super::JobState;

/// Aggregate session or cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// Created, not yet admitted
    #[default]
    Pending,
    /// Admitted, jobs in flight
    Running,
    /// Every job completed
    Completed,
    /// Some jobs completed, some failed
    PartiallyFailed,
    /// Nothing completed, or admission was rejected
    Failed,
    /// Interrupted by the emergency stop
    Aborted,
}

/// Per-state job counts used to settle a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JobTally {
    /// Jobs that completed
    pub completed: u8,
    /// Jobs that failed
    pub failed: u8,
    /// Jobs cancelled by a halt
    pub cancelled: u8,
}

impl JobTally {
    /// Count terminal job states
    pub fn count(states: impl Iterator<Item = JobState>) -> Self {
        states.fold(Self::default(), |mut t, state| {
            match state {
                JobState::Completed => t.completed += 1,
                JobState::Failed => t.failed += 1,
                JobState::Cancelled => t.cancelled += 1,
                JobState::Pending | JobState::Running => {}
            }
            t
        })
    }
}

/// Events driving the aggregate state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionEvent {
    /// Admission passed, jobs dispatched
    Admitted,
    /// Admission failed, nothing dispatched
    Rejected,
    /// Every job reached a terminal state
    Settled(JobTally),
    /// Emergency stop fired while the session was live
    Halted,
}

impl SessionState {
    /// Check if no further transition can happen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Pending | SessionState::Running)
    }

    /// Check if at least part of the work was done
    pub fn dispensed_anything(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::PartiallyFailed)
    }

    /// Process an event and return the next state
    pub fn transition(self, event: SessionEvent) -> Self {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Pending, Admitted) => Running,
            (Pending, Rejected) => Failed,
            (Pending | Running, Halted) => Aborted,

            (Running, Settled(tally)) => {
                if tally.cancelled > 0 {
                    Aborted
                } else if tally.failed == 0 {
                    Completed
                } else if tally.completed > 0 {
                    PartiallyFailed
                } else {
                    Failed
                }
            }

            // Terminal states absorb everything
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(completed: u8, failed: u8, cancelled: u8) -> SessionEvent {
        SessionEvent::Settled(JobTally {
            completed,
            failed,
            cancelled,
        })
    }

    #[test]
    fn test_admission_flow() {
        let state = SessionState::Pending.transition(SessionEvent::Admitted);
        assert_eq!(state, SessionState::Running);
        assert_eq!(state.transition(tally(3, 0, 0)), SessionState::Completed);
    }

    #[test]
    fn test_rejection_fails() {
        let state = SessionState::Pending.transition(SessionEvent::Rejected);
        assert_eq!(state, SessionState::Failed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_partial_failure() {
        let state = SessionState::Running.transition(tally(1, 1, 0));
        assert_eq!(state, SessionState::PartiallyFailed);
        assert!(state.dispensed_anything());
    }

    #[test]
    fn test_all_failed() {
        assert_eq!(SessionState::Running.transition(tally(0, 2, 0)), SessionState::Failed);
    }

    #[test]
    fn test_cancelled_job_aborts() {
        assert_eq!(SessionState::Running.transition(tally(2, 0, 1)), SessionState::Aborted);
    }

    #[test]
    fn test_halt_from_any_live_state() {
        for state in [SessionState::Pending, SessionState::Running] {
            assert_eq!(state.transition(SessionEvent::Halted), SessionState::Aborted);
        }
    }

    #[test]
    fn test_count_ignores_live_jobs() {
        let states = [
            JobState::Completed,
            JobState::Failed,
            JobState::Running,
            JobState::Cancelled,
            JobState::Completed,
        ];
        let tally = JobTally::count(states.into_iter());
        assert_eq!(tally.completed, 2);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.cancelled, 1);
    }

    #[test]
    fn test_terminal_states_absorb() {
        let terminal = [
            SessionState::Completed,
            SessionState::PartiallyFailed,
            SessionState::Failed,
            SessionState::Aborted,
        ];
        for state in terminal {
            assert_eq!(state.transition(SessionEvent::Halted), state);
            assert_eq!(state.transition(SessionEvent::Admitted), state);
        }
    }
}
