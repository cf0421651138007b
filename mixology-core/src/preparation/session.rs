//! Preparation session records

use embassy_time::{Duration, Instant};
use heapless::Vec;

use super::dose::{DoseMode, DoseSpec};
use crate::config::{Label, MAX_INGREDIENTS};
use crate::pump::PumpError;
use crate::state::{JobState, JobTally, SessionState};

/// One pump's pour within a session
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PourJob {
    /// What to pour
    pub dose: DoseSpec,
    /// Job state
    pub state: JobState,
    /// Error that ended the job, if any
    pub error: Option<PumpError>,
    /// Time the pump actually ran
    pub elapsed: Duration,
    /// Volume poured (ml); estimated from run time when the job did not
    /// complete
    pub dispensed_ml: f32,
}

impl PourJob {
    /// Create a pending job
    pub fn new(dose: DoseSpec) -> Self {
        Self {
            dose,
            state: JobState::Pending,
            error: None,
            elapsed: Duration::from_ticks(0),
            dispensed_ml: 0.0,
        }
    }
}

/// Result of one cocktail preparation
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PreparationSession {
    /// Session id, unique across sessions and cleaning cycles
    pub id: u32,
    /// Recipe identifier
    pub recipe: Label,
    /// Dose selection
    pub dose: DoseMode,
    /// Jobs in dispatch order
    pub jobs: Vec<PourJob, MAX_INGREDIENTS>,
    /// Aggregate state
    pub state: SessionState,
    /// Admission time
    pub started_at: Instant,
    /// Time the last job settled
    pub ended_at: Option<Instant>,
    /// Total volume poured (ml)
    pub total_dispensed_ml: f32,
}

impl PreparationSession {
    /// Job counts by terminal state
    pub fn tally(&self) -> JobTally {
        JobTally::count(self.jobs.iter().map(|j| j.state))
    }

    /// Find the job for a pump
    pub fn job(&self, pump: crate::config::PumpId) -> Option<&PourJob> {
        self.jobs.iter().find(|j| j.dose.pump == pump)
    }

    /// Wall time from admission to the last job settling
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}
