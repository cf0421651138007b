//! Cleaning cycle kinds, phase tables and cycle records

use embassy_time::{Duration, Instant};
use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{PumpId, MAX_PUMPS};
use crate::pump::PumpError;
use crate::state::{JobState, JobTally, SessionState};

/// Maximum phases in one cycle kind
pub const MAX_PHASES: usize = 5;

/// Cleaning cycle kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CleaningKind {
    /// Short rinse between cocktails
    Quick,
    /// End-of-service clean
    Standard,
    /// Full maintenance clean; needs the whole array
    Deep,
    /// Sanitize and rinse only; needs the whole array
    Sanitize,
}

impl CleaningKind {
    /// Check if the cycle locks the whole pump array
    pub fn is_exclusive(&self) -> bool {
        matches!(self, CleaningKind::Deep | CleaningKind::Sanitize)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            CleaningKind::Quick => "quick",
            CleaningKind::Standard => "standard",
            CleaningKind::Deep => "deep",
            CleaningKind::Sanitize => "sanitize",
        }
    }
}

impl core::str::FromStr for CleaningKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            CleaningKind::Quick,
            CleaningKind::Standard,
            CleaningKind::Deep,
            CleaningKind::Sanitize,
        ]
        .into_iter()
        .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or(())
    }
}

/// Phase within a cleaning cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CleaningPhase {
    /// Initial rinse with water
    Rinse,
    /// Cleaning solution
    Clean,
    /// Sanitizing solution
    Sanitize,
    /// Final water rinse
    FinalRinse,
    /// Run dry to empty the lines
    Dry,
}

/// One phase with its per-pump run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseStep {
    /// Phase
    pub phase: CleaningPhase,
    /// Run time per pump (ms)
    pub duration_ms: u32,
}

impl PhaseStep {
    /// Create a phase step
    pub const fn new(phase: CleaningPhase, duration_ms: u32) -> Self {
        Self { phase, duration_ms }
    }

    /// Run time as a duration
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms as u64)
    }
}

/// Phase list of one cycle kind
pub type PhaseTable = Vec<PhaseStep, MAX_PHASES>;

/// Per-kind phase tables
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CleaningTables {
    pub quick: PhaseTable,
    pub standard: PhaseTable,
    pub deep: PhaseTable,
    pub sanitize: PhaseTable,
}

fn table(steps: &[PhaseStep]) -> PhaseTable {
    steps.iter().copied().take(MAX_PHASES).collect()
}

impl Default for CleaningTables {
    fn default() -> Self {
        use CleaningPhase::*;
        Self {
            quick: table(&[PhaseStep::new(Rinse, 10_000), PhaseStep::new(Clean, 15_000)]),
            standard: table(&[
                PhaseStep::new(Rinse, 20_000),
                PhaseStep::new(Clean, 30_000),
                PhaseStep::new(Sanitize, 25_000),
                PhaseStep::new(FinalRinse, 15_000),
            ]),
            // Dry is capped at 60 s so it fits the default pump timeout
            deep: table(&[
                PhaseStep::new(Rinse, 30_000),
                PhaseStep::new(Clean, 60_000),
                PhaseStep::new(Sanitize, 45_000),
                PhaseStep::new(FinalRinse, 30_000),
                PhaseStep::new(Dry, 60_000),
            ]),
            sanitize: table(&[
                PhaseStep::new(Sanitize, 30_000),
                PhaseStep::new(FinalRinse, 20_000),
            ]),
        }
    }
}

impl CleaningTables {
    /// Phases of a cycle kind
    pub fn phases(&self, kind: CleaningKind) -> &[PhaseStep] {
        match kind {
            CleaningKind::Quick => &self.quick,
            CleaningKind::Standard => &self.standard,
            CleaningKind::Deep => &self.deep,
            CleaningKind::Sanitize => &self.sanitize,
        }
    }

    /// Per-pump run time of a cycle kind
    pub fn total(&self, kind: CleaningKind) -> Duration {
        self.phases(kind)
            .iter()
            .fold(Duration::from_ticks(0), |acc, step| acc + step.duration())
    }
}

/// Pumps targeted by a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CleaningTarget {
    /// Every enabled pump
    #[default]
    All,
    /// One pump, for a manual clean
    Pump(PumpId),
}

/// Request to run a cleaning cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CleaningRequest {
    /// Cycle kind
    pub kind: CleaningKind,
    /// Target pumps
    pub target: CleaningTarget,
    /// Wall-clock time of the request (Unix seconds), stored in history
    pub requested_at_s: u64,
}

impl CleaningRequest {
    /// Clean every enabled pump
    pub fn all(kind: CleaningKind, requested_at_s: u64) -> Self {
        Self {
            kind,
            target: CleaningTarget::All,
            requested_at_s,
        }
    }

    /// Clean a single pump
    pub fn pump(kind: CleaningKind, pump: PumpId, requested_at_s: u64) -> Self {
        Self {
            kind,
            target: CleaningTarget::Pump(pump),
            requested_at_s,
        }
    }
}

/// One pump's share of a cleaning cycle
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CleaningJob {
    /// Pump cleaned
    pub pump: PumpId,
    /// Job state
    pub state: JobState,
    /// Last phase started
    pub phase: Option<CleaningPhase>,
    /// Error that ended the job, if any
    pub error: Option<PumpError>,
    /// Total run time over all phases
    pub elapsed: Duration,
}

/// Result of a cleaning cycle
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CleaningCycle {
    /// Cycle id, unique across sessions and cycles
    pub id: u32,
    /// Cycle kind
    pub kind: CleaningKind,
    /// Target
    pub target: CleaningTarget,
    /// Per-pump jobs
    pub jobs: Vec<CleaningJob, MAX_PUMPS>,
    /// Aggregate state
    pub state: SessionState,
    /// Admission time
    pub started_at: Instant,
    /// Time the last job settled
    pub ended_at: Option<Instant>,
}

impl CleaningCycle {
    /// Job counts by terminal state
    pub fn tally(&self) -> JobTally {
        JobTally::count(self.jobs.iter().map(|j| j.state))
    }

    /// Find the job for a pump
    pub fn job(&self, pump: PumpId) -> Option<&CleaningJob> {
        self.jobs.iter().find(|j| j.pump == pump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables() {
        let tables = CleaningTables::default();
        assert_eq!(tables.phases(CleaningKind::Quick).len(), 2);
        assert_eq!(tables.total(CleaningKind::Quick), Duration::from_secs(25));
        assert_eq!(tables.total(CleaningKind::Standard), Duration::from_secs(90));
        assert_eq!(tables.phases(CleaningKind::Deep).len(), 5);
        assert_eq!(
            tables.phases(CleaningKind::Sanitize)[0].phase,
            CleaningPhase::Sanitize
        );
    }

    #[test]
    fn test_default_phases_fit_timeout() {
        let tables = CleaningTables::default();
        let timeout = crate::config::SafetyLimits::default().pump_timeout();
        for kind in [
            CleaningKind::Quick,
            CleaningKind::Standard,
            CleaningKind::Deep,
            CleaningKind::Sanitize,
        ] {
            assert!(tables.phases(kind).iter().all(|s| s.duration() <= timeout));
        }
    }

    #[test]
    fn test_exclusive_kinds() {
        assert!(CleaningKind::Deep.is_exclusive());
        assert!(CleaningKind::Sanitize.is_exclusive());
        assert!(!CleaningKind::Quick.is_exclusive());
        assert!(!CleaningKind::Standard.is_exclusive());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("Deep".parse(), Ok(CleaningKind::Deep));
        assert_eq!("sanitize".parse(), Ok(CleaningKind::Sanitize));
        assert_eq!("soak".parse::<CleaningKind>(), Err(()));
    }
}
