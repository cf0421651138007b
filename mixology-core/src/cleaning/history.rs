//! Cleaning history
//!
//! Immutable records of past cycles, consumed by the maintenance policy and
//! persisted by the application.

use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::cycle::{CleaningCycle, CleaningKind};
use crate::config::{PumpId, MAX_PUMPS};
use crate::state::SessionState;

/// Records kept before the oldest is evicted
pub const HISTORY_CAPACITY: usize = 32;

/// One past cleaning cycle
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CleaningRecord {
    /// Cycle kind
    pub kind: CleaningKind,
    /// Pumps touched
    pub pumps: Vec<PumpId, MAX_PUMPS>,
    /// Run time per pump (ms), same order as `pumps`
    pub durations_ms: Vec<u32, MAX_PUMPS>,
    /// Aggregate outcome
    pub outcome: SessionState,
    /// Whether the cycle targeted the whole array
    pub full_array: bool,
    /// Wall-clock time of the request (Unix seconds)
    pub timestamp_s: u64,
}

impl CleaningRecord {
    /// Build a record from a finished cycle
    pub fn from_cycle(cycle: &CleaningCycle, timestamp_s: u64) -> Self {
        let mut pumps = Vec::new();
        let mut durations_ms = Vec::new();
        for job in &cycle.jobs {
            // Both vectors share the cycle's capacity
            let _ = pumps.push(job.pump);
            let _ = durations_ms.push(job.elapsed.as_millis().min(u32::MAX as u64) as u32);
        }

        Self {
            kind: cycle.kind,
            pumps,
            durations_ms,
            outcome: cycle.state,
            full_array: matches!(cycle.target, super::CleaningTarget::All),
            timestamp_s,
        }
    }

    /// Check if the cycle ran to completion
    pub fn succeeded(&self) -> bool {
        self.outcome == SessionState::Completed
    }
}

/// Bounded cleaning history, oldest first
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CleaningHistory {
    records: Vec<CleaningRecord, HISTORY_CAPACITY>,
}

impl CleaningHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, evicting the oldest when full
    pub fn push(&mut self, record: CleaningRecord) {
        if self.records.is_full() {
            self.records.remove(0);
        }
        let _ = self.records.push(record);
    }

    /// Records, oldest first
    pub fn records(&self) -> &[CleaningRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the history is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent successful cycle of a kind
    pub fn last_successful(&self, kind: CleaningKind) -> Option<&CleaningRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| r.kind == kind && r.succeeded())
    }

    /// Most recent `n` records, oldest first
    pub fn recent(&self, n: usize) -> &[CleaningRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }
}
