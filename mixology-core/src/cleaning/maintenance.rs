//! Predictive maintenance policy

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::cycle::CleaningKind;
use super::history::CleaningHistory;

const SECONDS_PER_HOUR: u64 = 3600;

/// When to recommend cleaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MaintenancePolicy {
    /// Cocktails between quick cleans
    pub quick_after_cocktails: u32,
    /// Hours between standard cleans
    pub standard_interval_h: u32,
    /// Hours between deep cleans
    pub deep_interval_h: u32,
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        Self {
            quick_after_cocktails: 5,
            standard_interval_h: 24,
            deep_interval_h: 168,
        }
    }
}

impl MaintenancePolicy {
    /// Recommend a cycle, if one is due
    ///
    /// Quick is driven by the cocktail count; Standard and Deep by the time
    /// since their last successful run. A kind never run is due.
    pub fn recommend(
        &self,
        history: &CleaningHistory,
        cocktails_since_cleaning: u32,
        now_s: u64,
    ) -> Option<CleaningKind> {
        if cocktails_since_cleaning >= self.quick_after_cocktails {
            return Some(CleaningKind::Quick);
        }

        [
            (CleaningKind::Standard, self.standard_interval_h),
            (CleaningKind::Deep, self.deep_interval_h),
        ]
        .into_iter()
        .find(|&(kind, _)| self.due_at(history, kind).map_or(true, |due| now_s >= due))
        .map(|(kind, _)| kind)
    }

    /// Earliest upcoming time-based cycle as `(due_s, kind)`
    ///
    /// A kind never run is due at `now_s`.
    pub fn next_due(&self, history: &CleaningHistory, now_s: u64) -> (u64, CleaningKind) {
        let standard = self
            .due_at(history, CleaningKind::Standard)
            .unwrap_or(now_s);
        let deep = self.due_at(history, CleaningKind::Deep).unwrap_or(now_s);

        if deep < standard {
            (deep, CleaningKind::Deep)
        } else {
            (standard, CleaningKind::Standard)
        }
    }

    fn due_at(&self, history: &CleaningHistory, kind: CleaningKind) -> Option<u64> {
        let interval_h = match kind {
            CleaningKind::Standard => self.standard_interval_h,
            CleaningKind::Deep => self.deep_interval_h,
            CleaningKind::Quick | CleaningKind::Sanitize => return None,
        };
        history
            .last_successful(kind)
            .map(|r| r.timestamp_s + interval_h as u64 * SECONDS_PER_HOUR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::CleaningRecord;
    use crate::state::SessionState;
    use heapless::Vec;

    const HOUR: u64 = SECONDS_PER_HOUR;

    fn completed(kind: CleaningKind, timestamp_s: u64) -> CleaningRecord {
        CleaningRecord {
            kind,
            pumps: Vec::new(),
            durations_ms: Vec::new(),
            outcome: SessionState::Completed,
            full_array: true,
            timestamp_s,
        }
    }

    fn fresh_history(now: u64) -> CleaningHistory {
        let mut history = CleaningHistory::new();
        history.push(completed(CleaningKind::Deep, now - HOUR));
        history.push(completed(CleaningKind::Standard, now - HOUR));
        history
    }

    #[test]
    fn test_quick_after_five_cocktails() {
        let policy = MaintenancePolicy::default();
        let now = 1_000 * HOUR;
        let history = fresh_history(now);
        assert_eq!(policy.recommend(&history, 4, now), None);
        assert_eq!(policy.recommend(&history, 5, now), Some(CleaningKind::Quick));
    }

    #[test]
    fn test_empty_history_needs_standard() {
        let policy = MaintenancePolicy::default();
        assert_eq!(
            policy.recommend(&CleaningHistory::new(), 0, 0),
            Some(CleaningKind::Standard)
        );
    }

    #[test]
    fn test_standard_due_after_a_day() {
        let policy = MaintenancePolicy::default();
        let now = 1_000 * HOUR;
        let history = fresh_history(now);
        assert_eq!(policy.recommend(&history, 0, now + 22 * HOUR), None);
        assert_eq!(
            policy.recommend(&history, 0, now + 23 * HOUR),
            Some(CleaningKind::Standard)
        );
    }

    #[test]
    fn test_deep_due_after_a_week() {
        let policy = MaintenancePolicy::default();
        let now = 1_000 * HOUR;
        let mut history = CleaningHistory::new();
        history.push(completed(CleaningKind::Deep, now - 168 * HOUR));
        history.push(completed(CleaningKind::Standard, now - HOUR));
        assert_eq!(policy.recommend(&history, 0, now), Some(CleaningKind::Deep));
    }

    #[test]
    fn test_next_due() {
        let policy = MaintenancePolicy::default();
        let now = 1_000 * HOUR;
        let history = fresh_history(now);
        assert_eq!(
            policy.next_due(&history, now),
            (now + 23 * HOUR, CleaningKind::Standard)
        );
    }
}
