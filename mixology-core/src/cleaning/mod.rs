//! Cleaning
//!
//! Phase tables per cycle kind, the scheduler that runs them on the pump
//! array, the cleaning history and the maintenance policy built on it.

pub mod cycle;
pub mod history;
pub mod maintenance;
pub mod scheduler;

pub use cycle::{
    CleaningCycle, CleaningJob, CleaningKind, CleaningPhase, CleaningRequest, CleaningTables,
    CleaningTarget, PhaseStep, PhaseTable, MAX_PHASES,
};
pub use history::{CleaningHistory, CleaningRecord, HISTORY_CAPACITY};
pub use maintenance::MaintenancePolicy;
pub use scheduler::{runnable_kinds, CleaningScheduler};
