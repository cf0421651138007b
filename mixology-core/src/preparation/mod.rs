//! Cocktail preparation
//!
//! A request is resolved to one dose per pump, sized by the calibration
//! engine, validated as a whole, then dispatched concurrently.

pub mod admission;
pub mod dose;
pub mod orchestrator;
pub mod session;

pub use admission::{plan_doses, AdmissionError};
pub use dose::{DoseMode, DoseSpec};
pub use orchestrator::PreparationOrchestrator;
pub use session::{PourJob, PreparationSession};
