//! State machines and progress events
//!
//! Session and job states are explicit, finite and deterministic; every
//! transition goes through `transition(self, event)`.

pub mod events;
pub mod job;
pub mod session;

pub use events::{publish, ActivityKind, EventBus, EventSubscriber, MachineEvent};
pub use job::{JobEvent, JobState};
pub use session::{JobTally, SessionEvent, SessionState};
