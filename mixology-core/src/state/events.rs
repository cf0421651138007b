//! Progress events published by the dispense core
//!
//! Every pump transition, job transition and aggregate transition is
//! published on the [`EventBus`] so that the UI and the log can follow
//! progress without polling hardware state.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pubsub::{PubSubChannel, Subscriber};

use super::{JobState, SessionState};
use crate::cleaning::CleaningPhase;
use crate::config::PumpId;
use crate::pump::PumpState;

/// Events buffered per subscriber before the oldest is dropped
pub const EVENT_CAPACITY: usize = 32;

/// Maximum concurrent event subscribers
pub const EVENT_SUBSCRIBERS: usize = 4;

/// Broadcast channel for [`MachineEvent`]s
pub type EventBus =
    PubSubChannel<CriticalSectionRawMutex, MachineEvent, EVENT_CAPACITY, EVENT_SUBSCRIBERS, 0>;

/// Receiving end of the [`EventBus`]
pub type EventSubscriber<'a> =
    Subscriber<'a, CriticalSectionRawMutex, MachineEvent, EVENT_CAPACITY, EVENT_SUBSCRIBERS, 0>;

/// What a session id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActivityKind {
    /// Cocktail preparation
    Preparation,
    /// Cleaning cycle
    Cleaning,
}

/// Observable state changes
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MachineEvent {
    /// A pump changed runtime state
    Pump { id: PumpId, state: PumpState },
    /// A session or cleaning cycle changed aggregate state
    Session {
        id: u32,
        kind: ActivityKind,
        state: SessionState,
    },
    /// A job inside a session or cycle changed state
    Job {
        session: u32,
        pump: PumpId,
        state: JobState,
    },
    /// A pump entered a cleaning phase
    CleaningPhase {
        cycle: u32,
        pump: PumpId,
        phase: CleaningPhase,
    },
    /// A calibration factor changed and should be persisted
    CalibrationUpdated { pump: PumpId, factor: f32 },
    /// Emergency stop engaged or cleared
    EmergencyHalt { active: bool },
}

/// Publish without waiting; lagging subscribers lose the oldest events
pub fn publish(bus: &EventBus, event: MachineEvent) {
    bus.immediate_publisher().publish_immediate(event);
}
