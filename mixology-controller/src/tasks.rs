//! Background tasks
//!
//! The event log runs on the embassy executor. The emergency stop watcher
//! reads stdin on its own thread, since a blocking read would stall the
//! executor.

use std::io::BufRead;
use std::thread;

use anyhow::{Context, Result};
use mixology_core::estop::HaltSource;
use mixology_core::state::MachineEvent;
use mixology_core::Machine;
use tracing::{debug, info, warn};

use crate::driver::Pump;

/// The machine as the controller runs it
pub type Controller = Machine<Pump>;

/// Log every machine event
#[embassy_executor::task]
pub async fn event_log_task(machine: &'static Controller) {
    let mut events = match machine.subscribe() {
        Ok(events) => events,
        Err(e) => {
            warn!("event log disabled: {:?}", e);
            return;
        }
    };
    debug!("event log task started");

    loop {
        match events.next_message_pure().await {
            MachineEvent::Pump { id, state } => debug!("pump {} -> {:?}", id, state),
            MachineEvent::Session { id, kind, state } => {
                info!("{:?} #{} -> {:?}", kind, id, state)
            }
            MachineEvent::Job {
                session,
                pump,
                state,
            } => debug!("#{} pump {} -> {:?}", session, pump, state),
            MachineEvent::CleaningPhase { cycle, pump, phase } => {
                info!("#{} pump {} {:?}", cycle, pump, phase)
            }
            MachineEvent::CalibrationUpdated { pump, factor } => {
                info!("pump {} calibration factor {:.3}", pump, factor)
            }
            MachineEvent::EmergencyHalt { active: true } => warn!("EMERGENCY STOP"),
            MachineEvent::EmergencyHalt { active: false } => info!("emergency stop cleared"),
        }
    }
}

/// Map an operator line to a halt source
///
/// `stop` is the operator button; a configured trigger name stands in for
/// its hardware line.
pub fn halt_source(machine: &Controller, line: &str) -> Option<HaltSource> {
    let line = line.trim();
    if line.eq_ignore_ascii_case("stop") {
        return Some(HaltSource::Operator);
    }
    machine
        .config()
        .safety
        .estop_triggers
        .iter()
        .position(|t| t.as_str().eq_ignore_ascii_case(line))
        .map(|i| HaltSource::Line(i as u8))
}

/// Watch stdin for emergency stop requests
pub fn spawn_estop_watcher(machine: &'static Controller) -> Result<()> {
    thread::Builder::new()
        .name("estop".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines().map_while(|l| l.ok()) {
                match halt_source(machine, &line) {
                    Some(source) => machine.trigger_halt(source),
                    None if line.trim().is_empty() => {}
                    None => warn!("unknown input '{}', type 'stop' to halt", line.trim()),
                }
            }
        })
        .context("failed to start emergency stop watcher")?;
    Ok(())
}
