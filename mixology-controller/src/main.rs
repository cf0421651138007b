//! Mixology - Peristaltic Cocktail Machine Controller
//!
//! Host binary for the dispense core. Loads the machine and recipe
//! configuration, picks hardware or simulated pump drivers, restores
//! calibration and maintenance state, runs one command on the embassy std
//! executor and saves state again.
//!
//! Type `stop` (or a configured trigger name) on stdin while a command runs
//! to engage the emergency stop.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use embassy_executor::Spawner;
use embassy_time::Timer;
use static_cell::StaticCell;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixology_core::cleaning::{CleaningRequest, CleaningTarget};
use mixology_core::preparation::PreparationSession;
use mixology_core::state::SessionState;
use mixology_core::Machine;
use mixology_drivers::pump::SimulatedPump;

mod cli;
mod config;
mod driver;
mod persistence;
mod tasks;

use cli::{Cli, Command};
use config::ControllerConfig;
use driver::Pump;
use persistence::{MaintenanceState, Store};
use tasks::Controller;

/// Machine shared with the background tasks
static MACHINE: StaticCell<Controller> = StaticCell::new();

/// Time for the event log to drain before exit
const DRAIN_MS: u64 = 50;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mixology=info,mixology_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let code = match run(spawner, cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    Timer::after_millis(DRAIN_MS).await;
    std::process::exit(code);
}

async fn run(spawner: Spawner, cli: Cli) -> Result<()> {
    let config = ControllerConfig::load(cli.config.as_deref())?;

    if let Command::Recipes = cli.command {
        print_recipes(&config);
        return Ok(());
    }

    let store = Store::open(&cli.state_dir)
        .with_context(|| format!("cannot use state directory {}", cli.state_dir.display()))?;

    let mut drivers = driver::build_drivers(&config.machine, cli.simulate)?;
    let machine = Machine::new(config.machine.clone(), |pump| {
        drivers
            .remove(&pump.id)
            .unwrap_or_else(|| Pump::Simulated(SimulatedPump::from_config(pump)))
    })
    .context("failed to build machine")?;
    let machine: &'static Controller = MACHINE.init(machine);

    machine.apply_calibration(&store.load_calibration());
    let maintenance = store.load_maintenance();
    machine.load_maintenance(maintenance.history, maintenance.cocktails_since_cleaning);

    spawner
        .spawn(tasks::event_log_task(machine))
        .map_err(|e| anyhow!("failed to spawn event log: {:?}", e))?;
    tasks::spawn_estop_watcher(machine)?;

    let outcome = execute(machine, &config, cli.command).await;

    store
        .save_calibration(&machine.calibration_snapshot())
        .context("failed to save calibration")?;
    store
        .save_maintenance(&MaintenanceState {
            history: machine.cleaning_history(),
            cocktails_since_cleaning: machine.cocktails_since_cleaning(),
        })
        .context("failed to save maintenance state")?;

    outcome
}

async fn execute(machine: &Controller, config: &ControllerConfig, command: Command) -> Result<()> {
    match command {
        Command::Prepare { recipe, dose } => {
            let recipe = config
                .recipe(&recipe)
                .with_context(|| format!("no recipe named '{}'", recipe))?;
            info!("preparing {} ({:?})", recipe.id.as_str(), dose);

            let session = machine.prepare(recipe, dose).await?;
            print_session(&session);
            settle(session.state)?;

            if let Some(kind) = machine.recommend_cleaning(now_s()) {
                warn!("{} cleaning recommended", kind.as_str());
            }
        }

        Command::Clean { kind, pump } => {
            let now = now_s();
            let request = match pump {
                Some(pump) => CleaningRequest::pump(kind, pump, now),
                None => CleaningRequest::all(kind, now),
            };
            let total = config.machine.cleaning.total(kind);
            info!(
                "starting {} cleaning ({} s per pump)",
                kind.as_str(),
                total.as_secs()
            );

            let cycle = machine.clean(request).await?;
            println!("{} cleaning #{}: {:?}", kind.as_str(), cycle.id, cycle.state);
            for job in &cycle.jobs {
                match job.error {
                    Some(e) => println!("  pump {}: {:?} ({})", job.pump, job.state, e),
                    None => println!(
                        "  pump {}: {:?} after {} ms",
                        job.pump,
                        job.state,
                        job.elapsed.as_millis()
                    ),
                }
            }
            settle(cycle.state)?;
        }

        Command::Calibrate {
            pump,
            volume,
            measured: None,
        } => {
            let duration = machine.duration_for(pump, volume)?;
            info!(
                "test pour of {} ml on pump {} ({} ms)",
                volume,
                pump,
                duration.as_millis()
            );
            let session = machine.test_pour(pump, volume).await?;
            print_session(&session);
            settle(session.state)?;
            println!(
                "measure the glass, then run: mixology calibrate {} --volume {} --measured <ml>",
                pump, volume
            );
        }

        Command::Calibrate {
            pump,
            volume,
            measured: Some(measured),
        } => {
            let factor = machine.record_measurement(pump, volume, measured)?;
            println!("pump {}: calibration factor {:.3}", pump, factor);
        }

        Command::Maintenance => print_maintenance(machine),

        Command::Pumps => {
            for unit in machine.pumps().iter() {
                println!(
                    "{:>2}  {:<16} {:>5.2} ml/s  x{:.3}  {:<9}  {:?}{}",
                    unit.id(),
                    unit.ingredient(),
                    unit.flow_rate_ml_s(),
                    unit.calibration_factor(),
                    unit.with_driver(|d| d.kind()).as_str(),
                    unit.state(),
                    if unit.is_enabled() { "" } else { "  (disabled)" }
                );
            }
        }

        Command::Recipes => print_recipes(config),
    }
    Ok(())
}

/// Turn an unsuccessful outcome into an error exit
fn settle(state: SessionState) -> Result<()> {
    match state {
        SessionState::Completed => Ok(()),
        SessionState::PartiallyFailed => {
            warn!("some pumps failed");
            Ok(())
        }
        SessionState::Aborted => bail!("stopped by emergency stop"),
        other => bail!("finished {:?}", other),
    }
}

fn print_session(session: &PreparationSession) {
    println!(
        "{} #{}: {:?}, {:.1} ml",
        session.recipe.as_str(),
        session.id,
        session.state,
        session.total_dispensed_ml
    );
    for job in &session.jobs {
        let line = format!(
            "  pump {} {:<16} {:>6.1} / {:>6.1} ml  {:?}",
            job.dose.pump,
            job.dose.ingredient.as_str(),
            job.dispensed_ml,
            job.dose.volume_ml,
            job.state
        );
        match job.error {
            Some(e) => println!("{} ({})", line, e),
            None => println!("{}", line),
        }
    }
}

fn print_maintenance(machine: &Controller) {
    let now = now_s();
    let history = machine.cleaning_history();

    println!(
        "{} cocktails since the last full cleaning",
        machine.cocktails_since_cleaning()
    );
    match machine.recommend_cleaning(now) {
        Some(kind) => println!("recommended now: {}", kind.as_str()),
        None => {
            let (due, kind) = machine.next_cleaning_due(now);
            let hours = due.saturating_sub(now) / 3600;
            println!("next due: {} in {} h", kind.as_str(), hours);
        }
    }

    let runnable = machine.runnable_cleaning(CleaningTarget::All);
    let names: Vec<&str> = runnable.iter().map(|k| k.as_str()).collect();
    println!("runnable: {}", names.join(", "));

    for record in history.recent(10).iter().rev() {
        println!(
            "  {}  {:<8} {:?}  {} pumps{}",
            record.timestamp_s,
            record.kind.as_str(),
            record.outcome,
            record.pumps.len(),
            if record.full_array { "" } else { " (manual)" }
        );
    }
}

fn print_recipes(config: &ControllerConfig) {
    for recipe in &config.recipes {
        let lines: Vec<String> = recipe
            .ingredients
            .iter()
            .filter(|i| i.category.is_poured())
            .map(|i| format!("{} {} ml", i.name.as_str(), i.amount_ml))
            .collect();
        println!(
            "{:<20} {:>6.1} ml  {}",
            recipe.id.as_str(),
            recipe.base_volume_ml(),
            lines.join(", ")
        );
    }
}

/// Wall-clock Unix seconds
fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
