//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mixology_core::cleaning::CleaningKind;
use mixology_core::config::PumpId;
use mixology_core::preparation::DoseMode;

/// Command-line arguments for the mixology controller
#[derive(Parser, Debug)]
#[command(name = "mixology")]
#[command(about = "Peristaltic cocktail machine controller")]
#[command(version)]
pub struct Cli {
    /// Machine and recipe configuration (defaults to the built-in one)
    #[arg(short, long, env = "MIXOLOGY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding calibration and cleaning history
    #[arg(long, default_value = "mixology-state", env = "MIXOLOGY_STATE_DIR")]
    pub state_dir: PathBuf,

    /// Simulate every pump even when GPIO is available
    #[arg(long, env = "MIXOLOGY_SIMULATE")]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Prepare a cocktail from the recipe catalog
    Prepare {
        /// Recipe id
        recipe: String,
        /// simple, double, half, triple or a multiplier such as 1.5
        #[arg(short, long, default_value = "simple", value_parser = parse_dose)]
        dose: DoseMode,
    },
    /// Run a cleaning cycle
    Clean {
        /// quick, standard, deep or sanitize
        #[arg(value_parser = parse_kind)]
        kind: CleaningKind,
        /// Clean one pump instead of the whole array
        #[arg(short, long)]
        pump: Option<PumpId>,
    },
    /// Pour a test volume, or record what a test pour actually measured
    Calibrate {
        /// Pump id
        pump: PumpId,
        /// Volume requested (ml)
        #[arg(long, default_value_t = 50.0)]
        volume: f32,
        /// Volume measured in the glass (ml); records instead of pouring
        #[arg(long)]
        measured: Option<f32>,
    },
    /// Show cleaning history and what is due next
    Maintenance,
    /// List pumps with their calibration
    Pumps,
    /// List recipes
    Recipes,
}

fn parse_dose(s: &str) -> Result<DoseMode, String> {
    s.parse::<DoseMode>()
        .ok()
        .filter(DoseMode::is_valid)
        .ok_or_else(|| format!("invalid dose '{}'", s))
}

fn parse_kind(s: &str) -> Result<CleaningKind, String> {
    s.parse::<CleaningKind>()
        .map_err(|_| format!("unknown cleaning cycle '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mixology").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_prepare_defaults_to_simple() {
        let cli = parse(&["prepare", "gin-tonic"]);
        match cli.command {
            Command::Prepare { recipe, dose } => {
                assert_eq!(recipe, "gin-tonic");
                assert_eq!(dose, DoseMode::Simple);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.state_dir, PathBuf::from("mixology-state"));
        assert!(!cli.simulate);
    }

    #[test]
    fn test_simulate_flag() {
        let cli = parse(&["--simulate", "pumps"]);
        assert!(cli.simulate);
        assert!(matches!(cli.command, Command::Pumps));
    }

    #[test]
    fn test_custom_dose() {
        let cli = parse(&["prepare", "gin-tonic", "--dose", "1.5x"]);
        assert!(matches!(
            cli.command,
            Command::Prepare { dose: DoseMode::Custom(m), .. } if m == 1.5
        ));
    }

    #[test]
    fn test_invalid_dose_rejected() {
        assert!(Cli::try_parse_from(["mixology", "prepare", "x", "--dose", "0"]).is_err());
        assert!(Cli::try_parse_from(["mixology", "prepare", "x", "--dose", "lots"]).is_err());
    }

    #[test]
    fn test_clean_single_pump() {
        let cli = parse(&["clean", "deep", "--pump", "3"]);
        assert!(matches!(
            cli.command,
            Command::Clean {
                kind: CleaningKind::Deep,
                pump: Some(3)
            }
        ));
        assert!(Cli::try_parse_from(["mixology", "clean", "scrub"]).is_err());
    }

    #[test]
    fn test_calibrate() {
        let cli = parse(&["calibrate", "2", "--measured", "46.5"]);
        match cli.command {
            Command::Calibrate {
                pump,
                volume,
                measured,
            } => {
                assert_eq!(pump, 2);
                assert_eq!(volume, 50.0);
                assert_eq!(measured, Some(46.5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
