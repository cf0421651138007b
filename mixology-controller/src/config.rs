//! Configuration loading
//!
//! The machine configuration and the recipe catalog live in one TOML file.
//! A default is compiled in; `--config` overrides it.

use std::fs;
use std::path::{Path, PathBuf};

use mixology_core::config::{ConfigError, MachineConfig, Recipe};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Embedded default configuration
const EMBEDDED_CONFIG: &str = include_str!("../machine.toml");

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML")]
    Parse(#[from] toml::de::Error),
    #[error("invalid machine configuration")]
    Invalid(#[from] ConfigError),
    #[error("duplicate recipe '{0}'")]
    DuplicateRecipe(String),
}

/// Everything the controller reads at startup
#[derive(Debug, Deserialize)]
pub struct ControllerConfig {
    /// Pumps, limits, calibration and cleaning settings
    #[serde(flatten)]
    pub machine: MachineConfig,
    /// Recipe catalog
    #[serde(default)]
    pub recipes: Vec<Recipe>,
}

impl ControllerConfig {
    /// Load `path`, or the embedded default when `None`
    pub fn load(path: Option<&Path>) -> Result<Self, LoadError> {
        let config = match path {
            Some(path) => {
                info!("loading configuration from {}", path.display());
                let text = fs::read_to_string(path).map_err(|source| LoadError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::parse(&text)?
            }
            None => {
                info!("using embedded configuration");
                Self::parse(EMBEDDED_CONFIG)?
            }
        };
        config.log_summary();
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let config: Self = toml::from_str(text)?;
        config.machine.validate()?;

        for (i, recipe) in config.recipes.iter().enumerate() {
            if config.recipes[..i]
                .iter()
                .any(|r| r.id.as_str().eq_ignore_ascii_case(recipe.id.as_str()))
            {
                return Err(LoadError::DuplicateRecipe(recipe.id.to_string()));
            }
        }
        Ok(config)
    }

    /// Find a recipe by id, ignoring case
    pub fn recipe(&self, id: &str) -> Option<&Recipe> {
        self.recipes
            .iter()
            .find(|r| r.id.as_str().eq_ignore_ascii_case(id.trim()))
    }

    fn log_summary(&self) {
        info!("configuration loaded");
        debug!("  {} pumps", self.machine.pumps.len());
        debug!("  {} recipes", self.recipes.len());
        debug!(
            "  limits: {} ml total, {} ml alcohol, {} ms per pump",
            self.machine.safety.max_volume_ml,
            self.machine.safety.max_alcohol_ml,
            self.machine.safety.pump_timeout_ms
        );
    }
}
