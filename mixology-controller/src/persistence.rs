//! State persistence
//!
//! Calibration factors and maintenance bookkeeping are stored as postcard
//! files in the state directory. Missing or corrupt files fall back to
//! empty state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mixology_core::cleaning::CleaningHistory;
use mixology_core::config::CalibrationData;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const CALIBRATION_FILE: &str = "calibration.bin";
const MAINTENANCE_FILE: &str = "maintenance.bin";

/// Maximum serialized calibration size
const MAX_CALIBRATION_SIZE: usize = 512;

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encoding failed")]
    Encode(#[from] postcard::Error),
}

/// Cleaning history and the cocktail counter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceState {
    pub history: CleaningHistory,
    pub cocktails_since_cleaning: u32,
}

/// State directory
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Open `dir`, creating it if needed
    pub fn open(dir: &Path) -> Result<Self, PersistError> {
        fs::create_dir_all(dir).map_err(|source| PersistError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Stored calibration, or empty data
    pub fn load_calibration(&self) -> CalibrationData {
        let Some(bytes) = self.read(CALIBRATION_FILE) else {
            debug!("no stored calibration, using configured factors");
            return CalibrationData::new();
        };
        match CalibrationData::decode(&bytes) {
            Some(data) => {
                info!("loaded pump calibration");
                data
            }
            None => {
                warn!("stored calibration is corrupt, using configured factors");
                CalibrationData::new()
            }
        }
    }

    /// Store calibration
    pub fn save_calibration(&self, data: &CalibrationData) -> Result<(), PersistError> {
        let mut data = data.clone();
        let mut buf = [0u8; MAX_CALIBRATION_SIZE];
        let bytes = data.encode(&mut buf)?;
        self.write(CALIBRATION_FILE, bytes)?;
        debug!("saved calibration ({} bytes)", bytes.len());
        Ok(())
    }

    /// Stored maintenance state, or an empty one
    pub fn load_maintenance(&self) -> MaintenanceState {
        let Some(bytes) = self.read(MAINTENANCE_FILE) else {
            return MaintenanceState::default();
        };
        postcard::from_bytes(&bytes).unwrap_or_else(|e| {
            warn!("stored maintenance state is corrupt ({}), starting empty", e);
            MaintenanceState::default()
        })
    }

    /// Store maintenance state
    pub fn save_maintenance(&self, state: &MaintenanceState) -> Result<(), PersistError> {
        let bytes = postcard::to_stdvec(state)?;
        self.write(MAINTENANCE_FILE, &bytes)?;
        debug!("saved {} cleaning records", state.history.len());
        Ok(())
    }

    fn read(&self, name: &str) -> Option<Vec<u8>> {
        let path = self.dir.join(name);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write through a temporary file so a crash never leaves a torn file
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
        let path = self.dir.join(name);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|source| PersistError::Io { path, source })
    }
}
