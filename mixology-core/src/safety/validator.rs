//! Admission checks
//!
//! Pure functions over the resolved request and the configured limits.
//! Nothing here touches a pump; a violation means nothing is dispatched.

use embassy_time::Duration;

use crate::config::{same_ingredient, PumpId, SafetyLimits};
use crate::preparation::DoseSpec;
use crate::pump::PumpArray;
use crate::traits::PumpDriver;

/// Reasons a request is refused before any pump moves
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SafetyViolation {
    /// Total volume above the per-cocktail limit
    VolumeExceeded { total_ml: f32, limit_ml: f32 },
    /// Alcoholic volume above the per-cocktail limit
    AlcoholExceeded { alcohol_ml: f32, limit_ml: f32 },
    /// One actuation would run longer than the per-pump ceiling
    TimeoutExceeded { pump: PumpId, duration_ms: u64 },
    /// One actuation has no run time
    ZeroDuration(PumpId),
    /// Targeted pump is configured off
    PumpDisabled(PumpId),
    /// Dose ingredient does not match the pump's assignment, or the pump
    /// does not exist
    UnknownIngredientMapping(PumpId),
}

impl core::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SafetyViolation::VolumeExceeded { total_ml, limit_ml } => {
                write!(f, "total volume {} ml exceeds {} ml", total_ml, limit_ml)
            }
            SafetyViolation::AlcoholExceeded {
                alcohol_ml,
                limit_ml,
            } => write!(f, "alcohol {} ml exceeds {} ml", alcohol_ml, limit_ml),
            SafetyViolation::TimeoutExceeded { pump, duration_ms } => {
                write!(f, "pump {} would run {} ms, above the timeout", pump, duration_ms)
            }
            SafetyViolation::ZeroDuration(pump) => {
                write!(f, "pump {} would run for zero time", pump)
            }
            SafetyViolation::PumpDisabled(pump) => write!(f, "pump {} is disabled", pump),
            SafetyViolation::UnknownIngredientMapping(pump) => {
                write!(f, "pump {} is not assigned to this ingredient", pump)
            }
        }
    }
}

/// Validate a resolved preparation request
///
/// Checks run in a fixed order: volume, alcohol, then per-dose timeout,
/// enabled flag and ingredient mapping. Limits are inclusive.
pub fn validate<D: PumpDriver>(
    doses: &[DoseSpec],
    pumps: &PumpArray<D>,
    limits: &SafetyLimits,
) -> Result<(), SafetyViolation> {
    let total_ml: f32 = doses.iter().map(|d| d.volume_ml).sum();
    if total_ml > limits.max_volume_ml {
        return Err(SafetyViolation::VolumeExceeded {
            total_ml,
            limit_ml: limits.max_volume_ml,
        });
    }

    let alcohol_ml: f32 = doses
        .iter()
        .filter(|d| d.category.is_alcoholic())
        .map(|d| d.volume_ml)
        .sum();
    if alcohol_ml > limits.max_alcohol_ml {
        return Err(SafetyViolation::AlcoholExceeded {
            alcohol_ml,
            limit_ml: limits.max_alcohol_ml,
        });
    }

    validate_actuations(doses.iter().map(|d| (d.pump, d.duration)), pumps, limits)?;

    for dose in doses {
        let unit = pumps
            .get(dose.pump)
            .ok_or(SafetyViolation::UnknownIngredientMapping(dose.pump))?;
        if !same_ingredient(unit.ingredient(), dose.ingredient.as_str()) {
            return Err(SafetyViolation::UnknownIngredientMapping(dose.pump));
        }
    }

    Ok(())
}

/// Validate bare actuations (run time and enabled flag)
///
/// Shared by preparation and cleaning. Every run time must be strictly
/// positive and within the per-pump timeout.
pub fn validate_actuations<D: PumpDriver>(
    actuations: impl Iterator<Item = (PumpId, Duration)> + Clone,
    pumps: &PumpArray<D>,
    limits: &SafetyLimits,
) -> Result<(), SafetyViolation> {
    let timeout = limits.pump_timeout();
    for (pump, duration) in actuations.clone() {
        if duration == Duration::from_ticks(0) {
            return Err(SafetyViolation::ZeroDuration(pump));
        }
        if duration > timeout {
            return Err(SafetyViolation::TimeoutExceeded {
                pump,
                duration_ms: duration.as_millis(),
            });
        }
    }

    for (pump, _) in actuations {
        let unit = pumps
            .get(pump)
            .ok_or(SafetyViolation::UnknownIngredientMapping(pump))?;
        if !unit.is_enabled() {
            return Err(SafetyViolation::PumpDisabled(pump));
        }
    }

    Ok(())
}
