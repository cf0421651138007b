//! Admission: resolve, size and validate a request before dispatch

use heapless::Vec;

use super::dose::{DoseMode, DoseSpec};
use crate::calibration::{CalibrationEngine, CalibrationError};
use crate::config::{same_ingredient, Label, PumpId, Recipe, SafetyLimits, MAX_INGREDIENTS};
use crate::pump::{ClaimError, PumpArray};
use crate::safety::{validate, SafetyViolation};
use crate::traits::PumpDriver;

/// Reasons a preparation or cleaning request is refused
///
/// Nothing has been actuated when one of these is returned.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdmissionError {
    /// Emergency stop is active, or a targeted pump still needs a reset
    /// after one
    EmergencyHalted,
    /// No pump is assigned to this ingredient
    UnassignedIngredient(Label),
    /// Dose multiplier is not a positive number
    InvalidDose,
    /// Request contains nothing to pour
    NothingToDispense,
    /// A dose could not be sized
    Calibration {
        pump: PumpId,
        error: CalibrationError,
    },
    /// Request breaks a safety limit
    Safety(SafetyViolation),
    /// A targeted pump is held by another job
    SystemBusy,
    /// Explicit pump id does not exist
    UnknownPump(PumpId),
    /// Recipe resolves to more pumps than a session can hold
    TooManyIngredients,
}

impl core::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AdmissionError::EmergencyHalted => write!(f, "emergency stop active"),
            AdmissionError::UnassignedIngredient(name) => {
                write!(f, "no pump assigned to '{}'", name.as_str())
            }
            AdmissionError::InvalidDose => write!(f, "dose multiplier must be > 0"),
            AdmissionError::NothingToDispense => write!(f, "nothing to dispense"),
            AdmissionError::Calibration { pump, error } => write!(f, "pump {}: {}", pump, error),
            AdmissionError::Safety(violation) => write!(f, "safety: {}", violation),
            AdmissionError::SystemBusy => write!(f, "pumps busy"),
            AdmissionError::UnknownPump(id) => write!(f, "unknown pump {}", id),
            AdmissionError::TooManyIngredients => write!(f, "too many ingredients"),
        }
    }
}

impl core::error::Error for AdmissionError {}

impl From<SafetyViolation> for AdmissionError {
    fn from(violation: SafetyViolation) -> Self {
        AdmissionError::Safety(violation)
    }
}

impl From<ClaimError> for AdmissionError {
    fn from(error: ClaimError) -> Self {
        match error {
            ClaimError::Busy => AdmissionError::SystemBusy,
            ClaimError::UnknownPump(id) => AdmissionError::UnknownPump(id),
        }
    }
}

/// Turn a recipe and dose into validated dose specs
///
/// Garnish lines are skipped, repeated lines for one ingredient are
/// merged, and the result is ordered by pour order.
pub fn plan_doses<D: PumpDriver>(
    recipe: &Recipe,
    dose: DoseMode,
    pumps: &PumpArray<D>,
    calibration: &CalibrationEngine,
    limits: &SafetyLimits,
) -> Result<Vec<DoseSpec, MAX_INGREDIENTS>, AdmissionError> {
    if !dose.is_valid() {
        return Err(AdmissionError::InvalidDose);
    }
    let multiplier = dose.multiplier();

    let mut doses: Vec<DoseSpec, MAX_INGREDIENTS> = Vec::new();
    for line in recipe.ingredients.iter().filter(|i| i.category.is_poured()) {
        let unit = pumps
            .iter()
            .find(|u| same_ingredient(u.ingredient(), line.name.as_str()))
            .ok_or_else(|| AdmissionError::UnassignedIngredient(line.name.clone()))?;
        let volume_ml = line.amount_ml * multiplier;

        if let Some(existing) = doses.iter_mut().find(|d| d.pump == unit.id()) {
            existing.volume_ml += volume_ml;
            continue;
        }

        doses
            .push(DoseSpec {
                pump: unit.id(),
                ingredient: line.name.clone(),
                category: line.category,
                volume_ml,
                duration: embassy_time::Duration::from_ticks(0),
            })
            .map_err(|_| AdmissionError::TooManyIngredients)?;
    }

    if doses.is_empty() {
        return Err(AdmissionError::NothingToDispense);
    }

    for spec in doses.iter_mut() {
        spec.duration = calibration
            .duration_for(pumps, spec.pump, spec.volume_ml)
            .map_err(|error| AdmissionError::Calibration {
                pump: spec.pump,
                error,
            })?;
    }

    doses.sort_unstable_by_key(|d| (d.category.pour_order(), d.pump));

    validate(&doses, pumps, limits)?;
    Ok(doses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IngredientCategory, PumpConfig};
    use crate::testing::TestPump;
    use embassy_time::Duration;

    fn pumps() -> PumpArray<TestPump> {
        let configs = [
            PumpConfig::new(1, "Gin", 2.5),
            PumpConfig::new(2, "Tonic", 5.0),
        ];
        PumpArray::new(&configs, |_| TestPump::default()).unwrap()
    }

    fn gin_tonic() -> Recipe {
        Recipe::new("gin-tonic")
            .with("Tonic", IngredientCategory::Mixer, 100.0)
            .with("gin", IngredientCategory::Spirit, 50.0)
            .with("Lime wedge", IngredientCategory::Garnish, 1.0)
    }

    fn plan(recipe: &Recipe, dose: DoseMode) -> Result<Vec<DoseSpec, MAX_INGREDIENTS>, AdmissionError> {
        plan_doses(
            recipe,
            dose,
            &pumps(),
            &CalibrationEngine::default(),
            &SafetyLimits::default(),
        )
    }

    #[test]
    fn test_double_dose_plan() {
        let doses = plan(&gin_tonic(), DoseMode::Double).unwrap();
        assert_eq!(doses.len(), 2);

        // Spirits are ordered before mixers
        assert_eq!(doses[0].pump, 1);
        assert_eq!(doses[0].volume_ml, 100.0);
        assert_eq!(doses[0].duration, Duration::from_secs(40));
        assert_eq!(doses[1].pump, 2);
        assert_eq!(doses[1].volume_ml, 200.0);
        assert_eq!(doses[1].duration, Duration::from_secs(40));
    }

    #[test]
    fn test_triple_dose_exceeds_volume() {
        let err = plan(&gin_tonic(), DoseMode::Triple).unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::Safety(SafetyViolation::VolumeExceeded { .. })
        ));
    }

    #[test]
    fn test_unassigned_ingredient() {
        let recipe = Recipe::new("negroni").with("Campari", IngredientCategory::Liqueur, 30.0);
        assert_eq!(
            plan(&recipe, DoseMode::Simple),
            Err(AdmissionError::UnassignedIngredient(crate::config::label("Campari")))
        );
    }

    #[test]
    fn test_invalid_dose() {
        assert_eq!(
            plan(&gin_tonic(), DoseMode::Custom(0.0)),
            Err(AdmissionError::InvalidDose)
        );
    }

    #[test]
    fn test_zero_volume_line_rejected() {
        let recipe = Recipe::new("dry").with("Gin", IngredientCategory::Spirit, 0.0);
        assert_eq!(
            plan(&recipe, DoseMode::Simple),
            Err(AdmissionError::Calibration {
                pump: 1,
                error: CalibrationError::InvalidVolume
            })
        );
    }

    #[test]
    fn test_garnish_only_recipe() {
        let recipe = Recipe::new("lime").with("Lime", IngredientCategory::Garnish, 1.0);
        assert_eq!(
            plan(&recipe, DoseMode::Simple),
            Err(AdmissionError::NothingToDispense)
        );
    }

    #[test]
    fn test_repeated_lines_are_merged() {
        let recipe = Recipe::new("strong")
            .with("Gin", IngredientCategory::Spirit, 20.0)
            .with("GIN", IngredientCategory::Spirit, 30.0);
        let doses = plan(&recipe, DoseMode::Simple).unwrap();
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].volume_ml, 50.0);
        assert_eq!(doses[0].duration, Duration::from_secs(20));
    }
}
