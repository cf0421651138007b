//! Hardware configuration types
//!
//! These types define the pump table: pin mapping, nominal flow rate,
//! calibration factor, ingredient assignment, and the enabled flag.

use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::types::{
    same_ingredient, CalibrationSettings, IngredientCategory, Label, PumpId, SafetyLimits,
    MAX_PUMPS,
};
use crate::cleaning::{CleaningKind, CleaningTables, MaintenancePolicy};

/// Highest GPIO number on the Raspberry Pi header
pub const MAX_GPIO: u8 = 27;

/// Pin configuration with optional inversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PinConfig {
    /// GPIO pin number (BCM numbering)
    pub pin: u8,
    /// Pin is active-low (inverted)
    #[cfg_attr(feature = "serde", serde(default))]
    pub inverted: bool,
}

impl PinConfig {
    /// Create a new pin config
    pub const fn new(pin: u8) -> Self {
        Self {
            pin,
            inverted: false,
        }
    }

    /// Create an inverted (active-low) pin
    pub const fn inverted(pin: u8) -> Self {
        Self {
            pin,
            inverted: true,
        }
    }
}

/// TB6612FNG channel wiring for one pump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PumpPins {
    /// Direction input 1 (xIN1)
    pub in1: PinConfig,
    /// Direction input 2 (xIN2)
    pub in2: PinConfig,
    /// Speed PWM (PWMx)
    pub pwm: PinConfig,
}

impl PumpPins {
    /// All pins used by this channel
    pub fn pins(&self) -> [u8; 3] {
        [self.in1.pin, self.in2.pin, self.pwm.pin]
    }
}

fn default_calibration_factor() -> f32 {
    1.0
}

#[cfg(feature = "serde")]
fn default_enabled() -> bool {
    true
}

fn default_duty() -> u8 {
    100
}

/// Peristaltic pump configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PumpConfig {
    /// Stable pump id
    pub id: PumpId,
    /// Assigned ingredient
    pub ingredient: Label,
    /// Category of the assigned ingredient; unset counts as a spirit
    #[cfg_attr(feature = "serde", serde(default))]
    pub category: IngredientCategory,
    /// Nominal flow rate at full duty (ml/s)
    pub flow_rate_ml_s: f32,
    /// Per-pump correction applied to the nominal flow rate
    #[cfg_attr(feature = "serde", serde(default = "default_calibration_factor"))]
    pub calibration_factor: f32,
    /// Pump is usable
    #[cfg_attr(feature = "serde", serde(default = "default_enabled"))]
    pub enabled: bool,
    /// PWM duty cycle while pouring (percent)
    #[cfg_attr(feature = "serde", serde(default = "default_duty"))]
    pub duty_percent: u8,
    /// Driver wiring
    #[cfg_attr(feature = "serde", serde(default))]
    pub pins: PumpPins,
}

impl PumpConfig {
    /// Create a pump config with default calibration and no wiring
    pub fn new(id: PumpId, ingredient: &str, flow_rate_ml_s: f32) -> Self {
        Self {
            id,
            ingredient: super::types::label(ingredient),
            category: IngredientCategory::default(),
            flow_rate_ml_s,
            calibration_factor: default_calibration_factor(),
            enabled: true,
            duty_percent: default_duty(),
            pins: PumpPins::default(),
        }
    }

    /// Set the calibration factor (builder style)
    pub fn with_calibration(mut self, factor: f32) -> Self {
        self.calibration_factor = factor;
        self
    }

    /// Set the ingredient category (builder style)
    pub fn with_category(mut self, category: IngredientCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the enabled flag (builder style)
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the wiring (builder style)
    pub fn with_pins(mut self, pins: PumpPins) -> Self {
        self.pins = pins;
        self
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// No pumps configured
    NoPumps,
    /// More pumps than the array can hold
    TooManyPumps,
    /// Two pumps share an id
    DuplicatePumpId(PumpId),
    /// Two pumps are assigned the same ingredient
    DuplicateIngredient(PumpId),
    /// A GPIO pin is used more than once
    DuplicatePin(u8),
    /// A GPIO pin is outside the header range
    InvalidPin(u8),
    /// Flow rate must be positive
    InvalidFlowRate(PumpId),
    /// Calibration factor must be positive
    InvalidCalibration(PumpId),
    /// Safety limits are not positive
    InvalidLimits,
    /// A cleaning phase has no run time
    InvalidPhase(CleaningKind),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::NoPumps => write!(f, "no pumps configured"),
            ConfigError::TooManyPumps => write!(f, "more than {} pumps configured", MAX_PUMPS),
            ConfigError::DuplicatePumpId(id) => write!(f, "pump id {} used twice", id),
            ConfigError::DuplicateIngredient(id) => {
                write!(f, "pump {} repeats another pump's ingredient", id)
            }
            ConfigError::DuplicatePin(pin) => write!(f, "GPIO {} used twice", pin),
            ConfigError::InvalidPin(pin) => write!(f, "GPIO {} out of range", pin),
            ConfigError::InvalidFlowRate(id) => write!(f, "pump {} flow rate must be > 0", id),
            ConfigError::InvalidCalibration(id) => {
                write!(f, "pump {} calibration factor must be > 0", id)
            }
            ConfigError::InvalidLimits => write!(f, "safety limits must be > 0"),
            ConfigError::InvalidPhase(kind) => {
                write!(f, "{} cleaning has a phase of 0 ms", kind.as_str())
            }
        }
    }
}

impl core::error::Error for ConfigError {}

/// Complete machine configuration
///
/// This is the top-level configuration structure that contains the pump
/// table and every limit the dispense core reads.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MachineConfig {
    /// Pump table
    pub pumps: Vec<PumpConfig, MAX_PUMPS>,
    /// Safety limits
    #[cfg_attr(feature = "serde", serde(default))]
    pub safety: SafetyLimits,
    /// Calibration engine settings
    #[cfg_attr(feature = "serde", serde(default))]
    pub calibration: CalibrationSettings,
    /// Cleaning phase tables
    #[cfg_attr(feature = "serde", serde(default))]
    pub cleaning: CleaningTables,
    /// Maintenance scheduling policy
    #[cfg_attr(feature = "serde", serde(default))]
    pub maintenance: MaintenancePolicy,
}

impl MachineConfig {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a pump by id
    pub fn find_pump(&self, id: PumpId) -> Option<&PumpConfig> {
        self.pumps.iter().find(|p| p.id == id)
    }

    /// Find the pump assigned to an ingredient
    pub fn find_pump_for(&self, ingredient: &str) -> Option<&PumpConfig> {
        self.pumps
            .iter()
            .find(|p| same_ingredient(p.ingredient.as_str(), ingredient))
    }

    /// Validate the pump table and limits
    ///
    /// Pumps without wiring (all pins zero) are skipped by the pin checks,
    /// which is how simulated machines are described.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pumps.is_empty() {
            return Err(ConfigError::NoPumps);
        }

        let mut used_pins: Vec<u8, { MAX_PUMPS * 3 }> = Vec::new();
        for (i, pump) in self.pumps.iter().enumerate() {
            if !(pump.flow_rate_ml_s > 0.0) {
                return Err(ConfigError::InvalidFlowRate(pump.id));
            }
            if !(pump.calibration_factor > 0.0) {
                return Err(ConfigError::InvalidCalibration(pump.id));
            }

            for other in &self.pumps[..i] {
                if other.id == pump.id {
                    return Err(ConfigError::DuplicatePumpId(pump.id));
                }
                if same_ingredient(other.ingredient.as_str(), pump.ingredient.as_str()) {
                    return Err(ConfigError::DuplicateIngredient(pump.id));
                }
            }

            if pump.pins == PumpPins::default() {
                continue;
            }
            for pin in pump.pins.pins() {
                if pin > MAX_GPIO {
                    return Err(ConfigError::InvalidPin(pin));
                }
                if used_pins.contains(&pin) {
                    return Err(ConfigError::DuplicatePin(pin));
                }
                used_pins
                    .push(pin)
                    .map_err(|_| ConfigError::TooManyPumps)?;
            }
        }

        let limits = &self.safety;
        if !(limits.max_volume_ml > 0.0) || !(limits.max_alcohol_ml > 0.0) || limits.pump_timeout_ms == 0
        {
            return Err(ConfigError::InvalidLimits);
        }

        for kind in [
            CleaningKind::Quick,
            CleaningKind::Standard,
            CleaningKind::Deep,
            CleaningKind::Sanitize,
        ] {
            if self.cleaning.phases(kind).iter().any(|s| s.duration_ms == 0) {
                return Err(ConfigError::InvalidPhase(kind));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wired(in1: u8, in2: u8, pwm: u8) -> PumpPins {
        PumpPins {
            in1: PinConfig::new(in1),
            in2: PinConfig::new(in2),
            pwm: PinConfig::new(pwm),
        }
    }

    fn two_pump_config() -> MachineConfig {
        let mut config = MachineConfig::new();
        config
            .pumps
            .push(PumpConfig::new(1, "Gin", 2.5).with_pins(wired(5, 6, 12)))
            .unwrap();
        config
            .pumps
            .push(PumpConfig::new(2, "Tonic", 5.0).with_pins(wired(13, 19, 16)))
            .unwrap();
        config
    }

    #[test]
    fn test_pin_config() {
        let pin = PinConfig::new(10);
        assert_eq!(pin.pin, 10);
        assert!(!pin.inverted);

        let inverted = PinConfig::inverted(12);
        assert!(inverted.inverted);
    }

    #[test]
    fn test_empty_config_rejected() {
        let config = MachineConfig::new();
        assert_eq!(config.validate(), Err(ConfigError::NoPumps));
    }

    #[test]
    fn test_valid_config() {
        let config = two_pump_config();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.find_pump_for("tonic").map(|p| p.id), Some(2));
        assert_eq!(config.find_pump(1).map(|p| p.flow_rate_ml_s), Some(2.5));
    }

    #[test]
    fn test_duplicate_pin_rejected() {
        let mut config = two_pump_config();
        config.pumps[1].pins.pwm = PinConfig::new(12);
        assert_eq!(config.validate(), Err(ConfigError::DuplicatePin(12)));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut config = two_pump_config();
        config.pumps[1].id = 1;
        assert_eq!(config.validate(), Err(ConfigError::DuplicatePumpId(1)));
    }

    #[test]
    fn test_duplicate_ingredient_rejected() {
        let mut config = two_pump_config();
        config.pumps[1].ingredient = crate::config::label("GIN");
        assert_eq!(config.validate(), Err(ConfigError::DuplicateIngredient(2)));
    }

    #[test]
    fn test_invalid_flow_rejected() {
        let mut config = two_pump_config();
        config.pumps[0].flow_rate_ml_s = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidFlowRate(1)));
    }

    #[test]
    fn test_out_of_range_pin_rejected() {
        let mut config = two_pump_config();
        config.pumps[0].pins.in1 = PinConfig::new(40);
        assert_eq!(config.validate(), Err(ConfigError::InvalidPin(40)));
    }

    #[test]
    fn test_zero_length_phase_rejected() {
        let mut config = two_pump_config();
        config.cleaning.standard[1].duration_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPhase(CleaningKind::Standard))
        );
    }

    #[test]
    fn test_unwired_pumps_skip_pin_checks() {
        let mut config = MachineConfig::new();
        config.pumps.push(PumpConfig::new(1, "Gin", 2.5)).unwrap();
        config.pumps.push(PumpConfig::new(2, "Tonic", 5.0)).unwrap();
        assert_eq!(config.validate(), Ok(()));
    }
}
