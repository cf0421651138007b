//! Dose selection and per-pump dose specs

use core::str::FromStr;

use embassy_time::Duration;

use crate::config::{IngredientCategory, Label, PumpId};

/// Dose multiplier chosen by the operator
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DoseMode {
    /// 1x
    #[default]
    Simple,
    /// 2x
    Double,
    /// 0.5x
    Half,
    /// 3x
    Triple,
    /// Arbitrary positive multiplier
    Custom(f32),
}

impl DoseMode {
    /// Scalar applied to every base amount
    pub fn multiplier(&self) -> f32 {
        match self {
            DoseMode::Simple => 1.0,
            DoseMode::Double => 2.0,
            DoseMode::Half => 0.5,
            DoseMode::Triple => 3.0,
            DoseMode::Custom(m) => *m,
        }
    }

    /// Check the multiplier is a positive finite number
    pub fn is_valid(&self) -> bool {
        let m = self.multiplier();
        m > 0.0 && m.is_finite()
    }
}

impl FromStr for DoseMode {
    type Err = ();

    /// Accepts `simple`/`single`, `double`, `half`, `triple` or a number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let named = [
            ("simple", DoseMode::Simple),
            ("single", DoseMode::Simple),
            ("double", DoseMode::Double),
            ("half", DoseMode::Half),
            ("triple", DoseMode::Triple),
        ];
        if let Some((_, mode)) = named.iter().find(|(name, _)| name.eq_ignore_ascii_case(s)) {
            return Ok(*mode);
        }
        s.trim_end_matches(|c: char| c == 'x' || c == 'X')
            .parse::<f32>()
            .map(DoseMode::Custom)
            .map_err(|_| ())
    }
}

/// One pump's share of a preparation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DoseSpec {
    /// Resolved pump
    pub pump: PumpId,
    /// Ingredient poured
    pub ingredient: Label,
    /// Ingredient category
    pub category: IngredientCategory,
    /// Scaled volume (ml)
    pub volume_ml: f32,
    /// Actuation time from the calibration engine
    pub duration: Duration,
}
