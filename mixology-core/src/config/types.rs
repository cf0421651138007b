//! Configuration type definitions
//!
//! These types describe recipes, safety limits, and calibration settings.
//! They are loaded once at startup and treated as read-only afterwards.

use heapless::{String, Vec};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum label length (ingredient names, recipe ids)
pub const MAX_LABEL_LEN: usize = 32;

/// Maximum pumps in the array
pub const MAX_PUMPS: usize = 16;

/// Maximum ingredient lines per recipe
pub const MAX_INGREDIENTS: usize = 8;

/// Maximum configured emergency-stop trigger lines
pub const MAX_ESTOP_TRIGGERS: usize = 4;

/// Stable pump identifier
pub type PumpId = u8;

/// Short fixed-capacity label
pub type Label = String<MAX_LABEL_LEN>;

/// Ingredient category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum IngredientCategory {
    /// Base spirits (gin, vodka, rum...)
    #[default]
    Spirit,
    /// Liqueurs (triple sec...)
    Liqueur,
    /// Syrups (grenadine...)
    Syrup,
    /// Fruit juices
    Juice,
    /// Sodas and other mixers
    Mixer,
    /// Garnish, never poured
    Garnish,
}

impl IngredientCategory {
    /// Check if this category counts toward the alcohol limit
    pub fn is_alcoholic(&self) -> bool {
        matches!(self, IngredientCategory::Spirit | IngredientCategory::Liqueur)
    }

    /// Check if ingredients of this category are dispensed by a pump
    pub fn is_poured(&self) -> bool {
        !matches!(self, IngredientCategory::Garnish)
    }

    /// Dispatch order: spirits first, carbonated mixers last
    pub fn pour_order(&self) -> u8 {
        match self {
            IngredientCategory::Spirit => 1,
            IngredientCategory::Liqueur | IngredientCategory::Syrup => 2,
            IngredientCategory::Juice => 3,
            IngredientCategory::Mixer => 4,
            IngredientCategory::Garnish => 5,
        }
    }
}

/// One recipe line
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ingredient {
    /// Ingredient name (matched against pump assignments)
    pub name: Label,
    /// Category
    #[cfg_attr(feature = "serde", serde(default))]
    pub category: IngredientCategory,
    /// Base amount for a single dose (ml)
    pub amount_ml: f32,
}

impl Ingredient {
    /// Create an ingredient line, truncating the name to the label capacity
    pub fn new(name: &str, category: IngredientCategory, amount_ml: f32) -> Self {
        Self {
            name: label(name),
            category,
            amount_ml,
        }
    }
}

/// Resolved recipe handed over by the catalog
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Recipe {
    /// Recipe identifier
    pub id: Label,
    /// Ingredient lines
    pub ingredients: Vec<Ingredient, MAX_INGREDIENTS>,
}

impl Recipe {
    /// Create an empty recipe
    pub fn new(id: &str) -> Self {
        Self {
            id: label(id),
            ingredients: Vec::new(),
        }
    }

    /// Add an ingredient line (builder style)
    ///
    /// Lines beyond [`MAX_INGREDIENTS`] are dropped.
    pub fn with(mut self, name: &str, category: IngredientCategory, amount_ml: f32) -> Self {
        let _ = self.ingredients.push(Ingredient::new(name, category, amount_ml));
        self
    }

    /// Base volume of all poured lines (ml)
    pub fn base_volume_ml(&self) -> f32 {
        self.ingredients
            .iter()
            .filter(|i| i.category.is_poured())
            .map(|i| i.amount_ml)
            .sum()
    }
}

/// Safety limits
///
/// Immutable for the lifetime of a session; every dispatch is checked
/// against these values before any pump moves.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SafetyLimits {
    /// Maximum total volume per cocktail (ml, inclusive)
    pub max_volume_ml: f32,
    /// Maximum alcoholic volume per cocktail (ml, inclusive)
    pub max_alcohol_ml: f32,
    /// Hard ceiling for any single actuation (ms)
    pub pump_timeout_ms: u32,
    /// Input lines allowed to trigger an emergency stop
    pub estop_triggers: Vec<String<16>, MAX_ESTOP_TRIGGERS>,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        let mut estop_triggers = Vec::new();
        let _ = estop_triggers.push(String::try_from("button").unwrap_or_default());
        let _ = estop_triggers.push(String::try_from("door").unwrap_or_default());
        Self {
            max_volume_ml: 300.0,
            max_alcohol_ml: 150.0,
            pump_timeout_ms: 60_000,
            estop_triggers,
        }
    }
}

impl SafetyLimits {
    /// Per-pump actuation ceiling
    pub fn pump_timeout(&self) -> embassy_time::Duration {
        embassy_time::Duration::from_millis(self.pump_timeout_ms as u64)
    }

    /// Check if an input line is a configured emergency-stop trigger
    pub fn is_estop_trigger(&self, line: &str) -> bool {
        self.estop_triggers
            .iter()
            .any(|t| t.as_str().eq_ignore_ascii_case(line))
    }
}

/// Calibration engine settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CalibrationSettings {
    /// Weight of a new measurement, in (0, 1]. 1.0 = latest measurement wins.
    pub smoothing: f32,
    /// Lowest allowed calibration factor
    pub min_factor: f32,
    /// Highest allowed calibration factor
    pub max_factor: f32,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            smoothing: 1.0,
            min_factor: 0.2,
            max_factor: 5.0,
        }
    }
}

/// Build a label from a string slice, truncating on a char boundary
pub fn label(s: &str) -> Label {
    let mut out = Label::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Case-insensitive ingredient name comparison
pub fn same_ingredient(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
