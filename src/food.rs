use serde::{Deserialize, Serialize};
use std::fmt;

/// Optional micronutrients, stored under `nutrients` in the cleaned file.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Micronutrients {
    pub calcium_mg: Option<f64>,
    pub iron_mg: Option<f64>,
    pub potassium_mg: Option<f64>,
    pub vitamin_c_mg: Option<f64>,
    pub saturated_fat_g: Option<f64>,
}

/// The unit that is persisted and searched. All per-100g values are grams,
/// except sodium which is milligrams.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CanonicalFood {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Manufacturer or chain recognised in the name, if any.
    #[serde(default)]
    pub brand: Option<String>,
    pub category: String,
    pub calories_per_100g: f64,
    pub protein_per_100g: f64,
    pub fat_per_100g: f64,
    pub carbs_per_100g: f64,
    pub fiber_per_100g: f64,
    pub sugar_per_100g: f64,
    pub sodium_per_100g: f64,
    #[serde(default)]
    pub nutrients: Micronutrients,
    /// True when calories were estimated with the Atwater factors (4/4/9)
    /// rather than read from the source.
    #[serde(default)]
    pub calories_derived: bool,
    pub data_source: String,
    #[serde(default)]
    pub embedding_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Why the normalizer refused a raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    MissingExternalId,
    MissingName,
    MissingCategory,
    /// Field absent entirely, or marked not-measured where a value is mandatory.
    MissingNutrient(&'static str),
    NegativeNutrient { field: &'static str, value: f64 },
    NonFiniteNutrient(&'static str),
    /// The record could not even be decoded into the raw shape.
    Malformed(String),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MissingExternalId => write!(f, "missing external id"),
            RejectionReason::MissingName => write!(f, "missing name"),
            RejectionReason::MissingCategory => write!(f, "missing category"),
            RejectionReason::MissingNutrient(field) => write!(f, "missing required nutrient: {}", field),
            RejectionReason::NegativeNutrient { field, value } => {
                write!(f, "negative value for {}: {}", field, value)
            }
            RejectionReason::NonFiniteNutrient(field) => write!(f, "non-finite value for {}", field),
            RejectionReason::Malformed(msg) => write!(f, "malformed record: {}", msg),
        }
    }
}

/// A rejected raw record, kept for the summary and the rejection report.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub external_id: Option<String>,
    pub name: Option<String>,
    pub reason: RejectionReason,
}

/// Rounds to the 2-decimal storage precision.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
