use rayon::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;

use crate::food::{round2, CanonicalFood, Micronutrients, Rejection, RejectionReason};

/// Canonical nutrient slots a source code can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NutrientField {
    Energy,
    Protein,
    Fat,
    Carbs,
    Fiber,
    Sugar,
    Sodium,
    Calcium,
    Iron,
    Potassium,
    VitaminC,
    SaturatedFat,
}

impl NutrientField {
    pub fn label(self) -> &'static str {
        match self {
            NutrientField::Energy => "calories",
            NutrientField::Protein => "protein",
            NutrientField::Fat => "fat",
            NutrientField::Carbs => "carbs",
            NutrientField::Fiber => "fiber",
            NutrientField::Sugar => "sugar",
            NutrientField::Sodium => "sodium",
            NutrientField::Calcium => "calcium",
            NutrientField::Iron => "iron",
            NutrientField::Potassium => "potassium",
            NutrientField::VitaminC => "vitamin_c",
            NutrientField::SaturatedFat => "saturated_fat",
        }
    }
}

/// USDA FoodData Central nutrient ids. When several codes feed the same
/// field, earlier rows take priority. Codes not listed here are ignored.
pub const NUTRIENT_TABLE: &[(u32, NutrientField)] = &[
    (1008, NutrientField::Energy),       // Energy (kcal)
    (2047, NutrientField::Energy),       // Energy, Atwater general factors (kcal)
    (2048, NutrientField::Energy),       // Energy, Atwater specific factors (kcal)
    (1003, NutrientField::Protein),      // Protein (g)
    (1004, NutrientField::Fat),          // Total lipid (fat) (g)
    (1005, NutrientField::Carbs),        // Carbohydrate, by difference (g)
    (1079, NutrientField::Fiber),        // Fiber, total dietary (g)
    (1063, NutrientField::Sugar),        // Sugars, Total (g)
    (2000, NutrientField::Sugar),        // Total Sugars, SR Legacy (g)
    (1093, NutrientField::Sodium),       // Sodium, Na (mg)
    (1087, NutrientField::Calcium),      // Calcium, Ca (mg)
    (1089, NutrientField::Iron),         // Iron, Fe (mg)
    (1092, NutrientField::Potassium),    // Potassium, K (mg)
    (1162, NutrientField::VitaminC),     // Vitamin C, total ascorbic acid (mg)
    (1258, NutrientField::SaturatedFat), // Fatty acids, total saturated (g)
];

/// Brands recognised in food names: upper-case needle, display form.
pub const BRAND_TABLE: &[(&str, &str)] = &[
    ("PILLSBURY", "Pillsbury"),
    ("SABRA", "Sabra"),
    ("TRIBE", "Tribe"),
    ("KELLOGG", "Kellogg"),
    ("GENERAL MILLS", "General Mills"),
    ("KRAFT", "Kraft"),
    ("PEPSI", "Pepsi"),
    ("COCA COLA", "Coca Cola"),
    ("MCDONALD", "Mcdonald"),
    ("BURGER KING", "Burger King"),
    ("SUBWAY", "Subway"),
];

/// First brand of [`BRAND_TABLE`] whose needle appears in `name`,
/// case-insensitively.
pub fn extract_brand(name: &str) -> Option<String> {
    let upper = name.to_uppercase();
    BRAND_TABLE
        .iter()
        .find(|(needle, _)| upper.contains(needle))
        .map(|(_, display)| display.to_string())
}

/// Atwater general factors, kcal per gram.
pub const ATWATER_PROTEIN: f64 = 4.0;
pub const ATWATER_CARBS: f64 = 4.0;
pub const ATWATER_FAT: f64 = 9.0;

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum RawCategory {
    Name(String),
    Object { description: Option<String> },
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawWweiaCategory {
    #[serde(rename = "wweiaFoodCategoryDescription")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawNutrientRef {
    pub id: Option<u32>,
}

/// One `{code, value}` pair. Accepts both the nested USDA shape
/// (`{"nutrient": {"id": 1003}, "amount": 0.85}`) and a flat
/// `{"code": 1003, "value": 0.85}` shape.
#[derive(Debug, Deserialize, Clone)]
pub struct RawNutrient {
    pub nutrient: Option<RawNutrientRef>,
    pub code: Option<u32>,
    #[serde(alias = "value")]
    pub amount: Option<f64>,
    #[serde(rename = "notMeasured", alias = "not_measured", default)]
    pub not_measured: bool,
}

impl RawNutrient {
    fn code(&self) -> Option<u32> {
        self.code.or_else(|| self.nutrient.as_ref().and_then(|n| n.id))
    }

    fn reading(&self) -> Reading {
        match self.amount {
            Some(v) if !self.not_measured => Reading::Value(v),
            _ => Reading::NotMeasured,
        }
    }
}

/// A food record as it appears in the source export.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RawRecord {
    #[serde(alias = "fdcId", default)]
    pub external_id: Option<serde_json::Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "foodCategory", default)]
    pub category: Option<RawCategory>,
    #[serde(rename = "wweiaFoodCategory", default)]
    pub wweia_category: Option<RawWweiaCategory>,
    #[serde(alias = "foodNutrients", default)]
    pub nutrients: Vec<RawNutrient>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reading {
    Value(f64),
    /// The source lists the nutrient but explicitly without a measurement.
    NotMeasured,
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

impl RawRecord {
    fn external_id_string(&self) -> Option<String> {
        match self.external_id.as_ref()? {
            serde_json::Value::String(s) => non_empty(Some(s)),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn category_name(&self) -> Option<String> {
        let primary = match &self.category {
            Some(RawCategory::Name(name)) => non_empty(Some(name)),
            Some(RawCategory::Object { description }) => non_empty(description.as_deref()),
            None => None,
        };
        primary.or_else(|| {
            self.wweia_category
                .as_ref()
                .and_then(|c| non_empty(c.description.as_deref()))
        })
    }

    /// First entry per code wins; entries without a code are skipped.
    fn readings(&self) -> HashMap<u32, Reading> {
        let mut readings = HashMap::new();
        for nutrient in &self.nutrients {
            if let Some(code) = nutrient.code() {
                readings.entry(code).or_insert_with(|| nutrient.reading());
            }
        }
        readings
    }
}

/// A zero reading defers to a later code of the same field with a non-zero
/// value (SR Legacy reports sugar under 2000 with 1063 at zero).
fn lookup(readings: &HashMap<u32, Reading>, field: NutrientField) -> Option<Reading> {
    let mut not_measured = false;
    let mut zero = false;
    for (code, _) in NUTRIENT_TABLE.iter().filter(|(_, f)| *f == field) {
        match readings.get(code) {
            Some(Reading::Value(v)) if *v == 0.0 => zero = true,
            Some(Reading::Value(v)) => return Some(Reading::Value(*v)),
            Some(Reading::NotMeasured) => not_measured = true,
            None => {}
        }
    }
    if zero {
        Some(Reading::Value(0.0))
    } else {
        not_measured.then_some(Reading::NotMeasured)
    }
}

fn checked(field: NutrientField, value: f64) -> Result<f64, RejectionReason> {
    if !value.is_finite() {
        return Err(RejectionReason::NonFiniteNutrient(field.label()));
    }
    if value < 0.0 {
        return Err(RejectionReason::NegativeNutrient { field: field.label(), value });
    }
    Ok(round2(value))
}

/// Protein, fat and carbs: a value is mandatory.
fn required(readings: &HashMap<u32, Reading>, field: NutrientField) -> Result<f64, RejectionReason> {
    match lookup(readings, field) {
        Some(Reading::Value(v)) => checked(field, v),
        _ => Err(RejectionReason::MissingNutrient(field.label())),
    }
}

/// Fiber, sugar and sodium: an explicit not-measured entry counts as zero,
/// an absent entry does not.
fn required_or_zero(readings: &HashMap<u32, Reading>, field: NutrientField) -> Result<f64, RejectionReason> {
    match lookup(readings, field) {
        Some(Reading::Value(v)) => checked(field, v),
        Some(Reading::NotMeasured) => Ok(0.0),
        None => Err(RejectionReason::MissingNutrient(field.label())),
    }
}

fn optional(readings: &HashMap<u32, Reading>, field: NutrientField) -> Result<Option<f64>, RejectionReason> {
    match lookup(readings, field) {
        Some(Reading::Value(v)) => checked(field, v).map(Some),
        _ => Ok(None),
    }
}

/// Estimated energy from macronutrient mass. This is an approximation, not a
/// measured value.
pub fn atwater_calories(protein: f64, carbs: f64, fat: f64) -> f64 {
    round2(ATWATER_PROTEIN * protein + ATWATER_CARBS * carbs + ATWATER_FAT * fat)
}

/// Turns one raw record into a canonical food, or explains why it can't.
/// The returned food has an empty `embedding_text`; the text builder fills it.
pub fn normalize_record(raw: &RawRecord, data_source: &str) -> Result<CanonicalFood, Rejection> {
    let external_id = raw.external_id_string();
    let explicit_name = non_empty(raw.name.as_deref());
    let free_text = non_empty(raw.description.as_deref());
    // USDA exports put the food name in `description`.
    let (name, description) = match explicit_name {
        Some(name) => (Some(name), free_text),
        None => (free_text, None),
    };

    let reject = |reason: RejectionReason| Rejection {
        external_id: external_id.clone(),
        name: name.clone(),
        reason,
    };

    let Some(id) = external_id.clone() else {
        return Err(reject(RejectionReason::MissingExternalId));
    };
    let Some(food_name) = name.clone() else {
        return Err(reject(RejectionReason::MissingName));
    };
    let Some(category) = raw.category_name() else {
        return Err(reject(RejectionReason::MissingCategory));
    };

    let readings = raw.readings();
    let build = || -> Result<CanonicalFood, RejectionReason> {
        let protein = required(&readings, NutrientField::Protein)?;
        let fat = required(&readings, NutrientField::Fat)?;
        let carbs = required(&readings, NutrientField::Carbs)?;
        let fiber = required_or_zero(&readings, NutrientField::Fiber)?;
        let sugar = required_or_zero(&readings, NutrientField::Sugar)?;
        let sodium = required_or_zero(&readings, NutrientField::Sodium)?;

        let (calories, calories_derived) = match lookup(&readings, NutrientField::Energy) {
            Some(Reading::Value(v)) => (checked(NutrientField::Energy, v)?, false),
            _ => (atwater_calories(protein, carbs, fat), true),
        };

        let nutrients = Micronutrients {
            calcium_mg: optional(&readings, NutrientField::Calcium)?,
            iron_mg: optional(&readings, NutrientField::Iron)?,
            potassium_mg: optional(&readings, NutrientField::Potassium)?,
            vitamin_c_mg: optional(&readings, NutrientField::VitaminC)?,
            saturated_fat_g: optional(&readings, NutrientField::SaturatedFat)?,
        };

        Ok(CanonicalFood {
            external_id: id.clone(),
            name: food_name.clone(),
            description: description.clone(),
            brand: extract_brand(&food_name),
            category: category.clone(),
            calories_per_100g: calories,
            protein_per_100g: protein,
            fat_per_100g: fat,
            carbs_per_100g: carbs,
            fiber_per_100g: fiber,
            sugar_per_100g: sugar,
            sodium_per_100g: sodium,
            nutrients,
            calories_derived,
            data_source: data_source.to_string(),
            embedding_text: String::new(),
            embedding: None,
        })
    };

    build().map_err(reject)
}

/// Decodes and normalizes a slice of raw JSON records in parallel. Output
/// order matches input order.
pub fn normalize_values(values: &[serde_json::Value], data_source: &str) -> Vec<Result<CanonicalFood, Rejection>> {
    values
        .par_iter()
        .map(|value| match RawRecord::deserialize(value) {
            Ok(raw) => normalize_record(&raw, data_source),
            Err(e) => Err(Rejection {
                external_id: value
                    .get("fdcId")
                    .or_else(|| value.get("external_id"))
                    .map(|v| v.to_string().trim_matches('"').to_string()),
                name: None,
                reason: RejectionReason::Malformed(e.to_string()),
            }),
        })
        .collect()
}
