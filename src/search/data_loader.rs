use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::food::{CanonicalFood, Rejection};

/// Top-level keys under which USDA FoodData Central exports nest their records.
const CONTAINER_KEYS: &[&str] = &["FoundationFoods", "SRLegacyFoods", "SurveyFoods", "BrandedFoods", "foods"];

pub const CLEANED_SOURCE: &str = "usda_fooddata_central";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CleanedMetadata {
    #[serde(default)]
    pub total_foods: usize,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub data_source: String,
    #[serde(default)]
    pub input_records: usize,
    #[serde(default)]
    pub rejected: usize,
    #[serde(default)]
    pub deduplicated: usize,
    #[serde(default)]
    pub truncated: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CleanedDataset {
    #[serde(default)]
    pub metadata: CleanedMetadata,
    pub foods: Vec<CanonicalFood>,
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    if !path.exists() {
        return Err(anyhow::anyhow!("Input file not found at: {:?}", path));
    }
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("Failed to parse JSON in {:?}", path))
}

/// Reads raw food records, unwrapping whichever container the export uses.
/// Records are returned undecoded so that one malformed record cannot fail
/// the whole file.
pub fn load_raw_records(path: &Path) -> Result<Vec<serde_json::Value>> {
    let data = read_json(path)?;
    let records = match data {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => {
            match CONTAINER_KEYS.iter().find_map(|key| map.remove(*key)) {
                Some(serde_json::Value::Array(items)) => items,
                Some(other) => {
                    return Err(anyhow::anyhow!("Expected a list of foods in {:?}, found {}", path, other))
                }
                // A single record object
                None => vec![serde_json::Value::Object(map)],
            }
        }
        other => return Err(anyhow::anyhow!("Unsupported JSON root in {:?}: {}", path, other)),
    };
    Ok(records)
}

/// Loads a cleaned dataset. Accepts the `{metadata, foods}` document written
/// by [`write_cleaned_foods`] or a bare list of foods.
pub fn load_cleaned_foods(path: &Path) -> Result<CleanedDataset> {
    let data = read_json(path)?;
    let dataset = if data.is_array() {
        let foods: Vec<CanonicalFood> =
            serde_json::from_value(data).with_context(|| format!("Invalid food list in {:?}", path))?;
        CleanedDataset {
            metadata: CleanedMetadata {
                total_foods: foods.len(),
                ..Default::default()
            },
            foods,
        }
    } else {
        serde_json::from_value(data).with_context(|| format!("Invalid cleaned dataset in {:?}", path))?
    };
    Ok(dataset)
}

pub fn write_cleaned_foods(path: &Path, dataset: &CleanedDataset) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, dataset).with_context(|| format!("Failed to write {:?}", path))?;
    writer.flush()?;
    Ok(())
}

/// CSV with one line per rejected record: `external_id,name,reason`.
pub fn write_rejection_report(path: &Path, rejections: &[Rejection]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    wtr.write_record(["external_id", "name", "reason"])?;
    for rejection in rejections {
        let reason = rejection.reason.to_string();
        wtr.write_record([
            rejection.external_id.as_deref().unwrap_or(""),
            rejection.name.as_deref().unwrap_or(""),
            reason.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
