use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::api_connection::endpoints::find_model;
use crate::config::check_input;
use crate::embedding_text::{attach_embedding_text, build_embedding_text};
use crate::food::{CanonicalFood, Rejection};
use crate::food_normalizer::normalize_values;
use crate::food_sampler::dedup_and_sample;
use crate::search::data_loader::{
    load_cleaned_foods, load_raw_records, write_cleaned_foods, write_rejection_report, CleanedDataset,
    CleanedMetadata, CLEANED_SOURCE,
};
use crate::search::embedding_engine::{validate_vectors, Embedder};
use crate::search::food_store::{FoodStore, LocalFoodStore};
use crate::search::hybrid_search::{SearchHit, SearchParams};
use crate::uploader::{estimate_tokens, upload_foods, UploadConfig, UploadReport};

/// Counters threaded through a normalize run.
#[derive(Debug, Default)]
pub struct RunContext {
    pub input_records: usize,
    pub rejections: Vec<Rejection>,
    pub deduplicated: usize,
    pub truncated: usize,
}

/// Normalize step on already-loaded raw records: validate, deduplicate,
/// sample, then attach embedding text.
pub fn run_normalize(
    raw: &[serde_json::Value],
    data_source: &str,
    sample_size: Option<usize>,
    ctx: &mut RunContext,
) -> Vec<CanonicalFood> {
    ctx.input_records += raw.len();

    let mut accepted = Vec::with_capacity(raw.len());
    for result in normalize_values(raw, data_source) {
        match result {
            Ok(food) => accepted.push(food),
            Err(rejection) => {
                debug!(
                    external_id = rejection.external_id.as_deref().unwrap_or("-"),
                    reason = %rejection.reason,
                    "record rejected"
                );
                ctx.rejections.push(rejection);
            }
        }
    }
    if !ctx.rejections.is_empty() {
        warn!(rejected = ctx.rejections.len(), "records rejected during normalization");
    }

    let sample = dedup_and_sample(accepted, sample_size);
    ctx.deduplicated += sample.duplicates;
    ctx.truncated += sample.truncated;

    let mut foods = sample.foods;
    attach_embedding_text(&mut foods);
    foods
}

/// Reads a USDA export, normalizes it, and writes the cleaned dataset.
pub fn normalize_file(
    input: &Path,
    output: &Path,
    sample_size: Option<usize>,
    data_source: &str,
    rejections_path: Option<&Path>,
) -> Result<RunContext> {
    let raw = load_raw_records(input)?;
    info!(records = raw.len(), "loaded raw records from {:?}", input);

    let mut ctx = RunContext::default();
    let foods = run_normalize(&raw, data_source, sample_size, &mut ctx);

    let dataset = CleanedDataset {
        metadata: CleanedMetadata {
            total_foods: foods.len(),
            source: CLEANED_SOURCE.to_string(),
            data_source: data_source.to_string(),
            input_records: ctx.input_records,
            rejected: ctx.rejections.len(),
            deduplicated: ctx.deduplicated,
            truncated: ctx.truncated,
        },
        foods,
    };
    write_cleaned_foods(output, &dataset)?;
    info!(
        kept = dataset.foods.len(),
        rejected = ctx.rejections.len(),
        deduplicated = ctx.deduplicated,
        truncated = ctx.truncated,
        "wrote cleaned foods to {:?}",
        output
    );

    if let Some(path) = rejections_path {
        write_rejection_report(path, &ctx.rejections)
            .with_context(|| format!("Failed to write rejection report {:?}", path))?;
        info!("wrote rejection report to {:?}", path);
    }
    Ok(ctx)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    pub failed_embedding: usize,
    pub failed_upsert: usize,
    pub deduplicated: usize,
    pub skipped_existing: usize,
    pub failed_batches: usize,
}

impl RunSummary {
    pub fn from_report(report: &UploadReport, metadata: &CleanedMetadata, skipped_existing: usize) -> Self {
        Self {
            inserted: report.inserted,
            updated: report.updated,
            rejected: metadata.rejected,
            failed_embedding: report.failed_embedding,
            failed_upsert: report.failed_upsert,
            deduplicated: metadata.deduplicated,
            skipped_existing,
            failed_batches: report.failed_batches,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed_batches > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "inserted:          {}", self.inserted)?;
        writeln!(f, "updated:           {}", self.updated)?;
        writeln!(f, "rejected:          {}", self.rejected)?;
        writeln!(f, "deduplicated:      {}", self.deduplicated)?;
        writeln!(f, "failed (embedding): {}", self.failed_embedding)?;
        writeln!(f, "failed (upsert):   {}", self.failed_upsert)?;
        if self.skipped_existing > 0 {
            writeln!(f, "skipped existing:  {}", self.skipped_existing)?;
        }
        write!(f, "failed batches:    {}", self.failed_batches)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions<'a> {
    pub limit: Option<usize>,
    pub skip_existing: bool,
    /// Model name used for the cost estimate.
    pub model: Option<&'a str>,
}

fn log_cost_estimate(foods: &[CanonicalFood], model: Option<&str>) {
    let texts: Vec<String> = foods.iter().map(|f| f.embedding_text.clone()).collect();
    let tokens = estimate_tokens(&texts);
    match model.and_then(find_model) {
        Some(known) => {
            let cost = tokens as f64 / 1000.0 * known.price_per_1k_tokens;
            info!(tokens, model = known.model_name, "estimated embedding cost: ${:.4}", cost);
        }
        None => info!(tokens, "estimated embedding tokens"),
    }
}

/// Upload step: loads a cleaned dataset and pushes it through embedding and
/// the store.
pub async fn upload_cleaned_file<E: Embedder, S: FoodStore>(
    path: &Path,
    options: &UploadOptions<'_>,
    embedder: &E,
    store: &S,
    config: &UploadConfig,
) -> Result<RunSummary> {
    let dataset = load_cleaned_foods(path)?;
    let mut metadata = dataset.metadata;
    info!(foods = dataset.foods.len(), "loaded cleaned foods from {:?}", path);

    // One upsert payload must not touch the same key twice.
    let sample = dedup_and_sample(dataset.foods, options.limit);
    if sample.duplicates > 0 {
        warn!(duplicates = sample.duplicates, "dropped repeated external_ids from cleaned file");
        metadata.deduplicated += sample.duplicates;
    }
    let mut foods = sample.foods;
    for food in foods.iter_mut() {
        if food.embedding_text.trim().is_empty() {
            food.embedding_text = build_embedding_text(food);
        }
    }

    let mut skipped_existing = 0;
    if options.skip_existing && !foods.is_empty() {
        let ids: Vec<String> = foods.iter().map(|f| f.external_id.clone()).collect();
        let existing = store
            .existing_ids(&ids)
            .await
            .context("Failed to look up existing foods")?;
        let before = foods.len();
        foods.retain(|f| !existing.contains(&f.external_id));
        skipped_existing = before - foods.len();
        info!(skipped = skipped_existing, remaining = foods.len(), "skipping foods already stored");
    }

    log_cost_estimate(&foods, options.model);
    let report = upload_foods(foods, embedder, store, config).await;
    Ok(RunSummary::from_report(&report, &metadata, skipped_existing))
}

/// Embeds `query` and runs it against `store`.
pub async fn search_store<E: Embedder, S: FoodStore>(
    query: &str,
    embedder: &E,
    store: &S,
    params: &SearchParams,
) -> Result<Vec<SearchHit>> {
    let texts = [query.trim().to_string()];
    let vectors = embedder
        .embed_batch(&texts)
        .await
        .context("Failed to embed search query")?;
    validate_vectors(&vectors, 1, embedder.dimension())?;
    let vector = vectors
        .into_iter()
        .next()
        .context("Embedding API returned no vector for the query")?;
    store.search(&vector, params).await.context("Search failed")
}

/// Search against a local store file. The file is checked and opened before
/// the query is embedded.
pub async fn search_local<E: Embedder>(
    store_path: &Path,
    query: &str,
    embedder: &E,
    params: &SearchParams,
) -> Result<Vec<SearchHit>> {
    check_input(store_path)?;
    let store = LocalFoodStore::open(store_path, embedder.dimension())
        .with_context(|| format!("Failed to open local store {:?}", store_path))?;
    search_store(query, embedder, &store, params).await
}
