use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tiktoken_rs::cl100k_base;
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, StoreError};
use crate::food::CanonicalFood;
use crate::search::embedding_engine::{validate_vectors, Embedder};
use crate::search::food_store::FoodStore;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff: `initial_backoff * 2^(attempt - 1)`, capped.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Upper bound on texts per embedding request.
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub embed_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            embed_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub batches: usize,
    pub failed_batches: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Records whose batch never obtained vectors.
    pub failed_embedding: usize,
    /// Records whose batch got vectors but could not be written.
    pub failed_upsert: usize,
}

impl UploadReport {
    pub fn has_failures(&self) -> bool {
        self.failed_batches > 0
    }
}

#[derive(Debug)]
enum BatchOutcome {
    Stored { inserted: usize, updated: usize },
    EmbeddingFailed { records: usize, error: EmbeddingError },
    UpsertFailed { records: usize, error: StoreError },
}

/// Runs `op` until it succeeds, fails with a persistent error, or uses up
/// `policy.max_attempts`.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(attempt, max_attempts, ?delay, error = %err, "{} failed, retrying", what);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn embed_with_timeout<E: Embedder>(
    embedder: &E,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    match tokio::time::timeout(timeout, embedder.embed_batch(texts)).await {
        Ok(result) => result,
        Err(_) => Err(EmbeddingError::Timeout(timeout)),
    }
}

async fn upsert_with_timeout<S: FoodStore>(
    store: &S,
    foods: Vec<CanonicalFood>,
    timeout: Duration,
) -> Result<crate::search::nano_vector_db::UpsertOutcome, StoreError> {
    match tokio::time::timeout(timeout, store.upsert(foods)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

async fn process_batch<E: Embedder, S: FoodStore>(
    index: usize,
    batch: Vec<CanonicalFood>,
    embedder: &E,
    store: &S,
    config: &UploadConfig,
) -> BatchOutcome {
    let records = batch.len();
    let texts: Vec<String> = batch.iter().map(|f| f.embedding_text.clone()).collect();
    if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
        return BatchOutcome::EmbeddingFailed {
            records,
            error: EmbeddingError::EmptyText(pos),
        };
    }

    let label = format!("embedding batch {}", index + 1);
    let vectors = retry_transient(&config.retry, &label, EmbeddingError::is_transient, || {
        embed_with_timeout(embedder, &texts, config.embed_timeout)
    })
    .await
    .and_then(|vectors| validate_vectors(&vectors, records, embedder.dimension()).map(|_| vectors));
    let vectors = match vectors {
        Ok(vectors) => vectors,
        Err(error) => return BatchOutcome::EmbeddingFailed { records, error },
    };

    // Vectors are attached to a batch-local copy; nothing leaves this
    // function half-embedded.
    let embedded: Vec<CanonicalFood> = batch
        .into_iter()
        .zip(vectors)
        .map(|(mut food, vector)| {
            food.embedding = Some(vector);
            food
        })
        .collect();

    let label = format!("upsert batch {}", index + 1);
    match retry_transient(&config.retry, &label, StoreError::is_transient, || {
        upsert_with_timeout(store, embedded.clone(), config.store_timeout)
    })
    .await
    {
        Ok(outcome) => BatchOutcome::Stored {
            inserted: outcome.inserted.len(),
            updated: outcome.updated.len(),
        },
        Err(error) => BatchOutcome::UpsertFailed { records, error },
    }
}

/// Embeds and upserts `foods` in fixed-size batches. A batch that exhausts
/// its retries, or fails persistently, is recorded and skipped; the rest of
/// the run continues.
pub async fn upload_foods<E: Embedder, S: FoodStore>(
    foods: Vec<CanonicalFood>,
    embedder: &E,
    store: &S,
    config: &UploadConfig,
) -> UploadReport {
    let batch_size = config.batch_size.max(1);
    let batches: Vec<Vec<CanonicalFood>> = foods.chunks(batch_size).map(|c| c.to_vec()).collect();
    let total_batches = batches.len();
    info!(
        records = foods.len(),
        batches = total_batches,
        batch_size,
        concurrency = config.concurrency.max(1),
        "starting upload"
    );

    let outcomes: Vec<(usize, BatchOutcome)> = stream::iter(batches.into_iter().enumerate())
        .map(|(index, batch)| async move { (index, process_batch(index, batch, embedder, store, config).await) })
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;

    let mut report = UploadReport {
        batches: total_batches,
        ..Default::default()
    };
    for (index, outcome) in outcomes {
        match outcome {
            BatchOutcome::Stored { inserted, updated } => {
                debug!(batch = index + 1, inserted, updated, "batch stored");
                report.inserted += inserted;
                report.updated += updated;
            }
            BatchOutcome::EmbeddingFailed { records, error } => {
                warn!(batch = index + 1, records, error = %error, "batch failed: embedding");
                report.failed_batches += 1;
                report.failed_embedding += records;
            }
            BatchOutcome::UpsertFailed { records, error } => {
                warn!(batch = index + 1, records, error = %error, "batch failed: upsert");
                report.failed_batches += 1;
                report.failed_upsert += records;
            }
        }
    }
    report
}

/// Token count under the `cl100k_base` encoding used by the OpenAI
/// embedding models. Falls back to about four characters per token when the
/// tokenizer cannot be loaded.
pub fn estimate_tokens(texts: &[String]) -> usize {
    match cl100k_base() {
        Ok(enc) => texts.iter().map(|t| enc.encode_ordinary(t).len()).sum(),
        Err(e) => {
            warn!("failed to initialize tokenizer (tiktoken-rs): {}", e);
            approximate_tokens(texts)
        }
    }
}

fn approximate_tokens(texts: &[String]) -> usize {
    texts.iter().map(|t| t.chars().count().div_ceil(4)).sum()
}
