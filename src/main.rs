use anyhow::{Context, Result};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use food_ingest::cli::{parse_args, Commands, SearchArgs, UploadArgs};
use food_ingest::config::{check_input, EmbeddingConfig, StoreConfig};
use food_ingest::pipeline::{normalize_file, search_local, search_store, upload_cleaned_file, RunSummary, UploadOptions};
use food_ingest::search::{EmbeddingEngine, FoodStore, LocalFoodStore, SearchParams, SupabaseStore, EMBEDDING_DIMENSION};
use food_ingest::uploader::UploadConfig;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn upload_into<S: FoodStore>(
    args: &UploadArgs,
    engine: &EmbeddingEngine,
    store: &S,
    config: &UploadConfig,
) -> Result<RunSummary> {
    let options = UploadOptions {
        limit: args.limit,
        skip_existing: args.skip_existing,
        model: Some(engine.model()),
    };
    upload_cleaned_file(&args.cleaned, &options, engine, store, config).await
}

async fn run_upload(args: UploadArgs) -> Result<ExitCode> {
    check_input(&args.cleaned)?;
    let upload_config = UploadConfig::from_args(&args)?;
    let embedding = EmbeddingConfig::from_args(&args.embedding)?;
    let store_config = StoreConfig::from_args(&args.store, upload_config.store_timeout)?;

    let engine = EmbeddingEngine::new(embedding.provider(), upload_config.embed_timeout);
    let summary = match store_config {
        StoreConfig::Local { path } => {
            let store = LocalFoodStore::open(&path, EMBEDDING_DIMENSION)
                .with_context(|| format!("Failed to open local store {:?}", path))?;
            upload_into(&args, &engine, &store, &upload_config).await?
        }
        StoreConfig::Supabase(cfg) => {
            let store = SupabaseStore::new(cfg);
            upload_into(&args, &engine, &store, &upload_config).await?
        }
    };

    println!("\nUpload summary\n{}", summary);
    if summary.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_search(args: SearchArgs) -> Result<ExitCode> {
    let embedding = EmbeddingConfig::from_args(&args.embedding)?;
    let timeout = Duration::from_secs(30);
    let store_config = StoreConfig::from_args(&args.store, timeout)?;
    let params = SearchParams {
        match_threshold: args.threshold,
        match_count: args.count,
        filters: args.filters.clone().into(),
    };

    let engine = EmbeddingEngine::new(embedding.provider(), timeout);
    let hits = match store_config {
        StoreConfig::Local { path } => search_local(&path, &args.query, &engine, &params).await?,
        StoreConfig::Supabase(cfg) => search_store(&args.query, &engine, &SupabaseStore::new(cfg), &params).await?,
    };

    info!(hits = hits.len(), "search complete");
    if hits.is_empty() {
        println!("No foods matched '{}'.", args.query);
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>2}. {} [{}] sim={:.3} | {:.0} kcal, P {:.1}g, F {:.1}g, C {:.1}g, fiber {:.1}g, sugar {:.1}g, Na {:.0}mg",
            rank + 1,
            hit.name,
            hit.category,
            hit.similarity,
            hit.calories_per_100g,
            hit.protein_per_100g,
            hit.fat_per_100g,
            hit.carbs_per_100g,
            hit.fiber_per_100g,
            hit.sugar_per_100g,
            hit.sodium_per_100g,
        );
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok(); // Load .env before clap reads env fallbacks
    init_tracing();

    let cli = parse_args();
    match cli.command {
        Commands::Normalize(args) => {
            check_input(&args.input)?;
            let ctx = normalize_file(
                &args.input,
                &args.output,
                args.sample_size,
                &args.data_source,
                args.rejections.as_deref(),
            )?;
            println!(
                "\nNormalized {} records: {} rejected, {} duplicates, {} left out by sampling",
                ctx.input_records,
                ctx.rejections.len(),
                ctx.deduplicated,
                ctx.truncated
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Upload(args) => run_upload(args).await,
        Commands::Search(args) => run_search(args).await,
    }
}
