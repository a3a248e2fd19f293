use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::api_connection::endpoints::{DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL};
use crate::search::hybrid_search::{SearchFilters, DEFAULT_MATCH_COUNT, DEFAULT_MATCH_THRESHOLD};
use crate::search::supabase_store::DEFAULT_TABLE;

pub const DEFAULT_STORE_PATH: &str = "foods_store.json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Normalize USDA food data, embed it, and search it", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clean a USDA FoodData Central export into canonical foods
    Normalize(NormalizeArgs),
    /// Embed cleaned foods and upsert them into a store
    Upload(UploadArgs),
    /// Run a hybrid semantic + nutrient-filter query
    Search(SearchArgs),
}

#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// USDA JSON export
    pub input: PathBuf,
    /// Where to write the cleaned dataset
    pub output: PathBuf,
    /// Keep only the first N unique foods
    pub sample_size: Option<usize>,
    /// Write a CSV of rejected records
    #[arg(long)]
    pub rejections: Option<PathBuf>,
    #[arg(long, default_value = "usda")]
    pub data_source: String,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Cleaned dataset written by `normalize`
    pub cleaned: PathBuf,
    /// Upload only the first N foods
    #[arg(long)]
    pub limit: Option<usize>,
    /// Skip foods whose external_id is already stored
    #[arg(long)]
    pub skip_existing: bool,
    #[arg(long, default_value_t = crate::uploader::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    #[arg(long, default_value_t = crate::uploader::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
    #[arg(long, default_value_t = crate::uploader::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// First retry delay in milliseconds; doubles per attempt
    #[arg(long, default_value_t = 1000)]
    pub initial_backoff_ms: u64,
    #[arg(long, default_value_t = 30_000)]
    pub max_backoff_ms: u64,
    #[arg(long, default_value_t = 30)]
    pub embed_timeout_secs: u64,
    #[arg(long, default_value_t = 30)]
    pub store_timeout_secs: u64,
    #[command(flatten)]
    pub embedding: EmbeddingArgs,
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Free-text query, embedded with the same model as the foods
    pub query: String,
    #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
    pub threshold: f64,
    #[arg(long, default_value_t = DEFAULT_MATCH_COUNT)]
    pub count: usize,
    #[command(flatten)]
    pub filters: FilterArgs,
    #[command(flatten)]
    pub embedding: EmbeddingArgs,
    #[command(flatten)]
    pub store: StoreArgs,
}

/// Key fields are optional here so that a missing key surfaces as a
/// configuration error instead of a usage error.
#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,
    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Local,
    Supabase,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, value_enum, default_value_t = StoreKind::Local)]
    pub store: StoreKind,
    /// Local store file
    #[arg(long, env = "FOOD_INGEST_STORE_PATH", default_value = DEFAULT_STORE_PATH)]
    pub store_path: PathBuf,
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,
    #[arg(long, env = "SUPABASE_SERVICE_KEY", hide_env_values = true)]
    pub supabase_service_key: Option<String>,
    #[arg(long, default_value = DEFAULT_TABLE)]
    pub supabase_table: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long)]
    pub min_calories: Option<f64>,
    #[arg(long)]
    pub max_calories: Option<f64>,
    #[arg(long)]
    pub min_protein: Option<f64>,
    #[arg(long)]
    pub max_protein: Option<f64>,
    #[arg(long)]
    pub min_carbs: Option<f64>,
    #[arg(long)]
    pub max_carbs: Option<f64>,
    #[arg(long)]
    pub min_fat: Option<f64>,
    #[arg(long)]
    pub max_fat: Option<f64>,
    #[arg(long)]
    pub max_sugar: Option<f64>,
    #[arg(long)]
    pub min_sodium: Option<f64>,
    #[arg(long)]
    pub max_sodium: Option<f64>,
    /// Case-insensitive substring of the food category
    #[arg(long)]
    pub category: Option<String>,
}

impl From<FilterArgs> for SearchFilters {
    fn from(args: FilterArgs) -> Self {
        SearchFilters {
            min_calories: args.min_calories,
            max_calories: args.max_calories,
            min_protein: args.min_protein,
            max_protein: args.max_protein,
            min_carbs: args.min_carbs,
            max_carbs: args.max_carbs,
            min_fat: args.min_fat,
            max_fat: args.max_fat,
            max_sugar: args.max_sugar,
            min_sodium: args.min_sodium,
            max_sodium: args.max_sodium,
            category: args.category,
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
