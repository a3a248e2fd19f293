//! Run configuration assembled from CLI arguments and the environment.
//!
//! Everything here is checked before the first network call so that a bad
//! key or URL fails the run immediately.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api_connection::connection::Provider;
use crate::api_connection::endpoints::find_model;
use crate::cli::{EmbeddingArgs, StoreArgs, StoreKind, UploadArgs};
use crate::error::ConfigError;
use crate::search::embedding_engine::EMBEDDING_DIMENSION;
use crate::search::supabase_store::SupabaseConfig;
use crate::uploader::{RetryPolicy, UploadConfig};

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl EmbeddingConfig {
    pub fn from_args(args: &EmbeddingArgs) -> Result<Self, ConfigError> {
        let api_key = required(args.openai_api_key.as_deref(), "OPENAI_API_KEY")?;
        let base_url = http_url(&args.openai_base_url, "OPENAI_BASE_URL")?;
        let model = args.embedding_model.trim().to_string();
        if model.is_empty() {
            return Err(ConfigError::Missing("OPENAI_EMBEDDING_MODEL"));
        }
        if let Some(known) = find_model(&model) {
            if known.native_dimensions != EMBEDDING_DIMENSION && !known.supports_dimensions {
                return Err(ConfigError::Invalid {
                    name: "OPENAI_EMBEDDING_MODEL",
                    reason: format!(
                        "{} produces {}-dimensional vectors, the store expects {}",
                        model, known.native_dimensions, EMBEDDING_DIMENSION
                    ),
                });
            }
        }
        Ok(Self { api_key, base_url, model })
    }

    pub fn provider(&self) -> Provider {
        Provider::openai(&self.api_key, &self.base_url, &self.model, EMBEDDING_DIMENSION)
    }
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Local { path: PathBuf },
    Supabase(SupabaseConfig),
}

impl StoreConfig {
    pub fn from_args(args: &StoreArgs, timeout: Duration) -> Result<Self, ConfigError> {
        match args.store {
            StoreKind::Local => Ok(StoreConfig::Local {
                path: args.store_path.clone(),
            }),
            StoreKind::Supabase => {
                let url = required(args.supabase_url.as_deref(), "SUPABASE_URL")?;
                let url = http_url(&url, "SUPABASE_URL")?;
                let service_key = required(args.supabase_service_key.as_deref(), "SUPABASE_SERVICE_KEY")?;
                let table = args.supabase_table.trim();
                if table.is_empty() {
                    return Err(ConfigError::Invalid {
                        name: "supabase-table",
                        reason: "table name is empty".to_string(),
                    });
                }
                Ok(StoreConfig::Supabase(SupabaseConfig {
                    url,
                    service_key,
                    table: table.to_string(),
                    timeout,
                }))
            }
        }
    }
}

impl UploadConfig {
    pub fn from_args(args: &UploadArgs) -> Result<Self, ConfigError> {
        positive(args.batch_size, "batch-size")?;
        positive(args.concurrency, "concurrency")?;
        positive(args.max_attempts as usize, "max-attempts")?;
        positive(args.embed_timeout_secs as usize, "embed-timeout-secs")?;
        positive(args.store_timeout_secs as usize, "store-timeout-secs")?;
        if args.initial_backoff_ms > args.max_backoff_ms {
            return Err(ConfigError::Invalid {
                name: "initial-backoff-ms",
                reason: format!("{} exceeds max-backoff-ms {}", args.initial_backoff_ms, args.max_backoff_ms),
            });
        }
        Ok(UploadConfig {
            batch_size: args.batch_size,
            concurrency: args.concurrency,
            retry: RetryPolicy {
                max_attempts: args.max_attempts,
                initial_backoff: Duration::from_millis(args.initial_backoff_ms),
                max_backoff: Duration::from_millis(args.max_backoff_ms),
            },
            embed_timeout: Duration::from_secs(args.embed_timeout_secs),
            store_timeout: Duration::from_secs(args.store_timeout_secs),
        })
    }
}

pub fn check_input(path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::InputNotFound(path.display().to_string()))
    }
}

fn required(value: Option<&str>, name: &'static str) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn http_url(value: &str, name: &'static str) -> Result<String, ConfigError> {
    let value = value.trim().trim_end_matches('/');
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(value.to_string())
    } else {
        Err(ConfigError::Invalid {
            name,
            reason: format!("'{}' is not an http(s) URL", value),
        })
    }
}

fn positive(value: usize, name: &'static str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
