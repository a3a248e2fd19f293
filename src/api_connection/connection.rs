use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::endpoints::{find_model, EmbeddingRequest, EmbeddingResponse};
use crate::error::EmbeddingError;

/// Embedding backends the pipeline can talk to. Only OpenAI-compatible
/// `/embeddings` endpoints for now.
#[derive(Clone)]
pub enum Provider {
    OpenAi {
        api_key: String,
        base_url: String,
        model: String,
        /// Sent as the `dimensions` parameter when the model supports it.
        dimensions: Option<usize>,
    },
}

impl Provider {
    pub fn openai(api_key: &str, base_url: &str, model: &str, target_dimension: usize) -> Self {
        let dimensions = find_model(model)
            .filter(|m| m.supports_dimensions)
            .map(|_| target_dimension);
        Self::OpenAi {
            api_key: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Provider::OpenAi { model, .. } => model,
        }
    }

    /// Returns one vector per input, ordered like the input.
    pub async fn call_embeddings(
        &self,
        client: &Client,
        inputs: &[String],
        timeout: Duration,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            Provider::OpenAi {
                api_key,
                base_url,
                model,
                dimensions,
            } => {
                let url = format!("{}/embeddings", base_url);
                let request = EmbeddingRequest {
                    model,
                    input: inputs,
                    dimensions: *dimensions,
                };

                let response = client
                    .post(&url)
                    .bearer_auth(api_key)
                    .header("Content-Type", "application/json")
                    .timeout(timeout)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            EmbeddingError::Timeout(timeout)
                        } else {
                            EmbeddingError::Network(e)
                        }
                    })?;

                let status = response.status();
                if !status.is_success() {
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Failed to read error body".to_string());
                    return Err(EmbeddingError::Api { status, body });
                }

                let mut parsed = response
                    .json::<EmbeddingResponse>()
                    .await
                    .map_err(|e| EmbeddingError::Decode(e.to_string()))?;
                if let Some(usage) = &parsed.usage {
                    debug!(
                        prompt_tokens = usage.prompt_tokens,
                        total_tokens = usage.total_tokens,
                        "embedding usage"
                    );
                }
                parsed.data.sort_by_key(|entry| entry.index);
                if parsed.data.len() != inputs.len() {
                    return Err(EmbeddingError::CountMismatch {
                        expected: inputs.len(),
                        got: parsed.data.len(),
                    });
                }
                Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
            }
        }
    }
}
