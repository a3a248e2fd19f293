use reqwest::Client;
use std::future::Future;
use std::time::Duration;

use crate::api_connection::connection::Provider;
use crate::error::EmbeddingError;

pub const EMBEDDING_DIMENSION: usize = 1536;

/// Text-to-vector capability. Implementations may fail transiently (rate
/// limits, timeouts); retrying is the caller's job.
pub trait Embedder: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send;

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

/// Checks count and dimensionality of a batch of vectors.
pub fn validate_vectors(vectors: &[Vec<f32>], expected_count: usize, dimension: usize) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            got: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            got: bad.len(),
        });
    }
    if let Some(index) = vectors.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
        return Err(EmbeddingError::NonFiniteVector(index));
    }
    Ok(())
}

/// Remote embedding engine backed by an HTTP provider.
pub struct EmbeddingEngine {
    client: Client,
    provider: Provider,
    request_timeout: Duration,
}

impl EmbeddingEngine {
    pub fn new(provider: Provider, request_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            provider,
            request_timeout,
        }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }
}

impl Embedder for EmbeddingEngine {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(index) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyText(index));
        }
        let vectors = self
            .provider
            .call_embeddings(&self.client, texts, self.request_timeout)
            .await?;
        validate_vectors(&vectors, texts.len(), EMBEDDING_DIMENSION)?;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_vectors() {
        let good = vec![vec![0.0; 4], vec![1.0; 4]];
        assert!(validate_vectors(&good, 2, 4).is_ok());
        assert!(matches!(
            validate_vectors(&good, 3, 4),
            Err(EmbeddingError::CountMismatch { expected: 3, got: 2 })
        ));
        let bad = vec![vec![0.0; 4], vec![1.0; 3]];
        assert!(matches!(
            validate_vectors(&bad, 2, 4),
            Err(EmbeddingError::DimensionMismatch { expected: 4, got: 3 })
        ));
        let nan = vec![vec![0.0; 4], vec![1.0, f32::NAN, 0.0, 0.0]];
        assert!(matches!(validate_vectors(&nan, 2, 4), Err(EmbeddingError::NonFiniteVector(1))));
        let inf = vec![vec![f32::INFINITY; 4]];
        assert!(matches!(validate_vectors(&inf, 1, 4), Err(EmbeddingError::NonFiniteVector(0))));
    }

    #[tokio::test]
    async fn test_empty_text_is_refused_before_any_request() {
        let provider = Provider::openai("unused", "http://127.0.0.1:9", "text-embedding-ada-002", EMBEDDING_DIMENSION);
        let engine = EmbeddingEngine::new(provider, Duration::from_millis(50));
        let texts = vec!["butter".to_string(), "  ".to_string()];
        let result = engine.embed_batch(&texts).await;
        assert!(matches!(result, Err(EmbeddingError::EmptyText(1))));
    }

    #[tokio::test]
    #[ignore] // Calls the live embeddings API
    async fn test_live_embedding_dimension() {
        dotenv::dotenv().ok();
        let Ok(key) = std::env::var("OPENAI_API_KEY") else {
            println!("Skipping test_live_embedding_dimension: OPENAI_API_KEY not set.");
            return;
        };
        let provider = Provider::openai(
            &key,
            crate::api_connection::endpoints::DEFAULT_OPENAI_BASE_URL,
            crate::api_connection::endpoints::DEFAULT_EMBEDDING_MODEL,
            EMBEDDING_DIMENSION,
        );
        let engine = EmbeddingEngine::new(provider, Duration::from_secs(30));
        let vectors = engine
            .embed_batch(&["butter dairy and egg products".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0].len(), EMBEDDING_DIMENSION);
    }
}
