//! Error taxonomy for the pipeline.
//!
//! Malformed records never surface here: they are `Rejection`s collected by
//! the normalizer. Embedding and store failures carry `is_transient()` so the
//! uploader can decide between retrying and failing the batch. Configuration
//! errors abort the run before any network call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("input file not found: {0}")]
    InputNotFound(String),
}

fn is_transient_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("embedding API error {status}: {body}")]
    Api { status: reqwest::StatusCode, body: String },

    #[error("embedding response could not be decoded: {0}")]
    Decode(String),

    #[error("embedding text for input {0} is empty")]
    EmptyText(usize),

    #[error("embedding API returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding for input {0} contains a non-finite component")]
    NonFiniteVector(usize),
}

impl EmbeddingError {
    /// Rate limits, timeouts, connection problems and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Timeout(_) => true,
            EmbeddingError::Network(err) => is_transient_transport(err),
            EmbeddingError::Api { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("store API error {status}: {body}")]
    Api { status: reqwest::StatusCode, body: String },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record {0} has no embedding")]
    MissingEmbedding(String),

    #[error("record {id} has a {got}-dimensional embedding, store expects {expected}")]
    DimensionMismatch { id: String, expected: usize, got: usize },

    #[error("record {0} has a non-finite embedding component")]
    NonFiniteEmbedding(String),

    #[error("store file is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) => true,
            StoreError::Network(err) => is_transient_transport(err),
            StoreError::Api { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_embedding_error_classification() {
        let rate_limited = EmbeddingError::Api { status: StatusCode::TOO_MANY_REQUESTS, body: String::new() };
        let server = EmbeddingError::Api { status: StatusCode::BAD_GATEWAY, body: String::new() };
        let auth = EmbeddingError::Api { status: StatusCode::UNAUTHORIZED, body: String::new() };
        assert!(rate_limited.is_transient());
        assert!(server.is_transient());
        assert!(EmbeddingError::Timeout(std::time::Duration::from_secs(1)).is_transient());
        assert!(!auth.is_transient());
        assert!(!EmbeddingError::DimensionMismatch { expected: 1536, got: 512 }.is_transient());
        assert!(!EmbeddingError::CountMismatch { expected: 2, got: 1 }.is_transient());
        assert!(!EmbeddingError::NonFiniteVector(0).is_transient());
    }

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::Api { status: StatusCode::SERVICE_UNAVAILABLE, body: String::new() }.is_transient());
        assert!(!StoreError::Api { status: StatusCode::BAD_REQUEST, body: "column missing".into() }.is_transient());
        assert!(!StoreError::MissingEmbedding("1".into()).is_transient());
    }
}
