use serde::{Deserialize, Serialize};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenAiEmbeddingModel {
    pub model_name: &'static str,
    pub native_dimensions: usize,
    /// Whether the model accepts the `dimensions` request parameter.
    pub supports_dimensions: bool,
    /// USD per 1K input tokens.
    pub price_per_1k_tokens: f64,
}

pub const OPENAI_EMBEDDING_MODELS: &[OpenAiEmbeddingModel] = &[
    OpenAiEmbeddingModel {
        model_name: "text-embedding-ada-002",
        native_dimensions: 1536,
        supports_dimensions: false,
        price_per_1k_tokens: 0.0001,
    },
    OpenAiEmbeddingModel {
        model_name: "text-embedding-3-small",
        native_dimensions: 1536,
        supports_dimensions: true,
        price_per_1k_tokens: 0.00002,
    },
    OpenAiEmbeddingModel {
        model_name: "text-embedding-3-large",
        native_dimensions: 3072,
        supports_dimensions: true,
        price_per_1k_tokens: 0.00013,
    },
];

pub fn find_model(model_name: &str) -> Option<&'static OpenAiEmbeddingModel> {
    OPENAI_EMBEDDING_MODELS.iter().find(|m| m.model_name == model_name)
}

#[derive(Debug, Serialize, Clone)]
pub struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    pub index: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<EmbeddingUsage>,
}
