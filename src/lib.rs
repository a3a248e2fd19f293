pub mod api_connection;
pub mod search;
pub mod cli;
pub mod config;
pub mod error;
pub mod food;
pub mod food_normalizer;
pub mod food_sampler;
pub mod embedding_text;
pub mod uploader;
pub mod pipeline;
