pub mod data_loader;
pub mod embedding_engine;
pub mod food_store;
pub mod hybrid_search;
pub mod nano_vector_db;
pub mod supabase_store;

pub use data_loader::{load_cleaned_foods, load_raw_records, write_cleaned_foods, write_rejection_report};
pub use embedding_engine::{Embedder, EmbeddingEngine, EMBEDDING_DIMENSION};
pub use food_store::{FoodStore, LocalFoodStore};
pub use hybrid_search::{SearchFilters, SearchHit, SearchParams};
pub use nano_vector_db::{NanoVectorDB, UpsertOutcome};
pub use supabase_store::{SupabaseConfig, SupabaseStore};
