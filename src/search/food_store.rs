use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::food::CanonicalFood;
use crate::search::hybrid_search::{SearchHit, SearchParams};
use crate::search::nano_vector_db::{NanoVectorDB, UpsertOutcome};

/// Persistent store capability: upsert-by-key plus hybrid search.
///
/// `upsert` must be last-write-wins on `external_id` and must either write
/// every row of the call or none of them.
pub trait FoodStore: Send + Sync {
    fn upsert(&self, foods: Vec<CanonicalFood>) -> impl Future<Output = Result<UpsertOutcome, StoreError>> + Send;

    /// Subset of `ids` already present in the store.
    fn existing_ids(&self, ids: &[String]) -> impl Future<Output = Result<HashSet<String>, StoreError>> + Send;

    fn search(&self, query: &[f32], params: &SearchParams) -> impl Future<Output = Result<Vec<SearchHit>, StoreError>> + Send;
}

/// [`NanoVectorDB`] behind an async mutex. Each successful upsert is flushed
/// to disk before returning.
pub struct LocalFoodStore {
    db: Mutex<NanoVectorDB>,
}

impl LocalFoodStore {
    pub fn open(path: impl AsRef<Path>, embedding_dim: usize) -> Result<Self, StoreError> {
        let db = NanoVectorDB::new(embedding_dim, path)?;
        debug!(rows = db.len(), "opened local food store");
        Ok(Self { db: Mutex::new(db) })
    }

    pub async fn len(&self) -> usize {
        self.db.lock().await.len()
    }

    pub async fn snapshot(&self) -> Vec<CanonicalFood> {
        self.db.lock().await.all()
    }
}

impl FoodStore for LocalFoodStore {
    async fn upsert(&self, foods: Vec<CanonicalFood>) -> Result<UpsertOutcome, StoreError> {
        self.db.lock().await.upsert_and_save(foods)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        Ok(self.db.lock().await.existing(ids))
    }

    async fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<SearchHit>, StoreError> {
        Ok(self.db.lock().await.query(query, params))
    }
}
