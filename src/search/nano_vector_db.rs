//! A lightweight file-backed food store
#![forbid(unsafe_code)]

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::food::CanonicalFood;
use crate::search::hybrid_search::{hybrid_search, SearchCandidate, SearchHit, SearchParams};

type Float = f32;

/// Keys written and overwritten by one upsert call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertOutcome {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataBase {
    embedding_dim: usize,
    /// Rows are stored without their embedding; vectors live in `matrix`,
    /// row `i` at `matrix[i * embedding_dim..(i + 1) * embedding_dim]`.
    data: Vec<CanonicalFood>,
    #[serde(with = "base64_bytes")]
    matrix: Vec<Float>,
}

mod base64_bytes {
    use super::*;
    use bytemuck::cast_slice;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(vec: &[Float], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = cast_slice(vec);
        let b64 = general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&b64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Float>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(serde::de::Error::custom("matrix byte length is not a multiple of 4"));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| Float::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

/// File-backed store holding one row per `external_id`.
#[derive(Debug)]
pub struct NanoVectorDB {
    pub embedding_dim: usize,
    storage_file: PathBuf,
    storage: DataBase,
    positions: HashMap<String, usize>,
}

impl NanoVectorDB {
    /// Opens the store at `storage_file`, or starts an empty one if the file
    /// is missing or empty.
    pub fn new(embedding_dim: usize, storage_file: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_file = storage_file.as_ref().to_path_buf();
        let storage = if storage_file.exists() && storage_file.metadata()?.len() > 0 {
            let contents = fs::read_to_string(&storage_file)?;
            let db: DataBase = serde_json::from_str(&contents)?;

            if db.embedding_dim != embedding_dim {
                return Err(StoreError::Corrupt(format!(
                    "Embedding dimension mismatch: DB has {}, expected {}",
                    db.embedding_dim, embedding_dim
                )));
            }

            let expected_len = db.data.len() * db.embedding_dim;
            if db.matrix.len() != expected_len {
                return Err(StoreError::Corrupt(format!(
                    "Matrix size mismatch: expected {}, got {}",
                    expected_len,
                    db.matrix.len()
                )));
            }
            db
        } else {
            DataBase {
                embedding_dim,
                data: Vec::new(),
                matrix: Vec::new(),
            }
        };

        let mut positions = HashMap::with_capacity(storage.data.len());
        for (i, row) in storage.data.iter().enumerate() {
            if positions.insert(row.external_id.clone(), i).is_some() {
                return Err(StoreError::Corrupt(format!("duplicate external_id {}", row.external_id)));
            }
        }

        Ok(Self {
            embedding_dim,
            storage_file,
            storage,
            positions,
        })
    }

    /// Inserts or overwrites rows keyed on `external_id`. Every row must carry
    /// an embedding of the store's dimension; if any does not, nothing is
    /// written. Within one call a repeated key is applied in order, so the
    /// last occurrence wins.
    pub fn upsert(&mut self, foods: Vec<CanonicalFood>) -> Result<UpsertOutcome, StoreError> {
        for food in &foods {
            match &food.embedding {
                None => return Err(StoreError::MissingEmbedding(food.external_id.clone())),
                Some(v) if v.len() != self.embedding_dim => {
                    return Err(StoreError::DimensionMismatch {
                        id: food.external_id.clone(),
                        expected: self.embedding_dim,
                        got: v.len(),
                    })
                }
                Some(v) if v.iter().any(|x| !x.is_finite()) => {
                    return Err(StoreError::NonFiniteEmbedding(food.external_id.clone()))
                }
                Some(_) => {}
            }
        }

        let mut outcome = UpsertOutcome::default();
        for mut food in foods {
            let vector = food.embedding.take().unwrap_or_default();
            match self.positions.get(&food.external_id) {
                Some(&pos) => {
                    let start = pos * self.embedding_dim;
                    self.storage.matrix[start..start + self.embedding_dim].copy_from_slice(&vector);
                    outcome.updated.push(food.external_id.clone());
                    self.storage.data[pos] = food;
                }
                None => {
                    self.storage.matrix.extend_from_slice(&vector);
                    self.positions.insert(food.external_id.clone(), self.storage.data.len());
                    outcome.inserted.push(food.external_id.clone());
                    self.storage.data.push(food);
                }
            }
        }
        Ok(outcome)
    }

    /// [`upsert`](Self::upsert) followed by [`save`](Self::save). When the
    /// save fails the in-memory rows are restored, so the failed call is
    /// visible neither in memory nor on disk.
    pub fn upsert_and_save(&mut self, foods: Vec<CanonicalFood>) -> Result<UpsertOutcome, StoreError> {
        let previous = (self.storage.clone(), self.positions.clone());
        let outcome = self.upsert(foods)?;
        if let Err(err) = self.save() {
            (self.storage, self.positions) = previous;
            return Err(err);
        }
        Ok(outcome)
    }

    fn vector_at(&self, pos: usize) -> &[Float] {
        let start = pos * self.embedding_dim;
        &self.storage.matrix[start..start + self.embedding_dim]
    }

    /// Hybrid vector + filter query over every stored row.
    pub fn query(&self, query: &[Float], params: &SearchParams) -> Vec<SearchHit> {
        if self.storage.data.is_empty() {
            return Vec::new();
        }
        let candidates: Vec<SearchCandidate<'_>> = self
            .storage
            .data
            .iter()
            .enumerate()
            .map(|(pos, food)| SearchCandidate {
                food,
                embedding: self.vector_at(pos),
            })
            .collect();
        hybrid_search(&candidates, query, params)
    }

    /// Returns the stored row with its embedding reattached.
    pub fn get(&self, external_id: &str) -> Option<CanonicalFood> {
        let pos = *self.positions.get(external_id)?;
        let mut food = self.storage.data[pos].clone();
        food.embedding = Some(self.vector_at(pos).to_vec());
        Some(food)
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.positions.contains_key(external_id)
    }

    pub fn existing(&self, ids: &[String]) -> HashSet<String> {
        ids.iter().filter(|id| self.contains(id)).cloned().collect()
    }

    /// All rows in insertion order, with embeddings.
    pub fn all(&self) -> Vec<CanonicalFood> {
        (0..self.storage.data.len())
            .filter_map(|pos| self.get(&self.storage.data[pos].external_id))
            .collect()
    }

    /// Writes to a sibling temp file and renames it over the store, so an
    /// interrupted save leaves the previous file intact.
    pub fn save(&self) -> Result<(), StoreError> {
        let serialized = serde_json::to_string_pretty(&self.storage)?;
        let tmp = self.storage_file.with_extension("json.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.storage_file)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.storage.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.data.is_empty()
    }
}
