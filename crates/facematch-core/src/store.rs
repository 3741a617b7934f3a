//! In-memory enrollment store with JSON snapshot persistence.
//!
//! Records are kept in insertion order behind a reader/writer lock: queries
//! share the read side, `add` and `remove_by_person` take the write side and
//! are therefore never observed half-applied by a concurrent query.

use crate::matcher::{CosineMatcher, MatchResult, Matcher};
use crate::types::{Embedding, EnrollmentRecord};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("store lock poisoned by a panicking writer")]
    Poisoned,
    #[error("snapshot I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot format: {0}")]
    Json(#[from] serde_json::Error),
}

/// One row of [`EmbeddingStore::people`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonSummary {
    pub person_id: i64,
    pub person_name: String,
    pub samples: usize,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dim: usize,
    records: Vec<EnrollmentRecord>,
}

/// Flat collection of enrolled embeddings with a fixed dimensionality.
#[derive(Debug)]
pub struct EmbeddingStore {
    dim: usize,
    records: RwLock<Vec<EnrollmentRecord>>,
}

impl EmbeddingStore {
    pub fn new(dim: usize) -> Self {
        Self { dim, records: RwLock::new(Vec::new()) }
    }

    /// Dimensionality every stored and queried embedding must have.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.is_empty())
    }

    /// Append a record.
    pub fn add(&self, record: EnrollmentRecord) -> Result<(), StoreError> {
        self.check_dim(&record.embedding)?;
        let mut records = self.write()?;
        tracing::info!(
            person_id = record.person_id,
            record_id = %record.record_id,
            total = records.len() + 1,
            "store: record added"
        );
        records.push(record);
        Ok(())
    }

    /// Remove every record belonging to `person_id`. Returns how many were removed.
    pub fn remove_by_person(&self, person_id: i64) -> Result<usize, StoreError> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|r| r.person_id != person_id);
        let removed = before - records.len();
        tracing::info!(person_id, removed, remaining = records.len(), "store: person removed");
        Ok(removed)
    }

    /// Remove a single record. Returns whether it was present.
    pub fn remove_record(&self, record_id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.write()?;
        let Some(pos) = records.iter().position(|r| r.record_id == record_id) else {
            return Ok(false);
        };
        records.remove(pos);
        tracing::info!(%record_id, remaining = records.len(), "store: record removed");
        Ok(true)
    }

    /// Swap in a complete record list, keeping its order.
    ///
    /// Every record is checked before anything is replaced.
    pub fn replace(&self, replacement: Vec<EnrollmentRecord>) -> Result<(), StoreError> {
        for record in &replacement {
            self.check_dim(&record.embedding)?;
        }
        *self.write()? = replacement;
        Ok(())
    }

    /// Full scan for the best match above `threshold` (see [`CosineMatcher`]).
    pub fn query(&self, probe: &Embedding, threshold: f32) -> Result<MatchResult, StoreError> {
        self.query_with(&CosineMatcher, probe, threshold)
    }

    pub fn query_with(
        &self,
        matcher: &dyn Matcher,
        probe: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, StoreError> {
        self.check_dim(probe)?;
        let records = self.read()?;
        Ok(matcher.compare(probe, &records, threshold))
    }

    /// Enrolled people in order of their first record.
    pub fn people(&self) -> Result<Vec<PersonSummary>, StoreError> {
        let records = self.read()?;
        let mut people: Vec<PersonSummary> = Vec::new();
        for record in records.iter() {
            match people.iter_mut().find(|p| p.person_id == record.person_id) {
                Some(p) => p.samples += 1,
                None => people.push(PersonSummary {
                    person_id: record.person_id,
                    person_name: record.person_name.clone(),
                    samples: 1,
                }),
            }
        }
        Ok(people)
    }

    /// Copy of every record in insertion order.
    pub fn records(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        Ok(self.read()?.clone())
    }

    /// Write a JSON snapshot, replacing `path` atomically via a sibling temp file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = Snapshot { dim: self.dim, records: self.records()? };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), records = snapshot.records.len(), "store: snapshot saved");
        Ok(())
    }

    /// Load a snapshot written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

        let store = Self::new(snapshot.dim);
        let count = snapshot.records.len();
        store.replace(snapshot.records)?;
        tracing::info!(path = %path.display(), dim = snapshot.dim, records = count, "store: snapshot loaded");
        Ok(store)
    }

    /// Load `path` if it exists, otherwise start an empty store of `dim` dimensions.
    pub fn open_or_new(path: &Path, dim: usize) -> Result<Self, StoreError> {
        if path.exists() {
            let store = Self::load(path)?;
            if store.dim != dim {
                return Err(StoreError::DimensionMismatch { expected: dim, actual: store.dim });
            }
            Ok(store)
        } else {
            Ok(Self::new(dim))
        }
    }

    fn check_dim(&self, embedding: &Embedding) -> Result<(), StoreError> {
        if embedding.dim() != self.dim {
            return Err(StoreError::DimensionMismatch { expected: self.dim, actual: embedding.dim() });
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<EnrollmentRecord>>, StoreError> {
        self.records.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<EnrollmentRecord>>, StoreError> {
        self.records.write().map_err(|_| StoreError::Poisoned)
    }
}
