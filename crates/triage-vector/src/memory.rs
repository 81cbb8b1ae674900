//! In-memory similarity store.
//!
//! Same contract as the RocksDB store with exact search only. Used for dry
//! runs and as a fake in tests.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;
use triage_types::{IssueKey, IssueRecord, SimilarityMatch};

use crate::error::StoreError;
use crate::query::SimilarityQuery;
use crate::store::{validate_record, SimilarityStore};

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Constraint("store lock poisoned".to_string())
}

/// Volatile store backed by a hash map.
pub struct InMemorySimilarityStore {
    dimension: usize,
    rows: RwLock<HashMap<IssueKey, IssueRecord>>,
}

impl InMemorySimilarityStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl SimilarityStore for InMemorySimilarityStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert(&self, record: &IssueRecord) -> Result<(), StoreError> {
        let stored = validate_record(record, self.dimension)?;
        let mut rows = self.rows.write().map_err(poisoned)?;
        let replaced = rows.insert(stored.key.clone(), stored).is_some();
        debug!(
            repo = %record.key.repo,
            number = record.key.number,
            replaced,
            "Upserted issue record"
        );
        Ok(())
    }

    fn find_similar(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityMatch>, StoreError> {
        query.validate(self.dimension)?;
        let rows = self.rows.read().map_err(poisoned)?;
        query.select(rows.values().cloned().map(Ok))
    }

    fn get(&self, key: &IssueKey) -> Result<Option<IssueRecord>, StoreError> {
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows.get(key).cloned())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.rows.read().map_err(poisoned)?.len())
    }
}
