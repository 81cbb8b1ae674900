//! Similarity store trait.

use triage_types::{IssueKey, IssueRecord, SimilarityMatch};

use crate::error::StoreError;
use crate::query::SimilarityQuery;
use crate::similarity::normalize;

/// Persistent mapping from issue key to embedding plus metadata.
///
/// Calls are synchronous and may block on disk; async callers go through
/// [`crate::StoreHandle`], which bounds every call with a timeout.
pub trait SimilarityStore: Send + Sync {
    /// Configured embedding dimension
    fn dimension(&self) -> usize;

    /// Insert or overwrite the row for `record.key`.
    ///
    /// Every field is replaced. Applying the same record twice leaves the same
    /// state as applying it once.
    fn upsert(&self, record: &IssueRecord) -> Result<(), StoreError>;

    /// Rows similar to the query, best first. Empty when nothing qualifies.
    fn find_similar(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityMatch>, StoreError>;

    /// Fetch one row.
    fn get(&self, key: &IssueKey) -> Result<Option<IssueRecord>, StoreError>;

    /// Number of rows.
    fn count(&self) -> Result<usize, StoreError>;

    /// Persist derived state (e.g. the HNSW index). Rows are durable on upsert.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Check a record against the store's dimension and return the copy to persist.
///
/// The persisted embedding is unit length so cosine reduces to a dot product
/// and re-upserting an already stored record is a no-op.
pub fn validate_record(record: &IssueRecord, dimension: usize) -> Result<IssueRecord, StoreError> {
    if record.embedding.len() != dimension {
        return Err(StoreError::DimensionMismatch {
            expected: dimension,
            actual: record.embedding.len(),
        });
    }
    if record.embedding.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidRecord(format!(
            "{}: embedding contains non-finite values",
            record.key
        )));
    }

    let mut stored = record.clone();
    normalize(&mut stored.embedding);
    Ok(stored)
}
