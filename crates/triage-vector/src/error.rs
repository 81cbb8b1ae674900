//! Similarity store error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during store operations.
///
/// Only `Connectivity` and `Timeout` are transient; see [`StoreError::is_retryable`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing store unreachable, locked, or failing I/O. Retryable.
    #[error("Store unavailable: {0}")]
    Connectivity(String),

    /// Call exceeded the caller-supplied bound
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// Uniqueness or consistency violation, or a non-transient storage fault
    /// such as corruption.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Embedding dimension does not match the store
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Record failed validation before write
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Query parameters out of range
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// usearch index error
    #[error("Index error: {0}")]
    Index(String),
}

impl StoreError {
    /// Whether the orchestrator may retry the call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connectivity(_) | StoreError::Timeout(_))
    }
}

/// RocksDB status kinds that can clear up on their own.
fn is_transient(kind: rocksdb::ErrorKind) -> bool {
    matches!(
        kind,
        rocksdb::ErrorKind::IOError
            | rocksdb::ErrorKind::Busy
            | rocksdb::ErrorKind::TimedOut
            | rocksdb::ErrorKind::TryAgain
            | rocksdb::ErrorKind::Incomplete
            | rocksdb::ErrorKind::ShutdownInProgress
    )
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        if is_transient(err.kind()) {
            StoreError::Connectivity(err.to_string())
        } else {
            StoreError::Constraint(err.to_string())
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Connectivity(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
