//! Pipeline error types.

use thiserror::Error;
use triage_embeddings::EmbeddingError;
use triage_types::TriageError;
use triage_vector::StoreError;

/// Errors that abort the triage of one issue.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] TriageError),

    /// Issue could not be fetched
    #[error("Issue source error: {0}")]
    Source(String),

    /// Labels or comment could not be applied
    #[error("Issue sink error: {0}")]
    Sink(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Blocking task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Only transient store failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Store(e) if e.is_retryable())
    }
}
