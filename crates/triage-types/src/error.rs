//! Error types for the issue triage system.

use thiserror::Error;

/// Error type for domain construction and configuration.
#[derive(Debug, Error)]
pub enum TriageError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
