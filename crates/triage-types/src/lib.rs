//! # triage-types
//!
//! Shared domain types for the issue triage system.
//!
//! This crate defines the core data structures used throughout the workspace:
//! - Issue keys and records: the durable snapshot of one triaged issue
//! - Similarity matches: transient results of a duplicate search
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use triage_types::{IssueKey, Priority};
//!
//! let key = IssueKey::new("acme/app", 42).unwrap();
//! assert_eq!(key.to_string(), "acme/app#42");
//! assert_eq!("P1".parse::<Priority>().unwrap(), Priority::P1);
//! ```

pub mod config;
pub mod error;
pub mod issue;

pub use config::{
    ClassifierSettings, DuplicateSettings, EmbeddingProvider, EmbeddingSettings, LabelRule,
    RetrySettings, SearchStrategy, Settings, StoreSettings,
};
pub use error::TriageError;
pub use issue::{normalize_labels, IssueKey, IssueRecord, Priority, SimilarityMatch};
