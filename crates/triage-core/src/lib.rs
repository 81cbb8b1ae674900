//! # triage-core
//!
//! Duplicate detection and memory write for issue triage, plus the pipeline
//! that drives them.
//!
//! ## Flow
//! 1. Fetch the issue from an [`IssueSource`]
//! 2. Embed it and query the store for similar issues ([`DuplicateDetector`])
//! 3. Classify it ([`IssueClassifier`], e.g. [`KeywordClassifier`])
//! 4. Upsert it into the store ([`MemoryWriter`])
//! 5. Apply labels and a summary comment through an [`IssueSink`]
//!
//! The sink is only called once the memory write has succeeded.

pub mod classifier;
pub mod duplicate;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod types;
pub mod writer;

pub use classifier::KeywordClassifier;
pub use duplicate::{DuplicateConfig, DuplicateDetector, DuplicateVerdict};
pub use error::PipelineError;
pub use pipeline::{
    summary_comment, IssueClassifier, IssueSink, IssueSource, RetriageSummary, TriagePipeline,
    TriageReport, DUPLICATE_LABEL,
};
pub use retry::{with_retry, RetryPolicy};
pub use types::{Classification, Issue};
pub use writer::{ClassifiedIssue, MemoryWriter};
