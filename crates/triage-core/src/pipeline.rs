//! Triage pipeline: fetch, duplicate check, classify, remember, label.
//!
//! External systems (issue tracker, classifier) sit behind traits so the
//! pipeline runs the same against GitHub, a JSON file or a test fake.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use triage_types::{normalize_labels, IssueKey, Priority};

use crate::duplicate::{DuplicateDetector, DuplicateVerdict};
use crate::error::PipelineError;
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{Classification, Issue};
use crate::writer::{ClassifiedIssue, MemoryWriter};

/// Label added when the duplicate check finds a match
pub const DUPLICATE_LABEL: &str = "duplicate";

/// Where issues come from.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn fetch(&self, key: &IssueKey) -> Result<Issue, PipelineError>;
}

/// Where triage results go.
#[async_trait]
pub trait IssueSink: Send + Sync {
    /// Add `labels` to the issue and post `comment`.
    async fn apply(&self, key: &IssueKey, labels: &[String], comment: &str) -> Result<(), PipelineError>;
}

/// Assigns labels and priority.
#[async_trait]
pub trait IssueClassifier: Send + Sync {
    async fn classify(&self, issue: &Issue) -> Result<Classification, PipelineError>;
}

/// Outcome of triaging one issue.
#[derive(Debug, Clone, Serialize)]
pub struct TriageReport {
    pub key: IssueKey,
    /// Labels applied, including `duplicate` when flagged
    pub labels: Vec<String>,
    pub priority: Priority,
    pub confidence: f32,
    pub verdict: DuplicateVerdict,
    pub stored: bool,
    pub comment: String,
}

/// Outcome of a bulk retriage.
#[derive(Debug, Default, Serialize)]
pub struct RetriageSummary {
    pub triaged: Vec<TriageReport>,
    /// Issues that failed, with the error message
    pub failed: Vec<(IssueKey, String)>,
}

impl RetriageSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Summary comment posted on the issue.
pub fn summary_comment(
    labels: &[String],
    priority: Priority,
    verdict: &DuplicateVerdict,
    stored: bool,
) -> String {
    let labels = if labels.is_empty() {
        "none".to_string()
    } else {
        labels.join(", ")
    };

    let memory_check = match verdict.top_match() {
        Some(top) => {
            let others = verdict.matches.len() - 1;
            let mut line = format!(
                "possible duplicate of {} \"{}\" (similarity {:.2})",
                top.key, top.title, top.score
            );
            if others > 0 {
                line.push_str(&format!(", plus {} other similar issue(s)", others));
            }
            line
        }
        None => format!(
            "no similar issues found (threshold {:.2})",
            verdict.threshold
        ),
    };

    let stored = if stored {
        "stored for future duplicate detection"
    } else {
        "not stored"
    };

    format!(
        "## Triage summary\n\n\
         - **Labels:** {}\n\
         - **Priority:** {} ({})\n\
         - **Memory check:** {}\n\
         - **Memory:** {}\n",
        labels,
        priority,
        priority.description(),
        memory_check,
        stored
    )
}

/// Runs the full triage flow for one issue at a time.
pub struct TriagePipeline {
    source: Arc<dyn IssueSource>,
    sink: Arc<dyn IssueSink>,
    classifier: Arc<dyn IssueClassifier>,
    detector: DuplicateDetector,
    writer: MemoryWriter,
    retry: RetryPolicy,
}

impl TriagePipeline {
    pub fn new(
        source: Arc<dyn IssueSource>,
        sink: Arc<dyn IssueSink>,
        classifier: Arc<dyn IssueClassifier>,
        detector: DuplicateDetector,
        writer: MemoryWriter,
    ) -> Self {
        Self {
            source,
            sink,
            classifier,
            detector,
            writer,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Triage one issue.
    ///
    /// Labels and the comment are applied only after the issue has been
    /// written to memory. Any failure before that leaves the tracker untouched.
    pub async fn triage(&self, key: &IssueKey) -> Result<TriageReport, PipelineError> {
        info!(issue = %key, "Triaging issue");

        let issue = self.source.fetch(key).await?;
        let embedding = self.detector.embed(&issue.title, issue.body.as_deref()).await?;

        let verdict = with_retry(&self.retry, "find_similar", || {
            self.detector.check(key, &embedding)
        })
        .await?;

        let classification = self.classifier.classify(&issue).await?;

        let mut labels = classification.labels.clone();
        if verdict.is_duplicate {
            labels.push(DUPLICATE_LABEL.to_string());
        }
        let labels = normalize_labels(labels);

        let classified = ClassifiedIssue::new(
            key.clone(),
            issue.title.clone(),
            issue.body.clone(),
            embedding,
            labels.clone(),
            classification.priority,
        );
        with_retry(&self.retry, "upsert", || self.writer.write(&classified)).await?;

        let comment = summary_comment(&labels, classification.priority, &verdict, true);
        self.sink.apply(key, &labels, &comment).await?;

        info!(
            issue = %key,
            priority = %classification.priority,
            duplicate = verdict.is_duplicate,
            "Triage complete"
        );

        Ok(TriageReport {
            key: key.clone(),
            labels,
            priority: classification.priority,
            confidence: classification.confidence,
            verdict,
            stored: true,
            comment,
        })
    }

    /// Triage each issue in turn. A failure is recorded and the next issue
    /// is still attempted.
    pub async fn retriage_all(&self, keys: &[IssueKey]) -> RetriageSummary {
        let mut summary = RetriageSummary::default();

        for key in keys {
            match self.triage(key).await {
                Ok(report) => summary.triaged.push(report),
                Err(e) => {
                    error!(issue = %key, error = %e, "Triage failed");
                    summary.failed.push((key.clone(), e.to_string()));
                }
            }
        }

        info!(
            triaged = summary.triaged.len(),
            failed = summary.failed.len(),
            "Retriage complete"
        );
        summary
    }
}
