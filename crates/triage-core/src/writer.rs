//! Memory write after classification.

use chrono::Utc;
use tracing::info;

use triage_embeddings::Embedding;
use triage_types::{normalize_labels, IssueKey, IssueRecord, Priority};
use triage_vector::{StoreError, StoreHandle};

/// A fully classified issue, ready to be remembered.
///
/// Labels and priority are required to build one, so a half-finished
/// classification never reaches the store.
#[derive(Debug, Clone)]
pub struct ClassifiedIssue {
    key: IssueKey,
    title: String,
    body: Option<String>,
    embedding: Embedding,
    labels: Vec<String>,
    priority: Priority,
}

impl ClassifiedIssue {
    pub fn new(
        key: IssueKey,
        title: impl Into<String>,
        body: Option<String>,
        embedding: Embedding,
        labels: Vec<String>,
        priority: Priority,
    ) -> Self {
        Self {
            key,
            title: title.into(),
            body,
            embedding,
            labels: normalize_labels(labels),
            priority,
        }
    }

    pub fn key(&self) -> &IssueKey {
        &self.key
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Record for this issue, stamped with the current time.
    pub fn to_record(&self) -> IssueRecord {
        IssueRecord::new(self.key.clone(), self.title.clone(), self.embedding.values.clone())
            .with_body(self.body.clone())
            .with_labels(self.labels.iter().cloned())
            .with_priority(Some(self.priority))
            .with_created_at(Utc::now())
    }
}

/// Upserts classified issues into the store.
#[derive(Clone)]
pub struct MemoryWriter {
    store: StoreHandle,
}

impl MemoryWriter {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Write one issue. Safe to call again after a failure.
    pub async fn write(&self, issue: &ClassifiedIssue) -> Result<IssueRecord, StoreError> {
        let record = issue.to_record();
        self.store.upsert(record.clone()).await?;

        info!(
            issue = %issue.key,
            priority = %issue.priority,
            labels = ?issue.labels,
            "Stored issue in memory"
        );
        Ok(record)
    }
}
