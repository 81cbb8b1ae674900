//! Issue identity and record types.
//!
//! An issue is identified by `(repository, number)`. The record stored for it
//! is overwritten in place on every re-triage, so the key is the only stable
//! handle to a real-world issue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TriageError;

/// Separator between repository and number in the encoded key.
const KEY_SEPARATOR: u8 = 0x00;

/// Unique identity of an issue across repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueKey {
    /// Repository identifier (e.g. "acme/app")
    pub repo: String,
    /// Issue number, always positive
    pub number: u64,
}

impl IssueKey {
    /// Create a key, rejecting empty repositories and non-positive numbers.
    pub fn new(repo: impl Into<String>, number: u64) -> Result<Self, TriageError> {
        let repo = repo.into();
        if repo.trim().is_empty() {
            return Err(TriageError::InvalidInput(
                "repository identifier must not be empty".to_string(),
            ));
        }
        if repo.as_bytes().contains(&KEY_SEPARATOR) {
            return Err(TriageError::InvalidInput(
                "repository identifier must not contain NUL bytes".to_string(),
            ));
        }
        if number == 0 {
            return Err(TriageError::InvalidInput(
                "issue number must be positive".to_string(),
            ));
        }
        Ok(Self { repo, number })
    }

    /// Encode key to bytes for storage.
    ///
    /// Format: `{repo}\0{number as big-endian u64}`. Keys for one repository
    /// sort together and by number.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.repo.len() + 9);
        bytes.extend_from_slice(self.repo.as_bytes());
        bytes.push(KEY_SEPARATOR);
        bytes.extend_from_slice(&self.number.to_be_bytes());
        bytes
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TriageError> {
        if bytes.len() < 10 {
            return Err(TriageError::InvalidInput(format!(
                "issue key too short: {} bytes",
                bytes.len()
            )));
        }
        let (repo_part, rest) = bytes.split_at(bytes.len() - 9);
        if rest[0] != KEY_SEPARATOR {
            return Err(TriageError::InvalidInput(
                "issue key missing separator".to_string(),
            ));
        }
        let repo = std::str::from_utf8(repo_part)
            .map_err(|e| TriageError::InvalidInput(format!("Invalid UTF-8: {}", e)))?;
        let mut number_bytes = [0u8; 8];
        number_bytes.copy_from_slice(&rest[1..]);
        Self::new(repo, u64::from_be_bytes(number_bytes))
    }
}

impl std::fmt::Display for IssueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// Triage priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Critical
    P0,
    /// High
    P1,
    /// Medium
    P2,
    /// Low
    P3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }

    /// Human-readable severity used in triage comments.
    pub fn description(&self) -> &'static str {
        match self {
            Priority::P0 => "critical",
            Priority::P1 => "high",
            Priority::P2 => "medium",
            Priority::P3 => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" => Ok(Priority::P0),
            "P1" => Ok(Priority::P1),
            "P2" => Ok(Priority::P2),
            "P3" => Ok(Priority::P3),
            other => Err(TriageError::InvalidInput(format!(
                "unknown priority '{}', expected one of P0, P1, P2, P3",
                other
            ))),
        }
    }
}

/// Snapshot of one triaged issue.
///
/// The embedding is stored as given; the store normalizes it on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub key: IssueKey,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub embedding: Vec<f32>,
    /// Ordered, de-duplicated label set
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Time of the write that produced this snapshot
    pub created_at: DateTime<Utc>,
}

impl IssueRecord {
    /// Create a record stamped with the current time and no classification.
    pub fn new(key: IssueKey, title: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            key,
            title: title.into(),
            body: None,
            embedding,
            labels: Vec::new(),
            priority: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    /// Set labels, dropping duplicates while keeping first-seen order.
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = normalize_labels(labels);
        self
    }

    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Trim labels and drop empties and duplicates, keeping first-seen order.
pub fn normalize_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for label in labels {
        let label: String = label.into();
        let label = label.trim();
        if !label.is_empty() && !out.iter().any(|l| l == label) {
            out.push(label.to_string());
        }
    }
    out
}

/// A stored issue that cleared the similarity threshold for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub key: IssueKey,
    pub title: String,
    /// Similarity in [0, 1], 1.0 = identical direction
    pub score: f32,
    /// Write time of the matched record (used for tie-breaking)
    pub created_at: DateTime<Utc>,
}
