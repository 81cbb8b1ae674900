//! Issue and classification types exchanged with collaborators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use triage_types::{IssueKey, Priority, TriageError};

/// An issue as fetched from the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub repo: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    /// Labels already on the issue
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Issue {
    pub fn key(&self) -> Result<IssueKey, TriageError> {
        IssueKey::new(self.repo.clone(), self.number)
    }
}

/// Classifier output for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub labels: Vec<String>,
    pub priority: Priority,
    /// Best label score, 0.0-1.0
    pub confidence: f32,
    /// Per-label scores, rounded to two decimals
    #[serde(default)]
    pub scores: BTreeMap<String, f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_from_json() {
        let issue: Issue = serde_json::from_str(
            r#"{"repo": "acme/app", "number": 12, "title": "App crashes on startup"}"#,
        )
        .unwrap();
        assert_eq!(issue.body, None);
        assert!(issue.labels.is_empty());
        assert_eq!(issue.key().unwrap().to_string(), "acme/app#12");
    }

    #[test]
    fn test_issue_key_rejects_zero() {
        let issue = Issue {
            repo: "acme/app".to_string(),
            number: 0,
            title: "x".to_string(),
            body: None,
            labels: vec![],
        };
        assert!(issue.key().is_err());
    }
}
