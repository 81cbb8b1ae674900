//! File-backed issue source and stdout issue sink.
//!
//! These stand in for the issue tracker so the pipeline can run offline from
//! a CI job or a shell.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use triage_core::{Issue, IssueSink, IssueSource, PipelineError};
use triage_types::IssueKey;

#[derive(Deserialize)]
#[serde(untagged)]
enum IssueFile {
    Many(Vec<Issue>),
    One(Issue),
}

/// Issues read from a JSON file holding one issue object or an array of them.
pub struct JsonFileIssueSource {
    order: Vec<IssueKey>,
    issues: HashMap<IssueKey, Issue>,
}

impl JsonFileIssueSource {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read issue file {:?}", path))?;
        Self::from_json(&content).with_context(|| format!("Invalid issue file {:?}", path))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let issues = match serde_json::from_str::<IssueFile>(json)? {
            IssueFile::Many(issues) => issues,
            IssueFile::One(issue) => vec![issue],
        };

        let mut order = Vec::with_capacity(issues.len());
        let mut by_key = HashMap::with_capacity(issues.len());
        for issue in issues {
            let key = issue.key()?;
            if by_key.insert(key.clone(), issue).is_none() {
                order.push(key);
            }
        }

        Ok(Self {
            order,
            issues: by_key,
        })
    }

    /// Keys in file order, first occurrence wins.
    pub fn keys(&self) -> &[IssueKey] {
        &self.order
    }
}

#[async_trait]
impl IssueSource for JsonFileIssueSource {
    async fn fetch(&self, key: &IssueKey) -> Result<Issue, PipelineError> {
        self.issues
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::Source(format!("{} not in issue file", key)))
    }
}

#[derive(Serialize)]
struct AppliedTriage<'a> {
    issue: String,
    labels: &'a [String],
    comment: &'a str,
}

/// Writes each label/comment application as one JSON line.
pub struct StdoutIssueSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutIssueSink {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Default for StdoutIssueSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IssueSink for StdoutIssueSink {
    async fn apply(&self, key: &IssueKey, labels: &[String], comment: &str) -> Result<(), PipelineError> {
        let line = serde_json::to_string(&AppliedTriage {
            issue: key.to_string(),
            labels,
            comment,
        })
        .map_err(|e| PipelineError::Sink(e.to_string()))?;

        let mut out = self
            .out
            .lock()
            .map_err(|_| PipelineError::Sink("output lock poisoned".to_string()))?;
        writeln!(out, "{}", line).map_err(|e| PipelineError::Sink(e.to_string()))?;
        out.flush().map_err(|e| PipelineError::Sink(e.to_string()))
    }
}
