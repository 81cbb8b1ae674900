//! Similarity query parameters and the shared selection rule.
//!
//! Every search path, exact or approximate, hands its candidate rows to
//! [`SimilarityQuery::select`]. Threshold, age, exclusion and ordering are
//! therefore decided in one place.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};

use triage_embeddings::Embedding;
use triage_types::{IssueKey, IssueRecord, SimilarityMatch};

use crate::error::StoreError;
use crate::similarity::{normalize, similarity_score};

/// Default minimum similarity for a match
pub const DEFAULT_THRESHOLD: f32 = 0.85;

/// Default number of matches returned
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Nearest-neighbor query against the store.
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    /// Query vector (normalized on construction)
    pub embedding: Vec<f32>,
    /// Minimum similarity, inclusive
    pub threshold: f32,
    /// Maximum number of matches
    pub max_results: usize,
    /// Only consider rows written within this window
    pub max_age: Option<Duration>,
    /// Row never returned, typically the querying issue itself
    pub exclude: Option<IssueKey>,
    /// Only match issues from this repository
    pub repo: Option<String>,
}

impl SimilarityQuery {
    pub fn new(mut embedding: Vec<f32>) -> Self {
        normalize(&mut embedding);
        Self {
            embedding,
            threshold: DEFAULT_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
            max_age: None,
            exclude: None,
            repo: None,
        }
    }

    pub fn from_embedding(embedding: &Embedding) -> Self {
        Self::new(embedding.values.clone())
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Exclude one issue from the results (prevents self-matches).
    pub fn excluding(mut self, key: IssueKey) -> Self {
        self.exclude = Some(key);
        self
    }

    pub fn in_repo(mut self, repo: Option<String>) -> Self {
        self.repo = repo;
        self
    }

    /// Check parameters against the store's dimension.
    pub fn validate(&self, dimension: usize) -> Result<(), StoreError> {
        if self.embedding.len() != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                actual: self.embedding.len(),
            });
        }
        if self.embedding.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidQuery(
                "query embedding contains non-finite values".to_string(),
            ));
        }
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(StoreError::InvalidQuery(format!(
                "threshold must be 0.0-1.0, got {}",
                self.threshold
            )));
        }
        if self.max_results == 0 {
            return Err(StoreError::InvalidQuery(
                "max_results must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Oldest write time still in scope, if an age limit is set.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self.max_age {
            None => Ok(None),
            Some(age) => {
                let age = chrono::Duration::from_std(age)
                    .map_err(|e| StoreError::InvalidQuery(format!("max_age: {}", e)))?;
                Ok(Some(now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)))
            }
        }
    }

    /// Score, filter, order and truncate candidate rows.
    ///
    /// Rows qualify when they are not excluded, are newer than the cutoff and
    /// score at or above the threshold. Results are ordered by score
    /// descending, then most recent first, then by key for stability.
    pub fn select<I>(&self, rows: I) -> Result<Vec<SimilarityMatch>, StoreError>
    where
        I: IntoIterator<Item = Result<IssueRecord, StoreError>>,
    {
        let cutoff = self.cutoff(Utc::now())?;
        let mut matches = Vec::new();

        for row in rows {
            let record = row?;
            if self.exclude.as_ref() == Some(&record.key) {
                continue;
            }
            if self.repo.as_ref().is_some_and(|repo| *repo != record.key.repo) {
                continue;
            }
            if let Some(cutoff) = cutoff {
                if record.created_at < cutoff {
                    continue;
                }
            }
            let score = similarity_score(&self.embedding, &record.embedding);
            if score >= self.threshold {
                matches.push(SimilarityMatch {
                    key: record.key,
                    title: record.title,
                    score,
                    created_at: record.created_at,
                });
            }
        }

        matches.sort_by(compare_matches);
        matches.truncate(self.max_results);
        Ok(matches)
    }
}

fn compare_matches(a: &SimilarityMatch, b: &SimilarityMatch) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.key.cmp(&b.key))
}
