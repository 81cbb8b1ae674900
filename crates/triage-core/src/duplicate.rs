//! Duplicate detection.
//!
//! [`DuplicateVerdict::from_matches`] is the only place that decides what a
//! similarity score means. The store returns candidates; the verdict says
//! whether any of them make the issue a duplicate.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use triage_embeddings::{Embedding, EmbeddingModel};
use triage_types::{DuplicateSettings, IssueKey, SimilarityMatch};
use triage_vector::{SimilarityQuery, StoreHandle};

use crate::error::PipelineError;

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    /// Qualifying matches, best first
    pub matches: Vec<SimilarityMatch>,
    /// Threshold the matches were held against
    pub threshold: f32,
}

impl DuplicateVerdict {
    /// Build a verdict from store results.
    ///
    /// Matches below `threshold` are dropped. The remainder keep the store's
    /// order among equal scores.
    pub fn from_matches(mut matches: Vec<SimilarityMatch>, threshold: f32) -> Self {
        matches.retain(|m| m.score >= threshold);
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self {
            is_duplicate: !matches.is_empty(),
            matches,
            threshold,
        }
    }

    /// Highest-scoring match, kept for audit in comments and reports.
    pub fn top_match(&self) -> Option<&SimilarityMatch> {
        self.matches.first()
    }
}

/// Query parameters for duplicate checks.
#[derive(Debug, Clone)]
pub struct DuplicateConfig {
    pub threshold: f32,
    pub max_results: usize,
    pub max_age: Option<Duration>,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self::from(&DuplicateSettings::default())
    }
}

impl From<&DuplicateSettings> for DuplicateConfig {
    fn from(settings: &DuplicateSettings) -> Self {
        Self {
            threshold: settings.threshold,
            max_results: settings.max_results,
            max_age: settings
                .max_age_days
                .map(|days| Duration::from_secs(u64::from(days) * 24 * 60 * 60)),
        }
    }
}

/// Embeds issues and checks them against the store.
#[derive(Clone)]
pub struct DuplicateDetector {
    embedder: Arc<dyn EmbeddingModel>,
    store: StoreHandle,
    config: DuplicateConfig,
}

impl DuplicateDetector {
    pub fn new(embedder: Arc<dyn EmbeddingModel>, store: StoreHandle, config: DuplicateConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    pub fn config(&self) -> &DuplicateConfig {
        &self.config
    }

    /// Embed an issue on the blocking pool.
    pub async fn embed(&self, title: &str, body: Option<&str>) -> Result<Embedding, PipelineError> {
        let embedder = Arc::clone(&self.embedder);
        let title = title.to_string();
        let body = body.map(str::to_string);

        let embedding = tokio::task::spawn_blocking(move || embedder.embed_issue(&title, body.as_deref()))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;

        if embedding.dimension() != self.store.dimension() {
            return Err(triage_vector::StoreError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: embedding.dimension(),
            }
            .into());
        }
        Ok(embedding)
    }

    /// Query the store for issues similar to `embedding`, never matching `key` itself.
    pub async fn check(&self, key: &IssueKey, embedding: &Embedding) -> Result<DuplicateVerdict, PipelineError> {
        let query = SimilarityQuery::from_embedding(embedding)
            .with_threshold(self.config.threshold)
            .with_max_results(self.config.max_results)
            .with_max_age(self.config.max_age)
            .excluding(key.clone());

        let matches = self.store.find_similar(query).await?;
        let verdict = DuplicateVerdict::from_matches(matches, self.config.threshold);

        match verdict.top_match() {
            Some(top) => info!(
                issue = %key,
                duplicate_of = %top.key,
                score = top.score,
                "Possible duplicate found"
            ),
            None => debug!(issue = %key, "No similar issues found"),
        }
        Ok(verdict)
    }

    /// Embed and check in one call.
    pub async fn check_issue(
        &self,
        key: &IssueKey,
        title: &str,
        body: Option<&str>,
    ) -> Result<(Embedding, DuplicateVerdict), PipelineError> {
        let embedding = self.embed(title, body).await?;
        let verdict = self.check(key, &embedding).await?;
        Ok((embedding, verdict))
    }
}
