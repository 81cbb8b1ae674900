//! End-to-end test infrastructure for issue-triage.
//!
//! Provides a shared TestHarness over a real RocksDB-backed store, vector
//! helpers for building embeddings at a chosen similarity, and in-process
//! fakes for the issue tracker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use triage_core::{
    DuplicateConfig, DuplicateDetector, Issue, IssueSink, IssueSource, KeywordClassifier,
    MemoryWriter, PipelineError, RetryPolicy, TriagePipeline,
};
use triage_embeddings::{issue_text, Embedding, EmbeddingError, EmbeddingModel, ModelInfo};
use triage_types::{IssueKey, IssueRecord, SearchStrategy};
use triage_vector::{RocksSimilarityStore, RocksStoreConfig, StoreHandle};

/// Embedding dimension used across the E2E suite
pub const DIMENSION: usize = 32;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub store: Arc<RocksSimilarityStore>,
    pub handle: StoreHandle,
}

impl TestHarness {
    /// Harness with the default (auto) search strategy.
    pub fn new() -> Self {
        Self::with_strategy(SearchStrategy::Auto)
    }

    pub fn with_strategy(strategy: SearchStrategy) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let config = RocksStoreConfig::new(temp_dir.path().join("store"), DIMENSION)
            .with_search_strategy(strategy);
        let store =
            Arc::new(RocksSimilarityStore::open(config).expect("Failed to open test store"));
        let handle = StoreHandle::new(store.clone(), Duration::from_secs(5));

        Self {
            _temp_dir: temp_dir,
            store,
            handle,
        }
    }

    /// Upsert records through the async handle.
    pub async fn seed(&self, records: &[IssueRecord]) {
        for record in records {
            self.handle
                .upsert(record.clone())
                .await
                .expect("Failed to seed record");
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Random unit vector of `dimension` components.
pub fn random_unit_vector(rng: &mut impl Rng, dimension: usize) -> Vec<f32> {
    loop {
        let values: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 1e-3 {
            return values.into_iter().map(|v| v / norm).collect();
        }
    }
}

/// Unit vector whose cosine similarity to `base` is exactly `similarity`.
///
/// Mixes the normalized base with a random direction orthogonal to it.
pub fn vector_at_similarity(rng: &mut impl Rng, base: &[f32], similarity: f32) -> Vec<f32> {
    let base_norm = base.iter().map(|v| v * v).sum::<f32>().sqrt();
    let unit: Vec<f32> = base.iter().map(|v| v / base_norm).collect();

    let orthogonal = loop {
        let candidate = random_unit_vector(rng, unit.len());
        let dot: f32 = candidate.iter().zip(&unit).map(|(c, u)| c * u).sum();
        let residual: Vec<f32> = candidate.iter().zip(&unit).map(|(c, u)| c - dot * u).collect();
        let norm = residual.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 1e-3 {
            break residual.into_iter().map(|v| v / norm).collect::<Vec<f32>>();
        }
    };

    let sine = (1.0 - similarity * similarity).max(0.0).sqrt();
    unit.iter()
        .zip(&orthogonal)
        .map(|(u, o)| similarity * u + sine * o)
        .collect()
}

/// Record in `acme/app` with the given number, title and embedding.
pub fn issue_record(number: u64, title: &str, embedding: Vec<f32>) -> IssueRecord {
    IssueRecord::new(
        IssueKey::new("acme/app", number).expect("valid key"),
        title,
        embedding,
    )
}

/// Embedder returning preassigned vectors for known issue texts.
pub struct FixedEmbedder {
    info: ModelInfo,
    vectors: HashMap<String, Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            info: ModelInfo {
                name: "fixed".to_string(),
                dimension,
                max_sequence_length: 10_000,
            },
            vectors: HashMap::new(),
        }
    }

    /// Assign `vector` to the issue with this title and body.
    pub fn with_issue(mut self, title: &str, body: Option<&str>, vector: Vec<f32>) -> Self {
        self.vectors.insert(issue_text(title, body), vector);
        self
    }
}

impl EmbeddingModel for FixedEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.vectors
            .get(text)
            .map(|values| Embedding::new(values.clone()))
            .ok_or_else(|| EmbeddingError::InvalidInput(format!("no vector for {:?}", text)))
    }
}

/// Issue source backed by a map.
#[derive(Default)]
pub struct InMemoryIssueSource {
    issues: HashMap<IssueKey, Issue>,
}

impl InMemoryIssueSource {
    pub fn new(issues: Vec<Issue>) -> Self {
        let issues = issues
            .into_iter()
            .map(|issue| (issue.key().expect("valid issue key"), issue))
            .collect();
        Self { issues }
    }
}

#[async_trait]
impl IssueSource for InMemoryIssueSource {
    async fn fetch(&self, key: &IssueKey) -> Result<Issue, PipelineError> {
        self.issues
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::Source(format!("unknown issue {}", key)))
    }
}

/// Sink that records every application.
#[derive(Default)]
pub struct RecordingSink {
    pub applied: Mutex<Vec<(IssueKey, Vec<String>, String)>>,
}

#[async_trait]
impl IssueSink for RecordingSink {
    async fn apply(&self, key: &IssueKey, labels: &[String], comment: &str) -> Result<(), PipelineError> {
        self.applied
            .lock()
            .expect("sink lock")
            .push((key.clone(), labels.to_vec(), comment.to_string()));
        Ok(())
    }
}

/// Issue in `acme/app`.
pub fn issue(number: u64, title: &str, body: Option<&str>) -> Issue {
    Issue {
        repo: "acme/app".to_string(),
        number,
        title: title.to_string(),
        body: body.map(str::to_string),
        labels: Vec::new(),
    }
}

/// Pipeline over the harness store with the default keyword classifier.
pub fn build_pipeline(
    harness: &TestHarness,
    embedder: Arc<dyn EmbeddingModel>,
    source: Arc<dyn IssueSource>,
    sink: Arc<dyn IssueSink>,
) -> TriagePipeline {
    let detector = DuplicateDetector::new(
        embedder,
        harness.handle.clone(),
        DuplicateConfig {
            threshold: 0.85,
            max_results: 5,
            max_age: None,
        },
    );
    TriagePipeline::new(
        source,
        sink,
        Arc::new(KeywordClassifier::default()),
        detector,
        MemoryWriter::new(harness.handle.clone()),
    )
    .with_retry_policy(RetryPolicy::none())
}
