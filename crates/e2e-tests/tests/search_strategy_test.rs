//! Exact and approximate search agreement, plus handle timeouts.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

use e2e_tests::{issue_record, random_unit_vector, vector_at_similarity, TestHarness, DIMENSION};
use triage_core::{with_retry, PipelineError, RetryPolicy};
use triage_types::{IssueKey, IssueRecord, SearchStrategy, SimilarityMatch};
use triage_vector::{
    RocksSimilarityStore, SimilarityQuery, SimilarityStore, StoreError, StoreHandle,
};

fn corpus(seed: u64) -> (Vec<f32>, Vec<IssueRecord>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let base = random_unit_vector(&mut rng, DIMENSION);

    let mut records = Vec::new();
    for (i, similarity) in [0.98, 0.94, 0.9, 0.86, 0.8, 0.6].iter().enumerate() {
        records.push(issue_record(
            i as u64 + 1,
            &format!("Near {}", i + 1),
            vector_at_similarity(&mut rng, &base, *similarity),
        ));
    }
    for i in 0..40 {
        records.push(issue_record(
            100 + i,
            &format!("Noise {}", i),
            random_unit_vector(&mut rng, DIMENSION),
        ));
    }
    (base, records)
}

fn keys(matches: &[SimilarityMatch]) -> BTreeSet<IssueKey> {
    matches.iter().map(|m| m.key.clone()).collect()
}

#[tokio::test]
async fn test_exact_and_approximate_return_same_set() {
    let (base, records) = corpus(2024);
    let exact = TestHarness::with_strategy(SearchStrategy::Exact);
    let approximate = TestHarness::with_strategy(SearchStrategy::Approximate);
    exact.seed(&records).await;
    approximate.seed(&records).await;

    for threshold in [0.95, 0.85, 0.75] {
        let query = SimilarityQuery::new(base.clone())
            .with_threshold(threshold)
            .with_max_results(10);

        let from_exact = exact.handle.find_similar(query.clone()).await.unwrap();
        let from_approximate = approximate.handle.find_similar(query).await.unwrap();

        assert_eq!(keys(&from_exact), keys(&from_approximate), "threshold {}", threshold);
        for (e, a) in from_exact.iter().zip(&from_approximate) {
            assert_eq!(e.key, a.key);
            assert!((e.score - a.score).abs() < 1e-3);
        }
    }
}

#[tokio::test]
async fn test_approximate_respects_exclusion_and_limit() {
    let (base, records) = corpus(77);
    let harness = TestHarness::with_strategy(SearchStrategy::Approximate);
    harness.seed(&records).await;

    let excluded = IssueKey::new("acme/app", 1).unwrap();
    let query = SimilarityQuery::new(base)
        .with_threshold(0.85)
        .with_max_results(2)
        .excluding(excluded.clone());
    let matches = harness.handle.find_similar(query).await.unwrap();

    assert_eq!(matches.len(), 2);
    assert!(matches.iter().all(|m| m.key != excluded));
    assert_eq!(matches[0].key, IssueKey::new("acme/app", 2).unwrap());
    assert!(matches[0].score >= matches[1].score);
}

/// Delegates to the Rocks store after sleeping.
struct SlowStore {
    inner: Arc<RocksSimilarityStore>,
    delay: Duration,
}

impl SimilarityStore for SlowStore {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn upsert(&self, record: &IssueRecord) -> Result<(), StoreError> {
        std::thread::sleep(self.delay);
        self.inner.upsert(record)
    }

    fn find_similar(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityMatch>, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.find_similar(query)
    }

    fn get(&self, key: &IssueKey) -> Result<Option<IssueRecord>, StoreError> {
        self.inner.get(key)
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.inner.count()
    }
}

#[tokio::test]
async fn test_slow_search_times_out() {
    let harness = TestHarness::new();
    let slow = StoreHandle::new(
        Arc::new(SlowStore {
            inner: harness.store.clone(),
            delay: Duration::from_millis(300),
        }),
        Duration::from_millis(20),
    );

    let mut rng = StdRng::seed_from_u64(1);
    let query = SimilarityQuery::new(random_unit_vector(&mut rng, DIMENSION));
    let result = slow.find_similar(query).await;

    assert!(matches!(result, Err(StoreError::Timeout(_))));
    // Fast calls on the same handle still succeed.
    assert_eq!(slow.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_timeouts_are_retried_then_reported() {
    let harness = TestHarness::new();
    let slow = StoreHandle::new(
        Arc::new(SlowStore {
            inner: harness.store.clone(),
            delay: Duration::from_millis(200),
        }),
        Duration::from_millis(10),
    );
    let policy = RetryPolicy {
        max_attempts: 2,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        max_elapsed: Duration::from_secs(5),
    };

    let mut rng = StdRng::seed_from_u64(2);
    let query = SimilarityQuery::new(random_unit_vector(&mut rng, DIMENSION));
    let result = with_retry(&policy, "find_similar", || slow.find_similar(query.clone())).await;

    match result {
        Err(e @ PipelineError::Store(StoreError::Timeout(_))) => assert!(e.is_retryable()),
        other => panic!("expected timeout, got {:?}", other),
    }
}
