//! Full triage pipeline against the RocksDB-backed store.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

use e2e_tests::{
    build_pipeline, issue, random_unit_vector, vector_at_similarity, FixedEmbedder,
    InMemoryIssueSource, RecordingSink, TestHarness, DIMENSION,
};
use triage_core::DUPLICATE_LABEL;
use triage_types::{IssueKey, Priority};

#[tokio::test]
async fn test_second_report_is_flagged_and_both_are_remembered() {
    let harness = TestHarness::new();
    let mut rng = StdRng::seed_from_u64(42);
    let base = random_unit_vector(&mut rng, DIMENSION);

    let first = issue(1, "Login page crashes on submit", Some("Stack trace attached"));
    let second = issue(2, "Crash when submitting login", None);
    let embedder = FixedEmbedder::new(DIMENSION)
        .with_issue(&first.title, first.body.as_deref(), base.clone())
        .with_issue(&second.title, None, vector_at_similarity(&mut rng, &base, 0.92));

    let sink = Arc::new(RecordingSink::default());
    let pipeline = build_pipeline(
        &harness,
        Arc::new(embedder),
        Arc::new(InMemoryIssueSource::new(vec![first, second])),
        sink.clone(),
    );

    let first_key = IssueKey::new("acme/app", 1).unwrap();
    let second_key = IssueKey::new("acme/app", 2).unwrap();

    let report = pipeline.triage(&first_key).await.unwrap();
    assert!(!report.verdict.is_duplicate);
    assert!(report.labels.contains(&"bug".to_string()));
    assert!(!report.labels.contains(&DUPLICATE_LABEL.to_string()));

    let report = pipeline.triage(&second_key).await.unwrap();
    assert!(report.verdict.is_duplicate);
    assert_eq!(report.verdict.top_match().unwrap().key, first_key);
    assert!(report.labels.contains(&DUPLICATE_LABEL.to_string()));
    assert!(report.comment.contains("possible duplicate of acme/app#1"));

    assert_eq!(harness.handle.count().await.unwrap(), 2);
    let stored = harness.handle.get(second_key.clone()).await.unwrap().unwrap();
    assert_eq!(stored.labels, report.labels);
    assert_eq!(stored.priority, Some(report.priority));

    let applied = sink.applied.lock().unwrap();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[1].0, second_key);
    assert!(applied[1].2.starts_with("## Triage summary"));
}

#[tokio::test]
async fn test_retriage_is_idempotent_per_issue() {
    let harness = TestHarness::new();
    let mut rng = StdRng::seed_from_u64(8);

    let crash = issue(3, "Security vulnerability: CVE in auth", None);
    let docs = issue(4, "Typo in README docs", None);
    let embedder = FixedEmbedder::new(DIMENSION)
        .with_issue(&crash.title, None, random_unit_vector(&mut rng, DIMENSION))
        .with_issue(&docs.title, None, random_unit_vector(&mut rng, DIMENSION));

    let sink = Arc::new(RecordingSink::default());
    let pipeline = build_pipeline(
        &harness,
        Arc::new(embedder),
        Arc::new(InMemoryIssueSource::new(vec![crash, docs])),
        sink.clone(),
    );

    let keys = vec![
        IssueKey::new("acme/app", 3).unwrap(),
        IssueKey::new("acme/app", 4).unwrap(),
    ];
    let first = pipeline.retriage_all(&keys).await;
    let second = pipeline.retriage_all(&keys).await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(harness.handle.count().await.unwrap(), 2);

    // Excluding the issue's own key keeps a re-run from flagging itself.
    assert!(second.triaged.iter().all(|r| !r.verdict.is_duplicate));

    let security = harness.handle.get(keys[0].clone()).await.unwrap().unwrap();
    assert_eq!(security.priority, Some(Priority::P0));
}

#[tokio::test]
async fn test_failed_issue_does_not_stop_the_batch() {
    let harness = TestHarness::new();
    let mut rng = StdRng::seed_from_u64(13);

    let known = issue(10, "Feature request: export to CSV", None);
    let embedder = FixedEmbedder::new(DIMENSION).with_issue(
        &known.title,
        None,
        random_unit_vector(&mut rng, DIMENSION),
    );

    let sink = Arc::new(RecordingSink::default());
    let pipeline = build_pipeline(
        &harness,
        Arc::new(embedder),
        Arc::new(InMemoryIssueSource::new(vec![known])),
        sink.clone(),
    );

    let missing = IssueKey::new("acme/app", 11).unwrap();
    let keys = vec![missing.clone(), IssueKey::new("acme/app", 10).unwrap()];
    let summary = pipeline.retriage_all(&keys).await;

    assert!(!summary.is_success());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, missing);
    assert_eq!(summary.triaged.len(), 1);

    // Nothing is stored or applied for the failed issue.
    assert!(harness.handle.get(missing).await.unwrap().is_none());
    assert_eq!(sink.applied.lock().unwrap().len(), 1);
}
