//! Command implementations for issue-triage.
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;

use triage_core::{
    with_retry, Classification, DuplicateConfig, DuplicateDetector, IssueClassifier, IssueSink,
    IssueSource, KeywordClassifier, MemoryWriter, PipelineError, RetryPolicy, TriagePipeline,
};
use triage_embeddings::{CandleEmbedder, EmbeddingModel, HashEmbedder, ModelCache};
use triage_types::{EmbeddingProvider, IssueKey, IssueRecord, Priority, Settings};
use triage_vector::{
    RocksSimilarityStore, RocksStoreConfig, SimilarityQuery, SimilarityStore, StoreHandle,
};

use crate::cli::Cli;
use crate::io::{JsonFileIssueSource, StdoutIssueSink};

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(store_path) = &cli.store_path {
        settings.store_path = store_path.clone();
    }
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn load_embedder(settings: &Settings) -> Result<Arc<dyn EmbeddingModel>> {
    let embedder: Arc<dyn EmbeddingModel> = match settings.embedding.provider {
        EmbeddingProvider::Candle => {
            let cache = ModelCache::new(settings.model_cache_dir(), settings.embedding.model_repo.clone());
            Arc::new(CandleEmbedder::load(&cache).context("Failed to load embedding model")?)
        }
        EmbeddingProvider::Hash => Arc::new(
            HashEmbedder::new(settings.embedding.dimension, settings.embedding.max_input_chars)
                .context("Invalid hash embedder settings")?,
        ),
    };

    let dimension = embedder.info().dimension;
    if dimension != settings.embedding.dimension {
        bail!(
            "Model {} produces {}-dimensional vectors but embedding.dimension is {}",
            embedder.info().name,
            dimension,
            settings.embedding.dimension
        );
    }
    Ok(embedder)
}

/// Open the store, waiting up to `store.lock_wait_ms` while another
/// invocation holds it.
async fn open_store(settings: &Settings) -> Result<Arc<RocksSimilarityStore>> {
    let config = RocksStoreConfig::from_settings(settings);
    let policy = RetryPolicy::from(&settings.retry)
        .until_elapsed(Duration::from_millis(settings.store.lock_wait_ms));
    info!(path = ?config.path, "Opening issue store");

    let store = with_retry(&policy, "open", || {
        let config = config.clone();
        async move {
            tokio::task::spawn_blocking(move || RocksSimilarityStore::open(config))
                .await
                .map_err(|e| PipelineError::Task(e.to_string()))?
                .map_err(PipelineError::from)
        }
    })
    .await
    .context("Failed to open issue store")?;
    Ok(Arc::new(store))
}

fn store_handle(settings: &Settings, store: Arc<RocksSimilarityStore>) -> StoreHandle {
    StoreHandle::new(store, Duration::from_millis(settings.store.timeout_ms))
}

fn build_pipeline(
    settings: &Settings,
    embedder: Arc<dyn EmbeddingModel>,
    source: Arc<dyn IssueSource>,
    store: StoreHandle,
) -> TriagePipeline {
    let detector = DuplicateDetector::new(
        embedder,
        store.clone(),
        DuplicateConfig::from(&settings.duplicate),
    );
    let sink: Arc<dyn IssueSink> = Arc::new(StdoutIssueSink::new());
    let classifier: Arc<dyn IssueClassifier> = Arc::new(KeywordClassifier::new(&settings.classifier));

    TriagePipeline::new(source, sink, classifier, detector, MemoryWriter::new(store))
        .with_retry_policy(RetryPolicy::from(&settings.retry))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Triage the single issue in `issue_file`.
pub async fn handle_triage(settings: &Settings, issue_file: &Path) -> Result<()> {
    let source = JsonFileIssueSource::from_file(issue_file)?;
    let key = match source.keys() {
        [key] => key.clone(),
        keys => bail!(
            "Expected one issue in {:?}, found {}; use retriage-all for several",
            issue_file,
            keys.len()
        ),
    };

    let embedder = load_embedder(settings)?;
    let store = store_handle(settings, open_store(settings).await?);
    let pipeline = build_pipeline(settings, embedder, Arc::new(source), store.clone());

    let report = pipeline.triage(&key).await.context("Triage failed")?;
    store.flush().await.context("Failed to save vector index")?;
    drop(pipeline);
    drop(store);
    print_json(&report)
}

/// Triage every issue in `issues_file`, continuing past failures.
pub async fn handle_retriage_all(settings: &Settings, issues_file: &Path) -> Result<()> {
    let source = JsonFileIssueSource::from_file(issues_file)?;
    let keys = source.keys().to_vec();
    info!(count = keys.len(), "Retriaging issues");

    let embedder = load_embedder(settings)?;
    let store = store_handle(settings, open_store(settings).await?);
    let pipeline = build_pipeline(settings, embedder, Arc::new(source), store.clone());

    let summary = pipeline.retriage_all(&keys).await;
    store.flush().await.context("Failed to save vector index")?;
    drop(pipeline);
    drop(store);
    print_json(&summary)?;

    if !summary.is_success() {
        bail!("{} of {} issues failed", summary.failed.len(), keys.len());
    }
    Ok(())
}

/// Store an issue in memory without classification side effects.
pub async fn handle_store(
    settings: &Settings,
    repo: &str,
    number: u64,
    title: &str,
    body: Option<&str>,
    labels: Vec<String>,
    priority: Option<&str>,
) -> Result<()> {
    let key = IssueKey::new(repo, number)?;
    let priority = priority.map(str::parse::<Priority>).transpose()?;

    let embedder = load_embedder(settings)?;
    let embedding = embedder
        .embed_issue(title, body)
        .context("Failed to embed issue")?;

    let store = open_store(settings).await?;
    let record = IssueRecord::new(key.clone(), title, embedding.into_values())
        .with_body(body.map(str::to_string))
        .with_labels(labels)
        .with_priority(priority);
    store.upsert(&record).context("Failed to store issue")?;
    store.flush().context("Failed to save vector index")?;
    drop(store);

    print_json(&json!({
        "command": "store",
        "issue": key.to_string(),
        "title": record.title,
        "labels": record.labels,
        "priority": record.priority,
        "embedding_dimension": record.embedding.len(),
        "stored": true,
    }))
}

/// Search stored issues similar to `text`.
pub async fn handle_search(
    settings: &Settings,
    text: &str,
    threshold: Option<f32>,
    max_results: Option<usize>,
    max_age_days: Option<u32>,
    repo: Option<String>,
) -> Result<()> {
    let mut duplicate = settings.duplicate.clone();
    if let Some(threshold) = threshold {
        duplicate.threshold = threshold;
    }
    if let Some(max_results) = max_results {
        duplicate.max_results = max_results;
    }
    if max_age_days.is_some() {
        duplicate.max_age_days = max_age_days;
    }
    let config = DuplicateConfig::from(&duplicate);

    let embedder = load_embedder(settings)?;
    let embedding = embedder.embed(text).context("Failed to embed query")?;

    let store = store_handle(settings, open_store(settings).await?);
    let query = SimilarityQuery::from_embedding(&embedding)
        .with_threshold(config.threshold)
        .with_max_results(config.max_results)
        .with_max_age(config.max_age)
        .in_repo(repo);
    let matches = store.find_similar(query).await.context("Search failed")?;

    print_json(&json!({
        "command": "search",
        "query": text,
        "threshold": config.threshold,
        "matches": matches,
    }))
}

/// Classify by keywords. Returns whether any label matched.
pub fn handle_classify(settings: &Settings, title: &str, body: Option<&str>) -> Result<bool> {
    let classifier = KeywordClassifier::new(&settings.classifier);
    let result: Classification = classifier.classify_text(title, body);
    print_json(&result)?;
    Ok(!result.labels.is_empty())
}

/// Print store statistics.
pub async fn handle_stats(settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let stats = store.stats().context("Failed to read store statistics")?;
    print_json(&stats)
}
