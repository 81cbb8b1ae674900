//! Configuration loading for issue-triage.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/issue-triage/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::TriageError;

/// Which embedding implementation to load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// all-MiniLM-L6-v2 via Candle (downloads model on first use)
    #[default]
    Candle,
    /// Deterministic hash-derived vectors (offline, no semantics)
    Hash,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Vector dimension. Must match the model; changing the model changes this.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// HuggingFace repository for the Candle model
    #[serde(default = "default_model_repo")]
    pub model_repo: String,

    /// Model cache directory (defaults to the platform cache dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,

    /// Maximum input length in characters for the hash provider
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_dimension() -> usize {
    384
}

fn default_model_repo() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_max_input_chars() -> usize {
    16_384
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            dimension: default_dimension(),
            model_repo: default_model_repo(),
            cache_dir: None,
            max_input_chars: default_max_input_chars(),
        }
    }
}

/// Duplicate detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateSettings {
    /// Similarity at or above which a stored issue counts as a duplicate.
    /// Range: 0.0-1.0, higher = stricter.
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Maximum number of candidates surfaced per check.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Only compare against issues written within this many days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
}

fn default_threshold() -> f32 {
    0.85
}

fn default_max_results() -> usize {
    5
}

impl Default for DuplicateSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_results: default_max_results(),
            max_age_days: None,
        }
    }
}

/// Search path used by the similarity store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Brute-force cosine over every stored row
    Exact,
    /// HNSW candidates, then exact filtering and ranking
    Approximate,
    /// Exact below `exact_search_limit` rows, approximate above
    #[default]
    Auto,
}

/// Similarity store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Upper bound for any single store call (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long to keep retrying while another process holds the store (ms)
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    #[serde(default)]
    pub search_strategy: SearchStrategy,

    /// Row count below which `auto` uses exact search
    #[serde(default = "default_exact_search_limit")]
    pub exact_search_limit: usize,

    /// HNSW over-fetch factor applied to max_results
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    #[serde(default = "default_hnsw_connectivity")]
    pub hnsw_connectivity: usize,

    #[serde(default = "default_hnsw_expansion_add")]
    pub hnsw_expansion_add: usize,

    #[serde(default = "default_hnsw_expansion_search")]
    pub hnsw_expansion_search: usize,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_lock_wait_ms() -> u64 {
    30_000
}

fn default_exact_search_limit() -> usize {
    10_000
}

fn default_candidate_multiplier() -> usize {
    4
}

fn default_hnsw_connectivity() -> usize {
    16
}

fn default_hnsw_expansion_add() -> usize {
    200
}

fn default_hnsw_expansion_search() -> usize {
    100
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            lock_wait_ms: default_lock_wait_ms(),
            search_strategy: SearchStrategy::default(),
            exact_search_limit: default_exact_search_limit(),
            candidate_multiplier: default_candidate_multiplier(),
            hnsw_connectivity: default_hnsw_connectivity(),
            hnsw_expansion_add: default_hnsw_expansion_add(),
            hnsw_expansion_search: default_hnsw_expansion_search(),
        }
    }
}

/// Retry policy for transient store failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval_ms() -> u64 {
    200
}

fn default_max_elapsed_ms() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

/// One label and the keywords that vote for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelRule {
    pub label: String,
    pub keywords: Vec<String>,
}

impl LabelRule {
    pub fn new(label: &str, keywords: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Keyword classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Minimum normalized keyword score for a label to apply
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    #[serde(default = "default_label_rules")]
    pub labels: Vec<LabelRule>,

    /// Keywords that escalate an issue to P0
    #[serde(default = "default_critical_keywords")]
    pub critical_keywords: Vec<String>,

    /// Keywords that escalate an issue to P1
    #[serde(default = "default_high_keywords")]
    pub high_keywords: Vec<String>,

    /// Labels that, when they are the only ones applied, lower priority to P3
    #[serde(default = "default_low_priority_labels")]
    pub low_priority_labels: Vec<String>,
}

fn default_min_confidence() -> f32 {
    0.6
}

fn default_label_rules() -> Vec<LabelRule> {
    vec![
        LabelRule::new(
            "bug",
            &["error", "crash", "broken", "fail", "exception", "bug"],
        ),
        LabelRule::new(
            "feature",
            &["feature", "enhancement", "add", "support", "implement"],
        ),
        LabelRule::new(
            "docs",
            &["documentation", "docs", "readme", "guide", "tutorial"],
        ),
        LabelRule::new("question", &["how", "why", "question", "help", "confused"]),
        LabelRule::new(
            "performance",
            &["slow", "performance", "lag", "optimize", "speed"],
        ),
        LabelRule::new(
            "security",
            &["security", "vulnerability", "exploit", "CVE"],
        ),
    ]
}

fn default_critical_keywords() -> Vec<String> {
    ["security", "vulnerability", "exploit", "data loss", "outage", "cve"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_high_keywords() -> Vec<String> {
    ["crash", "broken", "fail", "exception", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_low_priority_labels() -> Vec<String> {
    vec!["docs".to_string(), "question".to_string()]
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            labels: default_label_rules(),
            critical_keywords: default_critical_keywords(),
            high_keywords: default_high_keywords(),
            low_priority_labels: default_low_priority_labels(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB issue store directory
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub duplicate: DuplicateSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub classifier: ClassifierSettings,
}

fn default_store_path() -> String {
    ProjectDirs::from("", "", "issue-triage")
        .map(|p| p.data_local_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from("./triage-store"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            log_level: default_log_level(),
            embedding: EmbeddingSettings::default(),
            duplicate: DuplicateSettings::default(),
            store: StoreSettings::default(),
            retry: RetrySettings::default(),
            classifier: ClassifierSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/issue-triage/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (TRIAGE_*, nested sections joined by `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, TriageError> {
        let config_dir = ProjectDirs::from("", "", "issue-triage")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let defaults = Config::try_from(&Settings::default())
            .map_err(|e| TriageError::Config(e.to_string()))?;

        let mut builder = Config::builder()
            // 1. Built-in defaults
            .add_source(defaults)
            // 2. Default config file
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        // 3. CLI-specified config file (higher precedence than default)
        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 4. Environment variables
        // Format: TRIAGE_STORE_PATH, TRIAGE_DUPLICATE__THRESHOLD, TRIAGE_STORE__TIMEOUT_MS
        builder = builder.add_source(
            Environment::with_prefix("TRIAGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| TriageError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| TriageError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), TriageError> {
        if !(0.0..=1.0).contains(&self.duplicate.threshold) {
            return Err(TriageError::Config(format!(
                "duplicate.threshold must be 0.0-1.0, got {}",
                self.duplicate.threshold
            )));
        }
        if self.duplicate.max_results == 0 {
            return Err(TriageError::Config(
                "duplicate.max_results must be > 0".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(TriageError::Config(
                "embedding.dimension must be > 0".to_string(),
            ));
        }
        if self.store.timeout_ms == 0 {
            return Err(TriageError::Config(
                "store.timeout_ms must be > 0".to_string(),
            ));
        }
        if self.store.candidate_multiplier == 0 {
            return Err(TriageError::Config(
                "store.candidate_multiplier must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier.min_confidence) {
            return Err(TriageError::Config(format!(
                "classifier.min_confidence must be 0.0-1.0, got {}",
                self.classifier.min_confidence
            )));
        }
        Ok(())
    }

    /// Expand ~ in store_path to the home directory
    pub fn expanded_store_path(&self) -> PathBuf {
        if let Some(rest) = self.store_path.strip_prefix("~/") {
            if let Some(base) = directories::BaseDirs::new() {
                return base.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.store_path)
    }

    /// Model cache directory, falling back to the platform cache dir.
    pub fn model_cache_dir(&self) -> PathBuf {
        match &self.embedding.cache_dir {
            Some(dir) => PathBuf::from(dir),
            None => directories::BaseDirs::new()
                .map(|b| b.cache_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("issue-triage")
                .join("models"),
        }
    }
}
