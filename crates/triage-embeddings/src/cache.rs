//! Local cache of model files fetched from the HuggingFace Hub.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::EmbeddingError;

/// Sentence-embedding model used when none is configured
pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

/// Files a model needs before it can be loaded
pub const MODEL_FILES: &[&str] = &[CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE];

/// Where one model's files live on disk.
#[derive(Debug, Clone)]
pub struct ModelCache {
    pub cache_dir: PathBuf,
    /// Hub repository, e.g. `sentence-transformers/all-MiniLM-L6-v2`
    pub repo_id: String,
}

impl Default for ModelCache {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("issue-triage")
            .join("models");
        Self::new(cache_dir, DEFAULT_MODEL_REPO)
    }
}

impl ModelCache {
    pub fn new(cache_dir: impl Into<PathBuf>, repo_id: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            repo_id: repo_id.into(),
        }
    }

    /// Directory for this repository. `/` in the repo id becomes `_`.
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join(self.repo_id.replace('/', "_"))
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.model_dir().join(filename)
    }

    pub fn is_cached(&self) -> bool {
        MODEL_FILES.iter().all(|f| self.file_path(f).exists())
    }

    /// Paths of the cached files, whether or not they exist yet.
    pub fn paths(&self) -> ModelPaths {
        ModelPaths {
            config: self.file_path(CONFIG_FILE),
            tokenizer: self.file_path(TOKENIZER_FILE),
            weights: self.file_path(WEIGHTS_FILE),
        }
    }
}

/// Resolved model file locations.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

/// Return cached model files, downloading any that are missing.
pub fn get_or_download_model(cache: &ModelCache) -> Result<ModelPaths, EmbeddingError> {
    if cache.is_cached() {
        debug!(path = ?cache.model_dir(), "Model files already cached");
    } else {
        info!(repo = %cache.repo_id, "Fetching model from HuggingFace Hub");
        download(cache)?;
    }
    Ok(cache.paths())
}

fn download(cache: &ModelCache) -> Result<(), EmbeddingError> {
    let api = hf_hub::api::sync::Api::new().map_err(|e| EmbeddingError::Download(e.to_string()))?;
    let repo = api.model(cache.repo_id.clone());
    std::fs::create_dir_all(cache.model_dir())?;

    for filename in MODEL_FILES {
        let dest = cache.file_path(filename);
        if dest.exists() {
            continue;
        }
        let fetched = repo
            .get(filename)
            .map_err(|e| EmbeddingError::Download(format!("{}: {}", filename, e)))?;
        std::fs::copy(&fetched, &dest)?;
        debug!(file = filename, dest = ?dest, "Cached");
    }
    Ok(())
}
