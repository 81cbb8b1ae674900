//! # triage-embeddings
//!
//! Embedding generation for issue title and body text.
//!
//! Turns an issue into a fixed-length vector so that near-duplicate reports
//! land close together in cosine space.
//!
//! ## Features
//! - Local inference via Candle (no Python, no API)
//! - all-MiniLM-L6-v2 model (384 dimensions)
//! - Automatic model file caching
//! - Deterministic hash embedder for offline runs and tests
//! - Over-length input is rejected, never silently truncated

pub mod cache;
pub mod candle;
pub mod error;
pub mod hash;
pub mod model;

pub use crate::candle::CandleEmbedder;
pub use cache::{get_or_download_model, ModelCache, ModelPaths, DEFAULT_MODEL_REPO, MODEL_FILES};
pub use error::EmbeddingError;
pub use hash::HashEmbedder;
pub use model::{issue_text, Embedding, EmbeddingModel, ModelInfo};
