//! Deterministic hash-derived embeddings.
//!
//! Each component is taken from the SHA-256 digest of the text, cycling
//! through the 32 digest bytes and mapping each byte into [-1, 1]. The result
//! carries no semantics: identical texts match exactly, anything else is
//! effectively random. Useful offline and wherever tests need a stable
//! embedder without a model download.

use sha2::{Digest, Sha256};

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingModel, ModelInfo};

/// Hash embedder with configurable dimension and input limit.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    info: ModelInfo,
}

impl HashEmbedder {
    /// Create a hash embedder. `max_input_chars` bounds accepted input length.
    pub fn new(dimension: usize, max_input_chars: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::InvalidInput(
                "dimension must be > 0".to_string(),
            ));
        }
        Ok(Self {
            info: ModelInfo {
                name: "sha256-hash".to_string(),
                dimension,
                max_sequence_length: max_input_chars,
            },
        })
    }
}

impl EmbeddingModel for HashEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let length = text.chars().count();
        if length > self.info.max_sequence_length {
            return Err(EmbeddingError::InputTooLong {
                length,
                max: self.info.max_sequence_length,
            });
        }

        let digest = Sha256::digest(text.as_bytes());
        let values: Vec<f32> = (0..self.info.dimension)
            .map(|i| {
                let byte = digest[i % digest.len()];
                (byte as f32 / 255.0) * 2.0 - 1.0
            })
            .collect();

        Ok(Embedding::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_matches_config() {
        let embedder = HashEmbedder::new(384, 1_000).unwrap();
        let emb = embedder.embed("App crashes on startup").unwrap();
        assert_eq!(emb.dimension(), 384);
        assert_eq!(embedder.info().dimension, 384);
    }

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::new(64, 1_000).unwrap();
        let a = embedder.embed("App crashes on startup").unwrap();
        let b = embedder.embed("App crashes on startup").unwrap();
        assert_eq!(a, b);
        assert!((a.cosine_similarity(&b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_different_text_differs() {
        let embedder = HashEmbedder::new(64, 1_000).unwrap();
        let a = embedder.embed("App crashes on startup").unwrap();
        let b = embedder.embed("Add dark mode").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_output_is_normalized() {
        let embedder = HashEmbedder::new(384, 1_000).unwrap();
        let emb = embedder.embed("normalize me").unwrap();
        let norm: f32 = emb.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_over_length_input() {
        let embedder = HashEmbedder::new(16, 10).unwrap();
        let result = embedder.embed("this is longer than ten characters");
        assert!(matches!(
            result,
            Err(EmbeddingError::InputTooLong { max: 10, .. })
        ));
    }

    #[test]
    fn test_embed_issue_uses_joined_text() {
        let embedder = HashEmbedder::new(32, 1_000).unwrap();
        let via_issue = embedder.embed_issue("App crashes", Some("Stack trace")).unwrap();
        let direct = embedder.embed("App crashes Stack trace").unwrap();
        assert_eq!(via_issue, direct);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashEmbedder::new(0, 10).is_err());
    }
}
