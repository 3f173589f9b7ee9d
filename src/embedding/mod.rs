//! Embedding clients producing the image and description vectors of a product.

mod jina;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use jina::JinaEmbedder;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// HTTP layer failed before a usable response arrived.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Returned vector length does not match the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured at startup.
        expected: usize,
        /// Dimension actually returned.
        actual: usize,
    },
}

/// Image and description vectors for one product.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingPair {
    /// Vector computed from the product image.
    pub image: Vec<f32>,
    /// Vector computed from the rendered description.
    pub description: Vec<f32>,
}

impl EmbeddingPair {
    /// Check both vectors against the configured dimension.
    pub fn validate(&self, expected: usize) -> Result<(), EmbeddingError> {
        for actual in [self.image.len(), self.description.len()] {
            if actual != expected {
                return Err(EmbeddingError::DimensionMismatch { expected, actual });
            }
        }
        Ok(())
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed the description `text` and the image found at `image_ref`.
    async fn embed(&self, text: &str, image_ref: &str) -> Result<EmbeddingPair, EmbeddingError>;

    /// Dimension of every vector this embedder returns.
    fn dimension(&self) -> usize;
}

/// Deterministic embedder that hashes input bytes into a normalized vector.
///
/// Useful for offline runs and tests; the image vector is derived from the image reference,
/// not the pixels.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Construct a hashing embedder producing vectors of `dimension`.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str, image_ref: &str) -> Result<EmbeddingPair, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if text.trim().is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no description provided".to_string(),
            ));
        }

        Ok(EmbeddingPair {
            image: Self::encode(image_ref, self.dimension),
            description: Self::encode(text, self.dimension),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Build an embedder suitable for the current configuration.
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedder"
    );
    match config.embedding_provider {
        EmbeddingProvider::Hashing => {
            Ok(Arc::new(HashingEmbedder::new(config.embedding_dimension)))
        }
        EmbeddingProvider::Jina => Ok(Arc::new(JinaEmbedder::new(
            &config.embedding_url,
            config.embedding_api_key.clone(),
            &config.embedding_model,
            config.embedding_dimension,
        )?)),
    }
}
