//! Embedding trait definitions and implementations.
//!
//! Provides the [`Embedder`] trait for turning text into a fixed-dimension
//! vector, plus a [`hash_embedder::HashEmbedder`] that uses SimHash for
//! local, deterministic embeddings with no API calls required.

pub mod hash_embedder;

use async_trait::async_trait;
use thiserror::Error;
use thoughtline_types::PipelineError;

/// Errors that can occur during embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The input text could not be processed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The embedding backend failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EmbeddingError> for PipelineError {
    fn from(err: EmbeddingError) -> Self {
        PipelineError::EmbeddingUnavailable(err.to_string())
    }
}

/// Trait for generating vector embeddings from text.
///
/// Implementations must be deterministic for identical text and always
/// return vectors of length [`dimension`](Embedder::dimension).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate a vector embedding for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Dimensionality of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Identifier used in logs.
    fn name(&self) -> &str {
        "unknown"
    }
}
