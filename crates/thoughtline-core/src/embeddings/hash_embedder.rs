//! SimHash-based local embedder.
//!
//! Each lowercased word (punctuation trimmed) is hashed and its bits are
//! spread across the vector as +1/-1 votes. The sum is normalized to unit
//! length, so queries sharing most of their words land close together.
//! No network access or model files are involved.

use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;

use super::{Embedder, EmbeddingError};

/// Dimension used when none is configured.
pub const DEFAULT_DIMENSION: usize = 768;

/// Deterministic SimHash embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create an embedder producing `dimension`-long vectors.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
    }

    fn compute(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in Self::tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();

            for (i, slot) in vector.iter_mut().enumerate() {
                let mixed = hash ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                *slot += if (mixed >> (i % 64)) & 1 == 1 { 1.0 } else { -1.0 };
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::InvalidInput(
                "embedder dimension is zero".into(),
            ));
        }
        Ok(self.compute(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}
