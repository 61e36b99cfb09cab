//! Vector similarity index boundary and an in-memory implementation.
//!
//! The [`VectorIndex`] trait is the only way example memory touches
//! vectors. Metadata is a flat string map; structured fields are stored as
//! JSON text and decoded by the caller.
//!
//! [`InMemoryVectorIndex`] does brute-force cosine similarity over all
//! entries. Entries keep their insertion position across upserts, so ties
//! in similarity always resolve to the oldest entry first.

use std::collections::HashMap;

use async_trait::async_trait;
use thoughtline_types::{PipelineError, Result};
use tokio::sync::RwLock;
use tracing::debug;

/// Flat, string-valued metadata stored beside each vector.
pub type Metadata = HashMap<String, String>;

/// A stored vector with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    /// Cosine similarity in `-1.0..=1.0`.
    pub score: f32,
    pub metadata: Metadata,
}

/// Similarity index over fixed-dimension vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Length every stored and queried vector must have.
    fn dimension(&self) -> usize;

    /// Insert or replace the entry `id`.
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> Result<()>;

    /// Top `top_k` entries by descending similarity to `vector`.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>>;

    /// Fetch one entry.
    async fn get(&self, id: &str) -> Result<Option<IndexEntry>>;

    /// Remove one entry. Returns `true` if it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Every entry, in insertion order.
    async fn list(&self) -> Result<Vec<IndexEntry>>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;
}

/// Brute-force in-process [`VectorIndex`].
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: usize,
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(PipelineError::validation(format!(
                "vector has {len} dimensions, index expects {}",
                self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Metadata) -> Result<()> {
        self.check_dimension(vector.len())?;
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.iter_mut().find(|e| e.id == id) {
            existing.vector = vector;
            existing.metadata = metadata;
            debug!(id, "updated index entry in place");
        } else {
            entries.push(IndexEntry {
                id: id.to_string(),
                vector,
                metadata,
            });
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>> {
        self.check_dimension(vector.len())?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<IndexMatch> = entries
            .iter()
            .map(|e| IndexMatch {
                id: e.id.clone(),
                score: cosine_similarity(vector, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();

        // `sort_by` is stable: equal scores keep insertion order.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get(&self, id: &str) -> Result<Option<IndexEntry>> {
        Ok(self.entries.read().await.iter().find(|e| e.id == id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < before)
    }

    async fn list(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.entries.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for mismatched lengths or a zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tag: &str) -> Metadata {
        Metadata::from([("tag".to_string(), tag.to_string())])
    }

    #[tokio::test]
    async fn query_ranks_by_similarity() {
        let index = InMemoryVectorIndex::new(3);
        index.upsert("x", vec![1.0, 0.0, 0.0], meta("x")).await.unwrap();
        index.upsert("y", vec![0.0, 1.0, 0.0], meta("y")).await.unwrap();
        index.upsert("xy", vec![0.7, 0.7, 0.0], meta("xy")).await.unwrap();

        let hits = index.query(&[1.0, 0.1, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "xy"]);
        assert_eq!(hits[0].metadata["tag"], "x");
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let index = InMemoryVectorIndex::new(2);
        index.upsert("first", vec![1.0, 0.0], Metadata::new()).await.unwrap();
        index.upsert("second", vec![2.0, 0.0], Metadata::new()).await.unwrap();
        index.upsert("third", vec![0.5, 0.0], Metadata::new()).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 3).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let index = InMemoryVectorIndex::new(2);
        index.upsert("a", vec![1.0, 0.0], meta("old")).await.unwrap();
        index.upsert("b", vec![1.0, 0.0], meta("b")).await.unwrap();
        index.upsert("a", vec![1.0, 0.0], meta("new")).await.unwrap();

        let all = index.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[0].metadata["tag"], "new");
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let index = InMemoryVectorIndex::new(3);
        let err = index
            .upsert("bad", vec![1.0, 2.0], Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
        assert!(index.query(&[1.0], 1).await.is_err());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let index = InMemoryVectorIndex::new(1);
        index.upsert("a", vec![1.0], Metadata::new()).await.unwrap();
        index.upsert("b", vec![1.0], Metadata::new()).await.unwrap();
        assert!(index.delete("a").await.unwrap());
        assert!(!index.delete("a").await.unwrap());
        assert!(index.get("a").await.unwrap().is_none());
        index.clear().await.unwrap();
        assert!(index.list().await.unwrap().is_empty());
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }
}
