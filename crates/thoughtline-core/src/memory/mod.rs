//! Example memory: labeled query examples retrieved by semantic similarity.
//!
//! One generic engine, [`ExampleMemory`], is instantiated per payload type
//! (complexity, thought, plan). Each example's query text is embedded on
//! write; its payload and bookkeeping live in the index metadata.
//!
//! `get_all` is a full scan of the index. Example corpora are authored by
//! hand and stay small.

pub mod payload;

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thoughtline_types::example::{
    ComplexityExample, Example, ExampleSeed, NewExample, PlanExample, SimilarExample,
    ThoughtExample,
};
use thoughtline_types::{PipelineError, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::embeddings::Embedder;
use crate::vector_index::{InMemoryVectorIndex, Metadata, VectorIndex};

pub use payload::ExamplePayload;

const KIND_KEY: &str = "kind";
const QUERY_KEY: &str = "query";
const CREATED_KEY: &str = "created_at";
const UPDATED_KEY: &str = "updated_at";
const USAGE_KEY: &str = "usage_count";

/// Semantic store of examples carrying payload `P`.
pub struct ExampleMemory<P> {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: ExamplePayload> ExampleMemory<P> {
    /// Build a memory over `index`.
    ///
    /// Fails with [`PipelineError::ConfigInvalid`] when the embedder and the
    /// index disagree on dimensionality.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(PipelineError::ConfigInvalid {
                reason: format!(
                    "{} example memory: embedder dimension {} != index dimension {}",
                    P::KIND.as_str(),
                    embedder.dimension(),
                    index.dimension()
                ),
            });
        }
        Ok(Self {
            embedder,
            index,
            _payload: PhantomData,
        })
    }

    /// A memory over a fresh in-process index sized to `embedder`.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        let index = Arc::new(InMemoryVectorIndex::new(embedder.dimension()));
        Self {
            embedder,
            index,
            _payload: PhantomData,
        }
    }

    /// Embed `text`, checking the vector against the index dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.embedder.embed(text).await?;
        if vector.len() != self.index.dimension() {
            return Err(PipelineError::malformed(
                format!("embedder {}", self.embedder.name()),
                format!(
                    "returned {} dimensions, expected {}",
                    vector.len(),
                    self.index.dimension()
                ),
            ));
        }
        Ok(vector)
    }

    /// Embed and persist a new example.
    pub async fn store(&self, new: NewExample<P>) -> Result<Example<P>> {
        if new.query.trim().is_empty() {
            return Err(PipelineError::validation("example query must not be empty"));
        }
        let embedding = self.embed(&new.query).await?;
        let now = Utc::now();
        let example = Example {
            id: Uuid::new_v4().to_string(),
            query: new.query,
            embedding,
            payload: new.payload,
            created_at: now,
            updated_at: now,
            usage_count: 0,
        };
        self.write(&example).await?;
        debug!(kind = P::KIND.as_str(), id = %example.id, "stored example");
        Ok(example)
    }

    /// Examples whose similarity to `embedding` is at least `min_score`,
    /// best first, at most `top_k`. Ties keep insertion order.
    ///
    /// Returned examples carry an empty `embedding`.
    pub async fn query_similar(
        &self,
        embedding: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SimilarExample<P>>> {
        let matches = self.index.query(embedding, top_k).await?;
        let similar: Vec<SimilarExample<P>> = matches
            .into_iter()
            .filter(|m| m.score >= min_score)
            .map(|m| SimilarExample {
                example: decode(m.id, Vec::new(), &m.metadata),
                similarity: m.score,
            })
            .collect();
        debug!(
            kind = P::KIND.as_str(),
            hits = similar.len(),
            top = similar.first().map(|s| s.similarity),
            "example query"
        );
        Ok(similar)
    }

    /// Embed `text` and run [`query_similar`](Self::query_similar).
    pub async fn query_text(
        &self,
        text: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SimilarExample<P>>> {
        let embedding = self.embed(text).await?;
        self.query_similar(&embedding, top_k, min_score).await
    }

    pub async fn get(&self, id: &str) -> Result<Example<P>> {
        self.index
            .get(id)
            .await?
            .map(|e| decode(e.id, e.vector, &e.metadata))
            .ok_or_else(|| not_found(id))
    }

    /// Every example, in insertion order.
    pub async fn get_all(&self) -> Result<Vec<Example<P>>> {
        Ok(self
            .index
            .list()
            .await?
            .into_iter()
            .map(|e| decode(e.id, e.vector, &e.metadata))
            .collect())
    }

    /// Bump the usage counter; returns the new count.
    ///
    /// Read-modify-write with no locking: concurrent increments may collapse.
    pub async fn increment_usage(&self, id: &str) -> Result<u64> {
        let mut example = self.get(id).await?;
        example.usage_count += 1;
        self.write(&example).await?;
        Ok(example.usage_count)
    }

    /// Replace an example's query and payload in place.
    ///
    /// The vector is recomputed only when the query text changed. The id,
    /// creation time, and usage count are kept.
    pub async fn update(&self, id: &str, new: NewExample<P>) -> Result<Example<P>> {
        if new.query.trim().is_empty() {
            return Err(PipelineError::validation("example query must not be empty"));
        }
        let mut example = self.get(id).await?;
        if example.query != new.query {
            example.embedding = self.embed(&new.query).await?;
            example.query = new.query;
        }
        example.payload = new.payload;
        example.updated_at = Utc::now();
        self.write(&example).await?;
        debug!(kind = P::KIND.as_str(), id, "updated example");
        Ok(example)
    }

    /// Remove one example. Returns `true` if it existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.index.delete(id).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.index.clear().await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.index.list().await?.len())
    }

    async fn write(&self, example: &Example<P>) -> Result<()> {
        let mut metadata = example.payload.to_fields();
        metadata.insert(KIND_KEY.into(), P::KIND.as_str().into());
        metadata.insert(QUERY_KEY.into(), example.query.clone());
        metadata.insert(CREATED_KEY.into(), example.created_at.to_rfc3339());
        metadata.insert(UPDATED_KEY.into(), example.updated_at.to_rfc3339());
        metadata.insert(USAGE_KEY.into(), example.usage_count.to_string());
        self.index
            .upsert(&example.id, example.embedding.clone(), metadata)
            .await
    }
}

fn not_found(id: &str) -> PipelineError {
    PipelineError::NotFound {
        entity: "example",
        id: id.to_string(),
    }
}

fn timestamp(metadata: &Metadata, key: &str) -> DateTime<Utc> {
    metadata
        .get(key)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn decode<P: ExamplePayload>(id: String, embedding: Vec<f32>, metadata: &Metadata) -> Example<P> {
    Example {
        id,
        query: metadata.get(QUERY_KEY).cloned().unwrap_or_default(),
        embedding,
        payload: P::from_fields(metadata),
        created_at: timestamp(metadata, CREATED_KEY),
        updated_at: timestamp(metadata, UPDATED_KEY),
        usage_count: metadata
            .get(USAGE_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    }
}

// ── The three memories ──────────────────────────────────────────────────

/// The complexity, thought, and plan memories used by one pipeline.
pub struct ExampleMemories {
    pub complexity: Arc<ExampleMemory<ComplexityExample>>,
    pub thought: Arc<ExampleMemory<ThoughtExample>>,
    pub plan: Arc<ExampleMemory<PlanExample>>,
}

impl ExampleMemories {
    /// Three in-process memories sharing one embedder.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            complexity: Arc::new(ExampleMemory::in_memory(embedder.clone())),
            thought: Arc::new(ExampleMemory::in_memory(embedder.clone())),
            plan: Arc::new(ExampleMemory::in_memory(embedder)),
        }
    }

    /// Store every example in `seed`. Returns how many were stored.
    pub async fn seed(&self, seed: ExampleSeed) -> Result<usize> {
        let total = seed.len();
        for example in seed.complexity {
            self.complexity.store(example).await?;
        }
        for example in seed.thought {
            self.thought.store(example).await?;
        }
        for example in seed.plan {
            self.plan.store(example).await?;
        }
        info!(examples = total, "seeded example memories");
        Ok(total)
    }
}
