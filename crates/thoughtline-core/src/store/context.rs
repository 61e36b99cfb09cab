//! Request context persistence.
//!
//! Writes are whole-record upserts keyed by request id. There is no
//! optimistic locking here; the pipeline controller serialises work on a
//! single request id before it reaches this store.

use std::sync::Arc;

use thoughtline_types::context::{ContextFilter, RequestContext};
use thoughtline_types::{PipelineError, Result};
use tracing::debug;

use super::document::{DocumentStore, InMemoryDocumentStore};

/// Store of [`RequestContext`] records.
#[derive(Clone)]
pub struct RequestContextStore {
    docs: Arc<dyn DocumentStore<RequestContext>>,
}

impl RequestContextStore {
    pub fn new(docs: Arc<dyn DocumentStore<RequestContext>>) -> Self {
        Self { docs }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDocumentStore::<RequestContext>::new()))
    }

    /// Upsert by request id (last writer wins).
    pub async fn save(&self, ctx: &RequestContext) -> Result<()> {
        self.docs.put(&ctx.request_id, ctx).await?;
        debug!(
            request_id = %ctx.request_id,
            status = %ctx.status,
            chain_len = ctx.agent_chain.len(),
            "saved request context"
        );
        Ok(())
    }

    /// Fetch a context, or [`PipelineError::NotFound`].
    pub async fn get(&self, request_id: &str) -> Result<RequestContext> {
        self.find(request_id).await?.ok_or_else(|| PipelineError::NotFound {
            entity: "request context",
            id: request_id.to_string(),
        })
    }

    pub async fn find(&self, request_id: &str) -> Result<Option<RequestContext>> {
        self.docs.get(request_id).await
    }

    /// Contexts passing `filter`, oldest first.
    pub async fn get_all(&self, filter: &ContextFilter) -> Result<Vec<RequestContext>> {
        let mut contexts: Vec<RequestContext> = self
            .docs
            .list()
            .await?
            .into_iter()
            .filter(|ctx| filter.matches(ctx))
            .collect();
        contexts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        Ok(contexts)
    }

    /// Case-insensitive substring match over request ids and query text.
    pub async fn search(&self, text: &str) -> Result<Vec<RequestContext>> {
        let needle = text.to_lowercase();
        let all = self.get_all(&ContextFilter::default()).await?;
        Ok(all
            .into_iter()
            .filter(|ctx| {
                ctx.request_id.to_lowercase().contains(&needle)
                    || ctx
                        .user_query
                        .as_deref()
                        .is_some_and(|q| q.to_lowercase().contains(&needle))
            })
            .collect())
    }

    pub async fn clear(&self) -> Result<()> {
        self.docs.clear().await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.docs.list().await?.len())
    }
}
