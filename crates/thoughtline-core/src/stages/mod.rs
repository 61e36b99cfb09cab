//! The six reasoning stages and the contract they share.
//!
//! Every stage follows the same shape:
//!
//! 1. check its input and load required upstream outputs (a failure here
//!    is a rejection and leaves no trace),
//! 2. enter the request (`in-progress`, chain append, context saved),
//! 3. do its work and persist the next version of its output,
//! 4. leave the request `completed`, or `failed` with the error recorded.
//!
//! Step 4 is best-effort: a failed status write is logged, never allowed
//! to mask the stage's own result.

pub mod critic;
pub mod executor;
pub mod meta;
pub mod planner;
pub mod summary;
pub mod thought;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thoughtline_llm::{InvokeConfig, LanguageModel, invoke_with_timeout};
use thoughtline_types::context::{RequestContext, StageName};
use thoughtline_types::example::SimilarExample;
use thoughtline_types::output::VersionedRecord;
use thoughtline_types::{PipelineError, Result};
use tracing::{debug, info, warn};

use crate::memory::{ExampleMemory, ExamplePayload};
use crate::store::{OutputStores, RequestContextStore};

pub use critic::CriticStage;
pub use executor::ExecutorStage;
pub use meta::{MetaRequest, MetaStage};
pub use planner::{PlanRequest, PlannerStage};
pub use summary::SummaryStage;
pub use thought::{ThoughtRequest, ThoughtStage};

/// One reasoning transformation over a request.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage-specific input beyond what the request context carries.
    type Input: Send + 'static;
    /// The versioned record the stage produces.
    type Output: VersionedRecord;

    /// Name recorded in the agent chain.
    const NAME: StageName;

    /// Run the stage. Returns the persisted output and the updated context.
    async fn process(
        &self,
        input: Self::Input,
        ctx: RequestContext,
    ) -> Result<(Self::Output, RequestContext)>;
}

// ── Shared environment ──────────────────────────────────────────────────

/// Collaborators shared by every stage.
pub struct StageEnv {
    pub contexts: RequestContextStore,
    pub outputs: OutputStores,
    pub llm: Arc<dyn LanguageModel>,
    pub invoke: InvokeConfig,
    pub timeout: Duration,
}

impl StageEnv {
    pub fn new(
        contexts: RequestContextStore,
        outputs: OutputStores,
        llm: Arc<dyn LanguageModel>,
        invoke: InvokeConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            contexts,
            outputs,
            llm,
            invoke,
            timeout,
        }
    }

    /// Take exclusive hold of the request for `stage` and persist that.
    pub(crate) async fn enter(
        &self,
        stage: StageName,
        mut ctx: RequestContext,
    ) -> Result<RequestContext> {
        ctx.begin_stage(stage)?;
        self.contexts.save(&ctx).await?;
        info!(request_id = %ctx.request_id, stage = %stage, "stage entered");
        Ok(ctx)
    }

    /// Close the stage: `completed` on success, `failed` on error.
    pub(crate) async fn finish<T>(
        &self,
        mut ctx: RequestContext,
        result: Result<T>,
    ) -> Result<(T, RequestContext)> {
        let stage = ctx.current_stage;
        match result {
            Ok(output) => {
                ctx.complete_stage();
                self.commit_status(&ctx).await;
                info!(request_id = %ctx.request_id, stage = ?stage, "stage completed");
                Ok((output, ctx))
            }
            Err(e) => {
                ctx.fail_stage(e.to_string());
                self.commit_status(&ctx).await;
                warn!(request_id = %ctx.request_id, stage = ?stage, error = %e, "stage failed");
                Err(e)
            }
        }
    }

    async fn commit_status(&self, ctx: &RequestContext) {
        if let Err(e) = self.contexts.save(ctx).await {
            warn!(
                request_id = %ctx.request_id,
                status = %ctx.status,
                error = %e,
                "failed to persist request status"
            );
        }
    }

    /// Call the model under the configured deadline.
    pub(crate) async fn call_llm(&self, stage: StageName, prompt: &str) -> Result<String> {
        debug!(stage = %stage, model = self.llm.name(), prompt_len = prompt.len(), "llm call");
        let text = invoke_with_timeout(self.llm.as_ref(), prompt, &self.invoke, self.timeout)
            .await
            .map_err(PipelineError::from)?;
        debug!(stage = %stage, response_len = text.len(), "llm response");
        Ok(text)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// The request's query text, or a validation error when it has none.
pub(crate) fn require_query(ctx: &RequestContext) -> Result<String> {
    match ctx.user_query.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => Ok(q.to_string()),
        _ => Err(PipelineError::validation(format!(
            "request {} has no query text",
            ctx.request_id
        ))),
    }
}

pub(crate) fn missing(stage: StageName, dependency: StageName, ctx: &RequestContext) -> PipelineError {
    PipelineError::MissingDependency {
        stage,
        dependency,
        request_id: ctx.request_id.clone(),
    }
}

/// Few-shot examples for `query`. Lookup failures only cost guidance, so
/// they are logged and yield no examples. Matched examples have their
/// usage counters bumped.
pub(crate) async fn few_shot<P: ExamplePayload>(
    memory: &ExampleMemory<P>,
    query: &str,
    top_k: usize,
    min_score: f32,
) -> Vec<SimilarExample<P>> {
    if top_k == 0 {
        return Vec::new();
    }
    let hits = match memory.query_text(query, top_k, min_score).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(kind = P::KIND.as_str(), error = %e, "few-shot lookup failed");
            return Vec::new();
        }
    };
    for hit in &hits {
        if let Err(e) = memory.increment_usage(&hit.example.id).await {
            warn!(id = %hit.example.id, error = %e, "failed to bump example usage");
        }
    }
    hits
}
