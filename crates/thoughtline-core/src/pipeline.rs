//! Pipeline controller: sequences the stages for one request.
//!
//! ```text
//! route -> thought -> planner -> critic --(clean approve)--> executor -> summary
//!            ^           ^          |
//!            |           |          v
//!            |           +--- meta (replan)
//!            +--------------- meta (deepen)
//! ```
//!
//! Meta runs only when the critique is not a clean approve at or above the
//! replan floor, or the thought's confidence is below the deepen floor.
//! Replan takes priority over deepen. Replans are capped (exceeding the cap
//! fails the request); deepens past their cap are ignored.
//!
//! Work on one request id is serialised by an in-process keyed mutex.
//! Cancellation is checked between stages and leaves persisted state as-is.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thoughtline_types::config::LoopLimits;
use thoughtline_types::context::{RequestContext, RequestStatus, StageName};
use thoughtline_types::output::{Critique, MetaAssessment, Recommendation, Summary};
use thoughtline_types::{PipelineError, Result};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::complexity::ComplexityRouter;
use crate::stages::{
    CriticStage, ExecutorStage, MetaRequest, MetaStage, PlanRequest, PlannerStage, Stage,
    SummaryStage, ThoughtRequest, ThoughtStage,
};
use crate::store::{OutputStores, RequestContextStore};

/// The six reasoning stages of one pipeline.
pub struct Stages {
    pub thought: ThoughtStage,
    pub planner: PlannerStage,
    pub critic: CriticStage,
    pub meta: MetaStage,
    pub executor: ExecutorStage,
    pub summary: SummaryStage,
}

/// Result of driving a request.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub request_id: String,
    pub context: RequestContext,
    /// Present when the chain reached the summary stage.
    pub summary: Option<Summary>,
    /// The run stopped early because its token was cancelled.
    pub cancelled: bool,
    pub replans: u32,
    pub deepens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Thought,
    Planner,
    Critic,
    Meta,
    Executor,
    Summary,
    Done,
}

impl Next {
    /// Re-run `stage` (used when resuming a failed request).
    fn rerun(stage: StageName) -> Self {
        match stage {
            StageName::ComplexityDetector | StageName::ThoughtAgent => Next::Thought,
            StageName::PlannerAgent => Next::Planner,
            StageName::CriticAgent => Next::Critic,
            StageName::MetaAgent => Next::Meta,
            StageName::ExecutorAgent => Next::Executor,
            StageName::SummaryAgent => Next::Summary,
        }
    }
}

#[derive(Debug, Default)]
struct LoopState {
    passes: u8,
    replans: u32,
    deepens: u32,
    confidence: Option<f32>,
    critique_for_replan: Option<Critique>,
}

pub struct PipelineController {
    router: ComplexityRouter,
    stages: Stages,
    contexts: RequestContextStore,
    outputs: OutputStores,
    limits: LoopLimits,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PipelineController {
    pub fn new(
        router: ComplexityRouter,
        stages: Stages,
        contexts: RequestContextStore,
        outputs: OutputStores,
        limits: LoopLimits,
    ) -> Self {
        Self {
            router,
            stages,
            contexts,
            outputs,
            limits,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn router(&self) -> &ComplexityRouter {
        &self.router
    }

    pub fn contexts(&self) -> &RequestContextStore {
        &self.contexts
    }

    pub fn outputs(&self) -> &OutputStores {
        &self.outputs
    }

    /// Run the whole chain for `query`.
    pub async fn run(&self, query: &str) -> Result<PipelineOutcome> {
        self.run_with_cancel(query, CancellationToken::new()).await
    }

    /// Run the whole chain, stopping between stages once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome> {
        if query.trim().is_empty() {
            return Err(PipelineError::validation("query must not be empty"));
        }
        let (_, ctx) = self.router.route(query).await?;
        let _guard = self.lock(&ctx.request_id).await;
        let state = LoopState {
            passes: ctx.reasoning_passes().min(self.limits.max_reasoning_passes),
            ..Default::default()
        };
        self.drive(ctx, Next::Thought, state, &cancel).await
    }

    /// Continue a request from where it stopped.
    ///
    /// A failed stage is re-run; after a completed stage the chain picks up
    /// with the stage that would have followed. Persisted upstream outputs
    /// are reused. A request still marked `in-progress` is refused.
    pub async fn resume(&self, request_id: &str) -> Result<PipelineOutcome> {
        self.resume_with_cancel(request_id, CancellationToken::new())
            .await
    }

    pub async fn resume_with_cancel(
        &self,
        request_id: &str,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome> {
        let _guard = self.lock(request_id).await;
        let mut ctx = self.contexts.get(request_id).await?;
        let mut state = self.recover_state(&ctx).await?;

        let next = match (ctx.status, ctx.current_stage) {
            (RequestStatus::InProgress, holder) => {
                return Err(PipelineError::StageConflict {
                    request_id: request_id.to_string(),
                    holder: holder
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".into()),
                });
            }
            (RequestStatus::Pending, _) | (_, None) => Next::Thought,
            (RequestStatus::Failed, Some(stage)) => Next::rerun(stage),
            (RequestStatus::Completed, Some(stage)) => {
                self.after_completed(stage, &mut ctx, &mut state).await?
            }
        };

        if next == Next::Planner && state.critique_for_replan.is_none() {
            state.critique_for_replan = self.critique_of_latest_plan(request_id).await?;
        }
        info!(request_id, next = ?next, status = %ctx.status, "resuming chain");
        self.drive(ctx, next, state, &cancel).await
    }

    // ── Driving ──────────────────────────────────────────────────────

    async fn drive(
        &self,
        mut ctx: RequestContext,
        mut next: Next,
        mut state: LoopState,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        let mut summary = None;
        while next != Next::Done {
            if cancel.is_cancelled() {
                info!(request_id = %ctx.request_id, next = ?next, "chain cancelled");
                return Ok(self.outcome(ctx, None, true, &state));
            }
            debug!(request_id = %ctx.request_id, next = ?next, "next stage");
            next = match next {
                Next::Thought => {
                    let input = ThoughtRequest {
                        reasoning_passes: Some(state.passes),
                    };
                    let (thought, c) = self.stages.thought.process(input, ctx).await?;
                    ctx = c;
                    state.confidence = thought.confidence;
                    Next::Planner
                }
                Next::Planner => {
                    let input = PlanRequest {
                        critique: state.critique_for_replan.take(),
                    };
                    let (_, c) = self.stages.planner.process(input, ctx).await?;
                    ctx = c;
                    Next::Critic
                }
                Next::Critic => {
                    let (critique, c) = self.stages.critic.process((), ctx).await?;
                    ctx = c;
                    if self.needs_meta(&critique, state.confidence) {
                        Next::Meta
                    } else {
                        Next::Executor
                    }
                }
                Next::Meta => {
                    let input = self.meta_request(&ctx.request_id).await?;
                    let critique = input.critique.clone();
                    let (assessment, c) = self.stages.meta.process(input, ctx).await?;
                    ctx = c;
                    self.after_meta(&assessment, critique, &mut state, &mut ctx)
                        .await?
                }
                Next::Executor => {
                    let (_, c) = self.stages.executor.process((), ctx).await?;
                    ctx = c;
                    Next::Summary
                }
                Next::Summary => {
                    let (s, c) = self.stages.summary.process((), ctx).await?;
                    ctx = c;
                    summary = Some(s);
                    Next::Done
                }
                Next::Done => Next::Done,
            };
        }

        if summary.is_none() {
            summary = self.outputs.summary.get_by_request_id(&ctx.request_id).await?;
        }
        info!(
            request_id = %ctx.request_id,
            chain = ?ctx.agent_chain,
            replans = state.replans,
            deepens = state.deepens,
            "chain completed"
        );
        Ok(self.outcome(ctx, summary, false, &state))
    }

    /// Whether the critique result warrants a meta review.
    fn needs_meta(&self, critique: &Critique, confidence: Option<f32>) -> bool {
        let floors = self.stages.meta.config();
        let clean = critique.recommendation == Recommendation::Approve
            && critique.overall_score >= floors.replan_score_floor;
        let shaky = confidence.is_some_and(|c| c < floors.deepen_confidence_floor);
        !clean || shaky
    }

    async fn meta_request(&self, request_id: &str) -> Result<MetaRequest> {
        Ok(MetaRequest {
            thought: self.outputs.thought.get_by_request_id(request_id).await?,
            plan: self.outputs.plan.get_by_request_id(request_id).await?,
            critique: self.outputs.critique.get_by_request_id(request_id).await?,
            confidence: None,
        })
    }

    /// Apply a meta assessment to the loop state and pick the next stage.
    async fn after_meta(
        &self,
        assessment: &MetaAssessment,
        critique: Option<Critique>,
        state: &mut LoopState,
        ctx: &mut RequestContext,
    ) -> Result<Next> {
        if assessment.should_replan {
            if state.replans >= self.limits.max_replans {
                let err = PipelineError::ReplanLimitExceeded {
                    request_id: ctx.request_id.clone(),
                    limit: self.limits.max_replans,
                };
                ctx.fail_stage(err.to_string());
                if let Err(e) = self.contexts.save(ctx).await {
                    warn!(request_id = %ctx.request_id, error = %e, "failed to persist request status");
                }
                warn!(request_id = %ctx.request_id, limit = self.limits.max_replans, "replan limit reached");
                return Err(err);
            }
            state.replans += 1;
            state.critique_for_replan = critique;
            info!(request_id = %ctx.request_id, replan = state.replans, "replanning");
            return Ok(Next::Planner);
        }

        if assessment.should_deepen_reasoning {
            if state.deepens < self.limits.max_deepens
                && state.passes < self.limits.max_reasoning_passes
            {
                state.deepens += 1;
                state.passes += 1;
                info!(
                    request_id = %ctx.request_id,
                    deepen = state.deepens,
                    passes = state.passes,
                    "deepening reasoning"
                );
                return Ok(Next::Thought);
            }
            warn!(
                request_id = %ctx.request_id,
                deepens = state.deepens,
                passes = state.passes,
                "deepen requested past its limit, proceeding"
            );
        }
        Ok(Next::Executor)
    }

    // ── Resume support ───────────────────────────────────────────────

    /// Rebuild loop counters from what is already persisted.
    async fn recover_state(&self, ctx: &RequestContext) -> Result<LoopState> {
        let thoughts = self
            .outputs
            .thought
            .get_all_versions_by_request_id(&ctx.request_id)
            .await?;
        let plans = self
            .outputs
            .plan
            .get_all_versions_by_request_id(&ctx.request_id)
            .await?;
        let latest = thoughts.last();
        Ok(LoopState {
            passes: latest
                .map(|t| t.reasoning_passes)
                .unwrap_or_else(|| ctx.reasoning_passes())
                .min(self.limits.max_reasoning_passes),
            replans: plans
                .iter()
                .filter(|p| p.revised_from_critique.is_some())
                .count() as u32,
            deepens: thoughts.len().saturating_sub(1) as u32,
            confidence: latest.and_then(|t| t.confidence),
            critique_for_replan: None,
        })
    }

    /// The stage to run after `stage` completed.
    async fn after_completed(
        &self,
        stage: StageName,
        ctx: &mut RequestContext,
        state: &mut LoopState,
    ) -> Result<Next> {
        let request_id = ctx.request_id.clone();
        Ok(match stage {
            StageName::ComplexityDetector => Next::Thought,
            StageName::ThoughtAgent => Next::Planner,
            StageName::PlannerAgent => Next::Critic,
            StageName::CriticAgent => match self.outputs.critique.get_by_request_id(&request_id).await? {
                Some(c) if !self.needs_meta(&c, state.confidence) => Next::Executor,
                _ => Next::Meta,
            },
            StageName::MetaAgent => {
                match self.outputs.meta.get_by_request_id(&request_id).await? {
                    Some(assessment) => {
                        let critique = self.outputs.critique.get_by_request_id(&request_id).await?;
                        self.after_meta(&assessment, critique, state, ctx).await?
                    }
                    None => Next::Meta,
                }
            }
            StageName::ExecutorAgent => Next::Summary,
            StageName::SummaryAgent => Next::Done,
        })
    }

    /// The latest critique, if it reviewed the latest plan.
    async fn critique_of_latest_plan(&self, request_id: &str) -> Result<Option<Critique>> {
        let plan = self.outputs.plan.get_by_request_id(request_id).await?;
        let critique = self.outputs.critique.get_by_request_id(request_id).await?;
        Ok(match (plan, critique) {
            (Some(p), Some(c)) if c.plan_version == p.meta.version => Some(c),
            _ => None,
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn lock(&self, request_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(request_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn outcome(
        &self,
        ctx: RequestContext,
        summary: Option<Summary>,
        cancelled: bool,
        state: &LoopState,
    ) -> PipelineOutcome {
        PipelineOutcome {
            request_id: ctx.request_id.clone(),
            context: ctx,
            summary,
            cancelled,
            replans: state.replans,
            deepens: state.deepens,
        }
    }
}
