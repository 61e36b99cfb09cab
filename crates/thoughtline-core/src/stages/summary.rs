//! Summary stage: the user-facing answer, built from the latest thought
//! and execution.

use std::sync::Arc;

use async_trait::async_trait;
use thoughtline_types::context::{RequestContext, StageName, clamp_unit};
use thoughtline_types::output::{Execution, OutputMeta, Summary, Thought, VersionedRecord};
use thoughtline_types::{PipelineError, Result};
use tracing::warn;

use super::{Stage, StageEnv, missing, require_query};
use crate::json_repair::{field_f64, field_str, field_str_list, parse_llm_object};
use crate::prompts;

pub struct SummaryStage {
    env: Arc<StageEnv>,
}

impl SummaryStage {
    pub fn new(env: Arc<StageEnv>) -> Self {
        Self { env }
    }

    async fn summarize(
        &self,
        query: &str,
        thought: &Thought,
        execution: &Execution,
        ctx: &RequestContext,
    ) -> Result<Summary> {
        let prompt = prompts::summary(query, thought, execution);
        let text = self.env.call_llm(StageName::SummaryAgent, &prompt).await?;

        let (summary, key_findings, confidence) = match parse_llm_object(&text) {
            Some(obj) => (
                field_str(&obj, &["summary", "answer", "response"]).unwrap_or_default(),
                field_str_list(&obj, &["key_findings", "keyFindings", "findings"]),
                field_f64(&obj, &["confidence"]).map(clamp_unit),
            ),
            None => {
                warn!(request_id = %ctx.request_id, "summary was not JSON, keeping prose");
                (text.trim().to_string(), Vec::new(), None)
            }
        };
        if summary.trim().is_empty() {
            return Err(PipelineError::malformed(
                StageName::SummaryAgent.as_str(),
                "response contained no summary text",
            ));
        }

        let record = Summary {
            meta: OutputMeta::new(ctx),
            summary,
            key_findings,
            confidence,
            thought_version: thought.version(),
            execution_version: execution.version(),
        };
        self.env.outputs.summary.save(record).await
    }
}

#[async_trait]
impl Stage for SummaryStage {
    type Input = ();
    type Output = Summary;
    const NAME: StageName = StageName::SummaryAgent;

    async fn process(&self, _input: (), ctx: RequestContext) -> Result<(Summary, RequestContext)> {
        let query = require_query(&ctx)?;
        let outputs = &self.env.outputs;
        let thought = outputs
            .thought
            .get_by_request_id(&ctx.request_id)
            .await?
            .ok_or_else(|| missing(Self::NAME, StageName::ThoughtAgent, &ctx))?;
        let execution = outputs
            .execution
            .get_by_request_id(&ctx.request_id)
            .await?
            .ok_or_else(|| missing(Self::NAME, StageName::ExecutorAgent, &ctx))?;

        let ctx = self.env.enter(Self::NAME, ctx).await?;
        let result = self.summarize(&query, &thought, &execution, &ctx).await;
        self.env.finish(ctx, result).await
    }
}
