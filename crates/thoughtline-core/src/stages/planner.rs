//! Planner stage: turns the latest thought into ordered, tool-referencing
//! steps. On a replan the critique that rejected the previous plan is fed
//! back into the prompt.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thoughtline_types::config::RetrievalConfig;
use thoughtline_types::context::{RequestContext, StageName};
use thoughtline_types::example::PlanExample;
use thoughtline_types::output::{Critique, OutputMeta, Plan, Step, Thought, VersionedRecord};
use thoughtline_types::{PipelineError, Result};
use tracing::{debug, warn};

use super::{Stage, StageEnv, few_shot, missing, require_query};
use crate::json_repair::{field, field_f64, field_str, parse_llm_json};
use crate::memory::ExampleMemory;
use crate::prompts;
use crate::tools::ToolCatalog;

/// Input to the planner.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// The critique to address; set on replans.
    pub critique: Option<Critique>,
}

pub struct PlannerStage {
    env: Arc<StageEnv>,
    memory: Arc<ExampleMemory<PlanExample>>,
    retrieval: RetrievalConfig,
    catalog: Arc<dyn ToolCatalog>,
}

impl PlannerStage {
    pub fn new(
        env: Arc<StageEnv>,
        memory: Arc<ExampleMemory<PlanExample>>,
        retrieval: RetrievalConfig,
        catalog: Arc<dyn ToolCatalog>,
    ) -> Self {
        Self {
            env,
            memory,
            retrieval,
            catalog,
        }
    }

    async fn plan(
        &self,
        query: &str,
        thought: &Thought,
        critique: Option<&Critique>,
        ctx: &RequestContext,
    ) -> Result<Plan> {
        let examples = few_shot(
            &self.memory,
            query,
            self.retrieval.top_k,
            self.retrieval.min_score,
        )
        .await;
        let tools = self.catalog.list();
        let prompt = prompts::plan(query, thought, &tools, critique, &examples);
        let text = self.env.call_llm(StageName::PlannerAgent, &prompt).await?;

        let (steps, rationale) = parse_plan(&text);
        if steps.is_empty() {
            return Err(PipelineError::malformed(
                StageName::PlannerAgent.as_str(),
                "response contained no usable steps",
            ));
        }
        debug!(
            request_id = %ctx.request_id,
            steps = steps.len(),
            replan = critique.is_some(),
            "plan parsed"
        );

        let plan = Plan {
            meta: OutputMeta::new(ctx),
            steps,
            rationale,
            thought_version: thought.version(),
            revised_from_critique: critique.map(|c| c.version()),
        };
        self.env.outputs.plan.save(plan).await
    }
}

#[async_trait]
impl Stage for PlannerStage {
    type Input = PlanRequest;
    type Output = Plan;
    const NAME: StageName = StageName::PlannerAgent;

    async fn process(&self, input: PlanRequest, ctx: RequestContext) -> Result<(Plan, RequestContext)> {
        let query = require_query(&ctx)?;
        let thought = self
            .env
            .outputs
            .thought
            .get_by_request_id(&ctx.request_id)
            .await?
            .ok_or_else(|| missing(Self::NAME, StageName::ThoughtAgent, &ctx))?;

        let ctx = self.env.enter(Self::NAME, ctx).await?;
        let result = self
            .plan(&query, &thought, input.critique.as_ref(), &ctx)
            .await;
        self.env.finish(ctx, result).await
    }
}

/// Read steps and rationale from model text.
///
/// Accepts `{"steps": [...]}` or a bare array. Elements may be objects or
/// plain strings; elements with neither description nor action are
/// dropped. Steps are sorted by any `order` the model gave and renumbered
/// from 1.
pub(crate) fn parse_plan(text: &str) -> (Vec<Step>, String) {
    let Some(value) = parse_llm_json(text) else {
        warn!("plan response was not JSON");
        return (Vec::new(), String::new());
    };
    let (items, rationale) = match value {
        Value::Array(items) => (items, String::new()),
        Value::Object(obj) => {
            let rationale = field_str(&obj, &["rationale", "reasoning", "explanation"]).unwrap_or_default();
            let items = match field(&obj, &["steps", "plan"]) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            (items, rationale)
        }
        _ => (Vec::new(), String::new()),
    };

    let mut ranked: Vec<(f64, Step)> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let fallback = (i + 1) as f64;
            match item {
                Value::String(s) if !s.trim().is_empty() => Some((
                    fallback,
                    Step {
                        order: 0,
                        description: s.trim().to_string(),
                        action: None,
                        parameters: Map::new(),
                    },
                )),
                Value::Object(obj) => step_from_object(obj).map(|s| {
                    let order = field_f64(obj, &["order", "step_number", "stepNumber", "index"])
                        .filter(|o| o.is_finite())
                        .unwrap_or(fallback);
                    (order, s)
                }),
                _ => None,
            }
        })
        .collect();

    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    let steps = ranked
        .into_iter()
        .enumerate()
        .map(|(i, (_, mut step))| {
            step.order = i as u32 + 1;
            step
        })
        .collect();
    (steps, rationale)
}

fn step_from_object(obj: &Map<String, Value>) -> Option<Step> {
    let action = field_str(obj, &["action", "tool", "tool_name", "toolName"])
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty() && !matches!(a.to_ascii_lowercase().as_str(), "null" | "none" | "reasoning"));
    let description = field_str(obj, &["description", "step", "task", "title"])
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    let description = match (description, &action) {
        (Some(d), _) => d,
        (None, Some(a)) => format!("call {a}"),
        (None, None) => return None,
    };
    let parameters = match field(obj, &["parameters", "params", "args", "arguments"]) {
        Some(Value::Object(p)) => p.clone(),
        _ => Map::new(),
    };
    Some(Step {
        order: 0,
        description,
        action,
        parameters,
    })
}
