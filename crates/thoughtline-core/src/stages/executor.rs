//! Executor stage: runs the latest plan's tool steps in order.
//!
//! Tool failures are recorded per step and never fail the request.
//! Reasoning-only steps and actions missing from the catalog are skipped.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thoughtline_types::context::{RequestContext, StageName};
use thoughtline_types::output::{
    Execution, OutputMeta, Plan, StepResult, StepStatus, VersionedRecord,
};
use thoughtline_types::Result;
use tracing::{debug, info, warn};

use super::{Stage, StageEnv, missing};
use crate::tools::{ToolCatalog, ToolInvoker};

pub struct ExecutorStage {
    env: Arc<StageEnv>,
    catalog: Arc<dyn ToolCatalog>,
    invoker: Arc<dyn ToolInvoker>,
}

impl ExecutorStage {
    pub fn new(
        env: Arc<StageEnv>,
        catalog: Arc<dyn ToolCatalog>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            env,
            catalog,
            invoker,
        }
    }

    async fn execute(&self, plan: &Plan, ctx: &RequestContext) -> Result<Execution> {
        let mut results = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let Some(ref action) = step.action else {
                results.push(StepResult {
                    order: step.order,
                    action: None,
                    status: StepStatus::Skipped,
                    output: None,
                    error: None,
                    duration_ms: 0,
                });
                continue;
            };

            if !self.catalog.contains(action) {
                warn!(request_id = %ctx.request_id, step = step.order, tool = %action, "skipping unregistered tool");
                results.push(StepResult {
                    order: step.order,
                    action: Some(action.clone()),
                    status: StepStatus::Skipped,
                    output: None,
                    error: Some(format!("tool '{action}' is not registered")),
                    duration_ms: 0,
                });
                continue;
            }

            let started = Instant::now();
            let outcome = self.invoker.call(action, &step.parameters).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let result = match outcome {
                Ok(output) => {
                    debug!(request_id = %ctx.request_id, step = step.order, tool = %action, duration_ms, "tool succeeded");
                    StepResult {
                        order: step.order,
                        action: Some(action.clone()),
                        status: StepStatus::Succeeded,
                        output: Some(output),
                        error: None,
                        duration_ms,
                    }
                }
                Err(e) => {
                    warn!(request_id = %ctx.request_id, step = step.order, tool = %action, error = %e, "tool failed");
                    StepResult {
                        order: step.order,
                        action: Some(action.clone()),
                        status: StepStatus::Failed,
                        output: None,
                        error: Some(e.to_string()),
                        duration_ms,
                    }
                }
            };
            results.push(result);
        }

        let execution = Execution {
            meta: OutputMeta::new(ctx),
            plan_version: plan.version(),
            results,
        };
        info!(
            request_id = %ctx.request_id,
            succeeded = execution.count(StepStatus::Succeeded),
            failed = execution.count(StepStatus::Failed),
            skipped = execution.count(StepStatus::Skipped),
            "plan executed"
        );
        self.env.outputs.execution.save(execution).await
    }
}

#[async_trait]
impl Stage for ExecutorStage {
    type Input = ();
    type Output = Execution;
    const NAME: StageName = StageName::ExecutorAgent;

    async fn process(&self, _input: (), ctx: RequestContext) -> Result<(Execution, RequestContext)> {
        let plan = self
            .env
            .outputs
            .plan
            .get_by_request_id(&ctx.request_id)
            .await?
            .ok_or_else(|| missing(Self::NAME, StageName::PlannerAgent, &ctx))?;

        let ctx = self.env.enter(Self::NAME, ctx).await?;
        let result = self.execute(&plan, &ctx).await;
        self.env.finish(ctx, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{env, request};
    use crate::tools::{StaticToolCatalog, ToolError};
    use serde_json::{Map, Value, json};
    use thoughtline_llm::ScriptedModel;
    use thoughtline_types::context::RequestStatus;
    use thoughtline_types::output::Step;
    use thoughtline_types::PipelineError;

    struct Flaky;

    #[async_trait]
    impl ToolInvoker for Flaky {
        async fn call(
            &self,
            name: &str,
            _parameters: &Map<String, Value>,
        ) -> std::result::Result<Value, ToolError> {
            match name {
                "list_facilities" => Ok(json!(["Austin", "Dayton"])),
                other => Err(ToolError::ExecutionFailed(format!("{other} exploded"))),
            }
        }
    }

    fn step(order: u32, action: Option<&str>) -> Step {
        Step {
            order,
            description: format!("step {order}"),
            action: action.map(String::from),
            parameters: Map::new(),
        }
    }

    #[tokio::test]
    async fn records_each_step() {
        let (env, _) = env(ScriptedModel::new());
        let ctx = request(&env, "q").await;
        env.outputs
            .plan
            .save(Plan {
                meta: OutputMeta::new(&ctx),
                steps: vec![
                    step(1, Some("list_facilities")),
                    step(2, Some("get_facility")),
                    step(3, None),
                    step(4, Some("teleport")),
                ],
                rationale: String::new(),
                thought_version: 1,
                revised_from_critique: None,
            })
            .await
            .unwrap();

        let stage = ExecutorStage::new(
            env.clone(),
            Arc::new(StaticToolCatalog::new(["list_facilities", "get_facility"])),
            Arc::new(Flaky),
        );
        let (execution, ctx) = stage.process((), ctx).await.unwrap();

        let statuses: Vec<StepStatus> = execution.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Succeeded,
                StepStatus::Failed,
                StepStatus::Skipped,
                StepStatus::Skipped
            ]
        );
        assert_eq!(execution.results[0].output, Some(json!(["Austin", "Dayton"])));
        assert!(execution.results[1].error.as_deref().unwrap().contains("exploded"));
        assert_eq!(execution.plan_version, 1);
        assert_eq!(ctx.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn requires_plan() {
        let (env, _) = env(ScriptedModel::new());
        let ctx = request(&env, "q").await;
        let stage = ExecutorStage::new(
            env,
            Arc::new(StaticToolCatalog::default()),
            Arc::new(Flaky),
        );
        assert!(matches!(
            stage.process((), ctx).await,
            Err(PipelineError::MissingDependency { .. })
        ));
    }
}
