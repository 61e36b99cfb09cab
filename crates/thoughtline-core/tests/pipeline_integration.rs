//! End-to-end pipeline scenarios against a scripted language model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use thoughtline_core::embeddings::hash_embedder::HashEmbedder;
use thoughtline_core::memory::ExampleMemories;
use thoughtline_core::stages::{PlanRequest, PlannerStage, Stage, StageEnv};
use thoughtline_core::store::{OutputStores, RequestContextStore};
use thoughtline_core::tools::{StaticToolCatalog, ToolError, ToolInvoker};
use thoughtline_core::{PipelineBuilder, PipelineController};
use thoughtline_llm::{InvokeConfig, ScriptedModel};
use thoughtline_types::PipelineError;
use thoughtline_types::config::{PipelineConfig, RetrievalConfig};
use thoughtline_types::context::{RequestContext, RequestStatus, StageName};
use thoughtline_types::example::{ComplexityExample, ExampleSeed, NewExample};
use thoughtline_types::output::{IssueCategory, Recommendation, StepStatus, VersionedRecord};
use tokio_util::sync::CancellationToken;

const THOUGHT: &str = "stage: thought-agent";
const PLANNER: &str = "stage: planner-agent";
const CRITIC: &str = "stage: critic-agent";
const SUMMARY: &str = "stage: summary-agent";

const GOOD_THOUGHT: &str = r#"{"reasoning": "A direct listing of facilities.", "key_insights": ["no filters"], "confidence": 0.9}"#;
const GOOD_PLAN: &str = r#"{"steps": [{"order": 1, "description": "List facilities", "action": "list_facilities"}], "rationale": "single lookup"}"#;
const APPROVE: &str = r#"{"overall_score": 0.9, "recommendation": "approve", "issues": []}"#;
const REJECT: &str = r#"{"overall_score": 0.2, "recommendation": "reject", "issues": [{"category": "completeness", "severity": "high", "description": "ignores capacity"}]}"#;
const GOOD_SUMMARY: &str = r#"{"summary": "There are two facilities: Austin and Dayton.", "key_findings": ["2 facilities"], "confidence": 0.9}"#;

fn registry() -> Vec<String> {
    ["list_facilities", "get_facility", "analyze_shipment_risk"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.tools = registry();
    config.embedding.dimension = 128;
    config
}

struct FacilityTools;

#[async_trait]
impl ToolInvoker for FacilityTools {
    async fn call(&self, name: &str, _parameters: &Map<String, Value>) -> Result<Value, ToolError> {
        match name {
            "list_facilities" => Ok(json!([{"name": "Austin"}, {"name": "Dayton"}])),
            other => Err(ToolError::ExecutionFailed(format!("{other} is offline"))),
        }
    }
}

fn controller(model: &Arc<ScriptedModel>) -> PipelineController {
    PipelineBuilder::new(config())
        .with_llm(model.clone())
        .with_tool_invoker(Arc::new(FacilityTools))
        .build()
        .unwrap()
}

fn happy_model() -> ScriptedModel {
    ScriptedModel::new()
        .on(THOUGHT, GOOD_THOUGHT)
        .on(PLANNER, GOOD_PLAN)
        .on(CRITIC, APPROVE)
        .on(SUMMARY, GOOD_SUMMARY)
}

async fn versions<T: VersionedRecord>(
    store: &thoughtline_core::store::VersionedStore<T>,
    request_id: &str,
) -> Vec<u32> {
    store
        .get_all_versions_by_request_id(request_id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.version())
        .collect()
}

#[tokio::test]
async fn simple_query_runs_straight_through() {
    let model = Arc::new(happy_model());
    let pipeline = controller(&model);

    let outcome = pipeline.run("Show me all facilities").await.unwrap();
    let ctx = &outcome.context;

    assert!(!outcome.cancelled);
    assert_eq!(ctx.status, RequestStatus::Completed);
    assert_eq!(ctx.reasoning_passes(), 1);
    assert_eq!(
        ctx.agent_chain,
        vec![
            StageName::ComplexityDetector,
            StageName::ThoughtAgent,
            StageName::PlannerAgent,
            StageName::CriticAgent,
            StageName::ExecutorAgent,
            StageName::SummaryAgent,
        ]
    );
    assert_eq!(model.calls_matching(THOUGHT), 1);

    let id = &outcome.request_id;
    let outputs = pipeline.outputs();
    assert_eq!(versions(&outputs.thought, id).await, vec![1]);
    assert_eq!(versions(&outputs.plan, id).await, vec![1]);
    assert_eq!(versions(&outputs.critique, id).await, vec![1]);
    assert_eq!(versions(&outputs.execution, id).await, vec![1]);
    assert_eq!(versions(&outputs.summary, id).await, vec![1]);
    assert!(versions(&outputs.meta, id).await.is_empty());

    let execution = outputs.execution.get_by_request_id(id).await.unwrap().unwrap();
    assert_eq!(execution.results[0].status, StepStatus::Succeeded);
    let summary = outcome.summary.unwrap();
    assert!(summary.summary.contains("Austin"));

    let stored = pipeline.contexts().get(id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Completed);
}

#[tokio::test]
async fn registered_tools_pass_critique() {
    let model = Arc::new(
        ScriptedModel::new()
            .on(THOUGHT, GOOD_THOUGHT)
            .on(
                PLANNER,
                r#"{"steps": [
                    {"description": "list", "action": "list_facilities"},
                    {"description": "detail", "action": "get_facility", "parameters": {"id": 1}},
                    {"description": "risk", "action": "analyze_shipment_risk"}
                ]}"#,
            )
            .on(CRITIC, APPROVE)
            .on(SUMMARY, GOOD_SUMMARY),
    );
    let pipeline = controller(&model);
    let outcome = pipeline.run("Show me all facilities").await.unwrap();

    let critique = pipeline
        .outputs()
        .critique
        .get_by_request_id(&outcome.request_id)
        .await
        .unwrap()
        .unwrap();
    assert!(critique.issues.is_empty());
    assert_eq!(critique.recommendation, Recommendation::Approve);
}

#[tokio::test]
async fn registered_tool_reported_missing_does_not_replan() {
    let model = Arc::new(
        ScriptedModel::new()
            .on(THOUGHT, GOOD_THOUGHT)
            .on(PLANNER, GOOD_PLAN)
            .on(
                CRITIC,
                r#"{"recommendation": "reject", "issues": [{"category": "feasibility", "severity": "high",
                    "description": "Tool 'list_facilities' does not exist in the available tools"}]}"#,
            )
            .on(SUMMARY, GOOD_SUMMARY),
    );
    let pipeline = controller(&model);
    let outcome = pipeline.run("Show me all facilities").await.unwrap();
    let id = &outcome.request_id;
    let outputs = pipeline.outputs();

    assert_eq!(outcome.replans, 0);
    assert_eq!(versions(&outputs.plan, id).await, vec![1]);
    assert_eq!(versions(&outputs.critique, id).await, vec![1]);
    assert!(versions(&outputs.meta, id).await.is_empty());
    assert_eq!(model.calls_matching(PLANNER), 1);

    let critique = outputs.critique.get_by_request_id(id).await.unwrap().unwrap();
    assert_eq!(critique.recommendation, Recommendation::Approve);
    assert!(critique.issues.is_empty());

    assert_eq!(
        outcome.context.agent_chain,
        vec![
            StageName::ComplexityDetector,
            StageName::ThoughtAgent,
            StageName::PlannerAgent,
            StageName::CriticAgent,
            StageName::ExecutorAgent,
            StageName::SummaryAgent,
        ]
    );
    assert_eq!(outcome.context.status, RequestStatus::Completed);
}

#[tokio::test]
async fn reject_triggers_replan() {
    let model = Arc::new(
        ScriptedModel::new()
            .on(THOUGHT, GOOD_THOUGHT)
            .on(PLANNER, GOOD_PLAN)
            .on(CRITIC, REJECT)
            .on(CRITIC, APPROVE)
            .on(SUMMARY, GOOD_SUMMARY),
    );
    let pipeline = controller(&model);
    let outcome = pipeline.run("Show me all facilities").await.unwrap();
    let id = &outcome.request_id;
    let outputs = pipeline.outputs();

    assert_eq!(outcome.replans, 1);
    assert_eq!(versions(&outputs.plan, id).await, vec![1, 2]);
    assert_eq!(versions(&outputs.critique, id).await, vec![1, 2]);

    let meta = outputs.meta.get_by_request_id(id).await.unwrap().unwrap();
    assert!(meta.should_replan);

    let plan = outputs.plan.get_by_request_id(id).await.unwrap().unwrap();
    assert_eq!(plan.revised_from_critique, Some(1));
    assert_eq!(model.calls_matching("previous plan was rejected"), 1);

    assert_eq!(
        outcome.context.agent_chain,
        vec![
            StageName::ComplexityDetector,
            StageName::ThoughtAgent,
            StageName::PlannerAgent,
            StageName::CriticAgent,
            StageName::MetaAgent,
            StageName::ExecutorAgent,
            StageName::SummaryAgent,
        ]
    );
    assert_eq!(outcome.context.status, RequestStatus::Completed);
}

#[tokio::test]
async fn endless_rejection_hits_replan_limit() {
    let model = Arc::new(
        ScriptedModel::new()
            .on(THOUGHT, GOOD_THOUGHT)
            .on(PLANNER, GOOD_PLAN)
            .on(CRITIC, REJECT)
            .on(SUMMARY, GOOD_SUMMARY),
    );
    let pipeline = controller(&model);
    let err = pipeline.run("Show me all facilities").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ReplanLimitExceeded { limit: 3, .. }
    ));

    let failed = pipeline
        .contexts()
        .get_all(&Default::default())
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(failed.status, RequestStatus::Failed);
    assert_eq!(versions(&pipeline.outputs().plan, &failed.request_id).await, vec![1, 2, 3, 4]);
    assert_eq!(model.calls_matching(SUMMARY), 0);
}

#[tokio::test]
async fn low_confidence_deepens_reasoning() {
    let model = Arc::new(
        ScriptedModel::new()
            .on(THOUGHT, r#"{"reasoning": "unsure", "confidence": 0.2}"#)
            .on(PLANNER, GOOD_PLAN)
            .on(CRITIC, APPROVE)
            .on(SUMMARY, GOOD_SUMMARY),
    );
    let pipeline = controller(&model);
    let outcome = pipeline.run("Show me all facilities").await.unwrap();
    let id = &outcome.request_id;

    assert_eq!(outcome.deepens, 2);
    assert_eq!(outcome.replans, 0);
    let thoughts = pipeline
        .outputs()
        .thought
        .get_all_versions_by_request_id(id)
        .await
        .unwrap();
    let passes: Vec<u8> = thoughts.iter().map(|t| t.reasoning_passes).collect();
    assert_eq!(passes, vec![1, 2, 3]);
    // 1 + 2 + 3 thought calls.
    assert_eq!(model.calls_matching(THOUGHT), 6);
    assert_eq!(outcome.context.status, RequestStatus::Completed);
}

#[tokio::test]
async fn hallucinated_tool_is_caught_and_replanned() {
    let model = Arc::new(
        ScriptedModel::new()
            .on(THOUGHT, GOOD_THOUGHT)
            .on(
                PLANNER,
                r#"{"steps": [{"order": 1, "description": "both at once", "action": "multi_tool_use.parallel"}]}"#,
            )
            .on(PLANNER, GOOD_PLAN)
            .on(CRITIC, APPROVE)
            .on(SUMMARY, GOOD_SUMMARY),
    );
    let pipeline = controller(&model);
    let outcome = pipeline.run("Show me all facilities").await.unwrap();

    let critiques = pipeline
        .outputs()
        .critique
        .get_all_versions_by_request_id(&outcome.request_id)
        .await
        .unwrap();
    assert_eq!(critiques.len(), 2);
    assert_eq!(critiques[0].recommendation, Recommendation::Reject);
    assert!(critiques[0].issues.iter().any(|i| {
        i.category == IssueCategory::Feasibility && i.description.contains("multi_tool_use.parallel")
    }));
    assert!(critiques[1].issues.is_empty());
}

#[tokio::test]
async fn failed_stage_can_be_resumed() {
    let model = Arc::new(
        ScriptedModel::new()
            .on(THOUGHT, GOOD_THOUGHT)
            .on(PLANNER, GOOD_PLAN)
            .on(CRITIC, APPROVE)
            .fail_on(SUMMARY, "503 service unavailable")
            .on(SUMMARY, GOOD_SUMMARY),
    );
    let pipeline = controller(&model);
    let err = pipeline.run("Show me all facilities").await.unwrap_err();
    assert!(matches!(err, PipelineError::LlmUnavailable(_)));

    let failed = pipeline
        .contexts()
        .get_all(&Default::default())
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(failed.status, RequestStatus::Failed);
    assert_eq!(failed.current_stage, Some(StageName::SummaryAgent));
    assert!(failed.last_error.as_deref().unwrap().contains("503"));

    let outcome = pipeline.resume(&failed.request_id).await.unwrap();
    assert_eq!(outcome.context.status, RequestStatus::Completed);
    assert!(outcome.summary.is_some());
    let outputs = pipeline.outputs();
    assert_eq!(versions(&outputs.execution, &failed.request_id).await, vec![1]);
    assert_eq!(versions(&outputs.summary, &failed.request_id).await, vec![1]);
    assert_eq!(model.calls_matching(THOUGHT), 1);

    // Resuming a finished chain is a no-op.
    let again = pipeline.resume(&failed.request_id).await.unwrap();
    assert_eq!(again.summary.unwrap().version(), 1);
    assert_eq!(model.calls_matching(SUMMARY), 2);
}

#[tokio::test]
async fn in_progress_request_is_not_resumed() {
    let model = Arc::new(happy_model());
    let pipeline = controller(&model);
    let mut ctx = RequestContext::new(Some("Show me all facilities".into()));
    ctx.begin_stage(StageName::PlannerAgent).unwrap();
    pipeline.contexts().save(&ctx).await.unwrap();

    let err = pipeline.resume(&ctx.request_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::StageConflict { ref holder, .. } if holder == "planner-agent"));
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn cancelled_run_stops_then_resumes() {
    let model = Arc::new(happy_model());
    let pipeline = controller(&model);
    let token = CancellationToken::new();
    token.cancel();

    let outcome = pipeline
        .run_with_cancel("Show me all facilities", token)
        .await
        .unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.context.status, RequestStatus::Pending);
    assert_eq!(outcome.context.agent_chain, vec![StageName::ComplexityDetector]);
    assert!(model.prompts().is_empty());

    let resumed = pipeline.resume(&outcome.request_id).await.unwrap();
    assert_eq!(resumed.context.status, RequestStatus::Completed);
    assert_eq!(resumed.context.agent_chain.len(), 6);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let model = Arc::new(happy_model());
    let pipeline = controller(&model);
    assert!(matches!(
        pipeline.run("   ").await,
        Err(PipelineError::Validation { .. })
    ));
    assert_eq!(pipeline.contexts().count().await.unwrap(), 0);
}

#[tokio::test]
async fn independent_requests_run_concurrently() {
    let model = Arc::new(happy_model());
    let pipeline = controller(&model);
    let (a, b) = tokio::join!(
        pipeline.run("Show me all facilities"),
        pipeline.run("Show me every facility in Ohio"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.request_id, b.request_id);
    assert_eq!(pipeline.contexts().count().await.unwrap(), 2);
    for id in [&a.request_id, &b.request_id] {
        assert_eq!(versions(&pipeline.outputs().plan, id).await, vec![1]);
    }
}

#[tokio::test]
async fn seeded_example_sets_reasoning_depth() {
    let embedder = Arc::new(HashEmbedder::new(128));
    let memories = ExampleMemories::in_memory(embedder);
    memories
        .seed(ExampleSeed {
            complexity: vec![NewExample {
                query: "compare shipment risk across all facilities".into(),
                payload: ComplexityExample {
                    complexity_score: 0.9,
                    reasoning_passes: 3,
                    confidence: 0.95,
                    category: Some("comparison".into()),
                },
            }],
            ..Default::default()
        })
        .await
        .unwrap();

    let model = Arc::new(happy_model());
    let pipeline = PipelineBuilder::new(config())
        .with_llm(model.clone())
        .with_memories(memories)
        .with_tool_invoker(Arc::new(FacilityTools))
        .build()
        .unwrap();

    let outcome = pipeline
        .run("Compare shipment risk across all facilities")
        .await
        .unwrap();
    assert_eq!(outcome.context.reasoning_passes(), 3);
    assert_eq!(model.calls_matching(THOUGHT), 3);
}

#[tokio::test]
async fn planner_without_thought_is_missing_dependency() {
    let model = Arc::new(ScriptedModel::new().on(PLANNER, GOOD_PLAN));
    let contexts = RequestContextStore::in_memory();
    let outputs = OutputStores::in_memory();
    let env = Arc::new(StageEnv::new(
        contexts.clone(),
        outputs.clone(),
        model.clone(),
        InvokeConfig::default(),
        Duration::from_secs(5),
    ));
    let planner = PlannerStage::new(
        env,
        Arc::new(thoughtline_core::memory::ExampleMemory::in_memory(Arc::new(
            HashEmbedder::new(64),
        ))),
        RetrievalConfig::default(),
        Arc::new(StaticToolCatalog::new(registry())),
    );

    let ctx = RequestContext::new(Some("Show me all facilities".into()));
    contexts.save(&ctx).await.unwrap();
    let err = planner
        .process(PlanRequest::default(), ctx.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MissingDependency {
            stage: StageName::PlannerAgent,
            dependency: StageName::ThoughtAgent,
            ..
        }
    ));
    assert_eq!(outputs.plan.count().await.unwrap(), 0);
    let stored = contexts.get(&ctx.request_id).await.unwrap();
    assert_eq!(stored.status, RequestStatus::Pending);
    assert!(stored.agent_chain.is_empty());
}
