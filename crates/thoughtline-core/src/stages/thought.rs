//! Thought stage: multi-pass structured reasoning about the query.
//!
//! Pass `k` sees the reasoning of pass `k - 1` and is asked to refine it.
//! A pass that answers in prose instead of JSON still contributes its text
//! as reasoning; structured fields come from the latest pass that had them.

use std::sync::Arc;

use async_trait::async_trait;
use thoughtline_types::config::RetrievalConfig;
use thoughtline_types::context::{MIN_REASONING_PASSES, RequestContext, StageName, clamp_unit};
use thoughtline_types::example::ThoughtExample;
use thoughtline_types::output::{OutputMeta, Thought};
use thoughtline_types::{PipelineError, Result};
use tracing::{debug, warn};

use super::{Stage, StageEnv, few_shot, require_query};
use crate::json_repair::{field_f64, field_str, field_str_list, parse_llm_object};
use crate::memory::ExampleMemory;
use crate::prompts;

/// Input to the thought stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThoughtRequest {
    /// Pass count override; the request's complexity directive otherwise.
    pub reasoning_passes: Option<u8>,
}

pub struct ThoughtStage {
    env: Arc<StageEnv>,
    memory: Arc<ExampleMemory<ThoughtExample>>,
    retrieval: RetrievalConfig,
    max_passes: u8,
}

impl ThoughtStage {
    pub fn new(
        env: Arc<StageEnv>,
        memory: Arc<ExampleMemory<ThoughtExample>>,
        retrieval: RetrievalConfig,
        max_passes: u8,
    ) -> Self {
        Self {
            env,
            memory,
            retrieval,
            max_passes: max_passes.max(MIN_REASONING_PASSES),
        }
    }

    async fn think(&self, query: &str, passes: u8, ctx: &RequestContext) -> Result<Thought> {
        let examples = few_shot(
            &self.memory,
            query,
            self.retrieval.top_k,
            self.retrieval.min_score,
        )
        .await;

        let mut texts: Vec<String> = Vec::with_capacity(usize::from(passes));
        let mut key_insights = Vec::new();
        let mut approach = String::new();
        let mut challenges = Vec::new();
        let mut confidence = None;

        for pass in 1..=passes {
            let prompt = prompts::thought(
                query,
                pass,
                passes,
                texts.last().map(String::as_str),
                &examples,
            );
            let text = self.env.call_llm(StageName::ThoughtAgent, &prompt).await?;

            let reasoning = match parse_llm_object(&text) {
                Some(obj) => {
                    let insights = field_str_list(&obj, &["key_insights", "keyInsights", "insights"]);
                    if !insights.is_empty() {
                        key_insights = insights;
                    }
                    if let Some(a) = field_str(&obj, &["approach", "strategy"]) {
                        approach = a;
                    }
                    let c = field_str_list(&obj, &["challenges", "risks"]);
                    if !c.is_empty() {
                        challenges = c;
                    }
                    if let Some(conf) = field_f64(&obj, &["confidence", "confidence_score", "confidenceScore"]) {
                        confidence = Some(clamp_unit(conf));
                    }
                    field_str(&obj, &["reasoning", "thought", "analysis"]).unwrap_or_default()
                }
                None => {
                    warn!(request_id = %ctx.request_id, pass, "thought pass was not JSON, keeping prose");
                    text.trim().to_string()
                }
            };
            debug!(request_id = %ctx.request_id, pass, chars = reasoning.len(), "thought pass");
            if reasoning.trim().is_empty() {
                warn!(request_id = %ctx.request_id, pass, "thought pass produced no reasoning");
                continue;
            }
            texts.push(reasoning);
        }

        let Some(reasoning) = texts.last().cloned() else {
            return Err(PipelineError::malformed(
                StageName::ThoughtAgent.as_str(),
                "no pass produced any reasoning",
            ));
        };

        let thought = Thought {
            meta: OutputMeta::new(ctx),
            reasoning,
            key_insights,
            approach,
            challenges,
            confidence,
            reasoning_passes: passes,
            passes: texts,
        };
        self.env.outputs.thought.save(thought).await
    }
}

#[async_trait]
impl Stage for ThoughtStage {
    type Input = ThoughtRequest;
    type Output = Thought;
    const NAME: StageName = StageName::ThoughtAgent;

    async fn process(
        &self,
        input: ThoughtRequest,
        ctx: RequestContext,
    ) -> Result<(Thought, RequestContext)> {
        let query = require_query(&ctx)?;
        let passes = input
            .reasoning_passes
            .unwrap_or_else(|| ctx.reasoning_passes())
            .clamp(MIN_REASONING_PASSES, self.max_passes);

        let ctx = self.env.enter(Self::NAME, ctx).await?;
        let result = self.think(&query, passes, &ctx).await;
        self.env.finish(ctx, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::hash_embedder::HashEmbedder;
    use crate::stages::test_support::{env, request};
    use thoughtline_llm::ScriptedModel;
    use thoughtline_types::context::RequestStatus;
    use thoughtline_types::example::NewExample;
    use thoughtline_types::output::VersionedRecord;

    fn stage(env: Arc<StageEnv>) -> ThoughtStage {
        ThoughtStage::new(
            env,
            Arc::new(ExampleMemory::in_memory(Arc::new(HashEmbedder::new(128)))),
            RetrievalConfig::default(),
            3,
        )
    }

    #[tokio::test]
    async fn runs_requested_passes() {
        let model = ScriptedModel::new()
            .on("pass 1 of 2", r#"{"reasoning": "first", "confidence": 0.5}"#)
            .on(
                "pass 2 of 2",
                r#"{"reasoning": "refined", "key_insights": ["a"], "confidence": 0.9}"#,
            );
        let (env, model) = env(model);
        let ctx = request(&env, "Show me all facilities").await;
        let (thought, ctx) = stage(env.clone())
            .process(
                ThoughtRequest {
                    reasoning_passes: Some(2),
                },
                ctx,
            )
            .await
            .unwrap();

        assert_eq!(thought.reasoning, "refined");
        assert_eq!(thought.passes, vec!["first", "refined"]);
        assert_eq!(thought.confidence, Some(0.9));
        assert_eq!(thought.version(), 1);
        assert_eq!(ctx.status, RequestStatus::Completed);
        assert_eq!(
            ctx.agent_chain,
            vec![StageName::ComplexityDetector, StageName::ThoughtAgent]
        );
        // Pass 2 saw pass 1.
        assert!(model.prompts()[1].contains("first"));
    }

    #[tokio::test]
    async fn prose_answer_has_no_confidence() {
        let (env, _) = env(ScriptedModel::new().with_fallback("Just list every facility."));
        let ctx = request(&env, "Show me all facilities").await;
        let (thought, _) = stage(env)
            .process(ThoughtRequest::default(), ctx)
            .await
            .unwrap();
        assert_eq!(thought.reasoning, "Just list every facility.");
        assert_eq!(thought.confidence, None);
        assert_eq!(thought.reasoning_passes, 1);
    }

    #[tokio::test]
    async fn examples_are_offered_and_counted() {
        let (env, model) = env(ScriptedModel::new().with_fallback(r#"{"reasoning": "r"}"#));
        let memory = Arc::new(ExampleMemory::in_memory(Arc::new(HashEmbedder::new(128))));
        let stored = memory
            .store(NewExample {
                query: "show me all facilities".into(),
                payload: ThoughtExample {
                    reasoning: "a direct listing".into(),
                    key_insights: vec![],
                    approach: "call list_facilities".into(),
                },
            })
            .await
            .unwrap();
        let stage = ThoughtStage::new(env.clone(), memory.clone(), RetrievalConfig::default(), 3);
        let ctx = request(&env, "Show me all facilities").await;
        stage.process(ThoughtRequest::default(), ctx).await.unwrap();

        assert!(model.prompts()[0].contains("call list_facilities"));
        assert_eq!(memory.get(&stored.id).await.unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn llm_failure_marks_request_failed() {
        let (env, _) = env(ScriptedModel::new().fail_on("thought-agent", "503"));
        let ctx = request(&env, "q").await;
        let id = ctx.request_id.clone();
        let err = stage(env.clone())
            .process(ThoughtRequest::default(), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LlmUnavailable(_)));
        let stored = env.contexts.get(&id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Failed);
        assert!(env.outputs.thought.get_by_request_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_query_is_rejected_without_side_effects() {
        let (env, model) = env(ScriptedModel::new());
        let ctx = RequestContext::new(None);
        env.contexts.save(&ctx).await.unwrap();
        let err = stage(env.clone())
            .process(ThoughtRequest::default(), ctx.clone())
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(env.contexts.get(&ctx.request_id).await.unwrap().status, RequestStatus::Pending);
        assert!(model.prompts().is_empty());
    }
}
