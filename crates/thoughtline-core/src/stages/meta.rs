//! Meta stage: decides whether the chain should replan or deepen its
//! reasoning. Purely deterministic; no model call.

use std::sync::Arc;

use async_trait::async_trait;
use thoughtline_types::config::MetaConfig;
use thoughtline_types::context::{RequestContext, StageName};
use thoughtline_types::output::{Critique, MetaAssessment, OutputMeta, Plan, Recommendation, Thought};
use thoughtline_types::Result;
use tracing::debug;

use super::{Stage, StageEnv};

/// Everything the meta stage may look at. All fields are optional.
#[derive(Debug, Clone, Default)]
pub struct MetaRequest {
    pub thought: Option<Thought>,
    pub plan: Option<Plan>,
    pub critique: Option<Critique>,
    /// Explicit confidence; the thought's own confidence otherwise.
    pub confidence: Option<f32>,
}

/// The decision, before it is stamped into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDecision {
    pub reasoning_quality: f32,
    pub should_replan: bool,
    pub should_deepen_reasoning: bool,
    pub recommended_actions: Vec<String>,
    pub rationale: String,
}

/// Apply the replan / deepen policy.
///
/// Replan when the critique rejects or scores below the replan floor.
/// Deepen when a confidence is known and below the deepen floor. Both may
/// hold at once; the controller decides precedence.
pub fn assess(config: &MetaConfig, input: &MetaRequest) -> MetaDecision {
    let confidence = input
        .confidence
        .or_else(|| input.thought.as_ref().and_then(|t| t.confidence));

    let mut actions = Vec::new();
    let mut reasons = Vec::new();

    let should_replan = match input.critique {
        Some(ref c) if c.recommendation == Recommendation::Reject => {
            reasons.push(format!("critique v{} rejected the plan", c.meta.version));
            true
        }
        Some(ref c) if c.overall_score < config.replan_score_floor => {
            reasons.push(format!(
                "critique score {:.2} is below {:.2}",
                c.overall_score, config.replan_score_floor
            ));
            true
        }
        _ => false,
    };
    if should_replan && let Some(ref c) = input.critique {
        let blocking = c.issues.iter().filter(|i| i.severity.is_blocking()).count();
        actions.push(format!(
            "replan addressing {} issue(s), {blocking} blocking",
            c.issues.len()
        ));
    }

    let should_deepen_reasoning = confidence.is_some_and(|c| c < config.deepen_confidence_floor);
    if let Some(c) = confidence
        && should_deepen_reasoning
    {
        reasons.push(format!(
            "reasoning confidence {c:.2} is below {:.2}",
            config.deepen_confidence_floor
        ));
        actions.push("deepen reasoning with an extra pass".to_string());
    }

    if !should_replan && !should_deepen_reasoning {
        actions.push("proceed to execution".to_string());
        reasons.push("no replan or deepen signal".to_string());
    }

    let signals: Vec<f32> = input
        .critique
        .as_ref()
        .map(|c| c.overall_score)
        .into_iter()
        .chain(confidence)
        .collect();
    let reasoning_quality = if signals.is_empty() {
        0.0
    } else {
        signals.iter().sum::<f32>() / signals.len() as f32
    };

    MetaDecision {
        reasoning_quality,
        should_replan,
        should_deepen_reasoning,
        recommended_actions: actions,
        rationale: reasons.join("; "),
    }
}

pub struct MetaStage {
    env: Arc<StageEnv>,
    config: MetaConfig,
}

impl MetaStage {
    pub fn new(env: Arc<StageEnv>, config: MetaConfig) -> Self {
        Self { env, config }
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    async fn decide(&self, input: &MetaRequest, ctx: &RequestContext) -> Result<MetaAssessment> {
        let d = assess(&self.config, input);
        debug!(
            request_id = %ctx.request_id,
            quality = d.reasoning_quality,
            replan = d.should_replan,
            deepen = d.should_deepen_reasoning,
            "meta decision"
        );
        let record = MetaAssessment {
            meta: OutputMeta::new(ctx),
            reasoning_quality: d.reasoning_quality,
            should_replan: d.should_replan,
            should_deepen_reasoning: d.should_deepen_reasoning,
            recommended_actions: d.recommended_actions,
            rationale: d.rationale,
        };
        self.env.outputs.meta.save(record).await
    }
}

#[async_trait]
impl Stage for MetaStage {
    type Input = MetaRequest;
    type Output = MetaAssessment;
    const NAME: StageName = StageName::MetaAgent;

    async fn process(
        &self,
        input: MetaRequest,
        ctx: RequestContext,
    ) -> Result<(MetaAssessment, RequestContext)> {
        let ctx = self.env.enter(Self::NAME, ctx).await?;
        let result = self.decide(&input, &ctx).await;
        self.env.finish(ctx, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{env, request};
    use thoughtline_llm::ScriptedModel;
    use thoughtline_types::output::{Issue, IssueCategory, Severity};

    fn critique(score: f32, recommendation: Recommendation) -> Critique {
        Critique {
            meta: OutputMeta::new(&RequestContext::with_id("r", None)),
            plan_version: 1,
            overall_score: score,
            recommendation,
            issues: vec![Issue {
                category: IssueCategory::Feasibility,
                severity: Severity::High,
                description: "unknown tool".into(),
                suggestion: None,
                step_order: Some(1),
            }],
            follow_up_questions: vec![],
        }
    }

    #[test]
    fn reject_means_replan() {
        let d = assess(
            &MetaConfig::default(),
            &MetaRequest {
                critique: Some(critique(0.9, Recommendation::Reject)),
                ..Default::default()
            },
        );
        assert!(d.should_replan);
        assert!(!d.should_deepen_reasoning);
        assert!(d.recommended_actions[0].contains("1 blocking"));
    }

    #[test]
    fn low_score_means_replan() {
        let d = assess(
            &MetaConfig::default(),
            &MetaRequest {
                critique: Some(critique(0.3, Recommendation::Revise)),
                ..Default::default()
            },
        );
        assert!(d.should_replan);
    }

    #[test]
    fn low_confidence_means_deepen() {
        let d = assess(
            &MetaConfig::default(),
            &MetaRequest {
                critique: Some(critique(0.8, Recommendation::Revise)),
                confidence: Some(0.2),
                ..Default::default()
            },
        );
        assert!(!d.should_replan);
        assert!(d.should_deepen_reasoning);
        assert!((d.reasoning_quality - 0.5).abs() < 1e-6);
    }

    #[test]
    fn both_flags_can_hold() {
        let d = assess(
            &MetaConfig::default(),
            &MetaRequest {
                critique: Some(critique(0.1, Recommendation::Reject)),
                confidence: Some(0.1),
                ..Default::default()
            },
        );
        assert!(d.should_replan && d.should_deepen_reasoning);
    }

    #[test]
    fn no_signals_proceeds() {
        let d = assess(&MetaConfig::default(), &MetaRequest::default());
        assert!(!d.should_replan && !d.should_deepen_reasoning);
        assert_eq!(d.recommended_actions, vec!["proceed to execution"]);
        assert_eq!(d.reasoning_quality, 0.0);
    }

    #[tokio::test]
    async fn persists_assessment() {
        let (env, model) = env(ScriptedModel::new());
        let ctx = request(&env, "q").await;
        let stage = MetaStage::new(env.clone(), MetaConfig::default());
        let (record, ctx) = stage
            .process(
                MetaRequest {
                    critique: Some(critique(0.2, Recommendation::Reject)),
                    ..Default::default()
                },
                ctx,
            )
            .await
            .unwrap();
        assert!(record.should_replan);
        assert_eq!(record.meta.version, 1);
        assert!(ctx.agent_chain.contains(&StageName::MetaAgent));
        assert!(model.prompts().is_empty());
    }
}
