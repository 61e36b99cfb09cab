//! Critic stage: scores the latest plan and validates its tool references.
//!
//! The model's review is merged with the deterministic tool validation from
//! [`crate::tools::validate_actions`]. Two rules keep the verdict
//! consistent with the issues:
//!
//! - a blocking (high or critical) tool issue forces `reject`;
//! - `reject` without any blocking issue is downgraded to `revise`.
//!
//! Feasibility issues the model raises against a registered tool the plan
//! actually uses are dropped before either rule applies, and the verdict is
//! re-derived from what remains.
//!
//! When the model's answer is unusable the critique is derived from the
//! validation issues alone.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thoughtline_types::context::{RequestContext, StageName, clamp_unit};
use thoughtline_types::output::{
    Critique, Issue, IssueCategory, OutputMeta, Plan, Recommendation, Severity, VersionedRecord,
};
use thoughtline_types::Result;
use tracing::{debug, warn};

use super::{Stage, StageEnv, missing, require_query};
use crate::json_repair::{field, field_f64, field_str, field_str_list, parse_llm_object};
use crate::prompts;
use crate::tools::{ToolCatalog, validate_actions};

pub struct CriticStage {
    env: Arc<StageEnv>,
    catalog: Arc<dyn ToolCatalog>,
}

impl CriticStage {
    pub fn new(env: Arc<StageEnv>, catalog: Arc<dyn ToolCatalog>) -> Self {
        Self { env, catalog }
    }

    async fn critique(&self, query: &str, plan: &Plan, ctx: &RequestContext) -> Result<Critique> {
        let registry = self.catalog.list();
        let tool_issues = validate_actions(plan, &registry);
        let prompt = prompts::critique(query, plan, &registry);
        let text = self.env.call_llm(StageName::CriticAgent, &prompt).await?;

        let review = parse_review(&text);
        if review.is_none() {
            warn!(
                request_id = %ctx.request_id,
                "critique response unusable, deriving verdict from tool validation"
            );
        }
        let verdict = merge(review, tool_issues, plan, &registry);
        debug!(
            request_id = %ctx.request_id,
            plan_version = plan.version(),
            score = verdict.score,
            recommendation = ?verdict.recommendation,
            issues = verdict.issues.len(),
            "critique"
        );

        let critique = Critique {
            meta: OutputMeta::new(ctx),
            plan_version: plan.version(),
            overall_score: verdict.score,
            recommendation: verdict.recommendation,
            issues: verdict.issues,
            follow_up_questions: verdict.follow_up_questions,
        };
        self.env.outputs.critique.save(critique).await
    }
}

#[async_trait]
impl Stage for CriticStage {
    type Input = ();
    type Output = Critique;
    const NAME: StageName = StageName::CriticAgent;

    async fn process(&self, _input: (), ctx: RequestContext) -> Result<(Critique, RequestContext)> {
        let query = require_query(&ctx)?;
        let plan = self
            .env
            .outputs
            .plan
            .get_by_request_id(&ctx.request_id)
            .await?
            .ok_or_else(|| missing(Self::NAME, StageName::PlannerAgent, &ctx))?;

        let ctx = self.env.enter(Self::NAME, ctx).await?;
        let result = self.critique(&query, &plan, &ctx).await;
        self.env.finish(ctx, result).await
    }
}

// ── Parsing and merging ─────────────────────────────────────────────────

/// What the model said, as far as it could be read.
#[derive(Debug, Default)]
struct Review {
    score: Option<f32>,
    recommendation: Option<Recommendation>,
    issues: Vec<Issue>,
    follow_up_questions: Vec<String>,
}

#[derive(Debug)]
struct Verdict {
    score: f32,
    recommendation: Recommendation,
    issues: Vec<Issue>,
    follow_up_questions: Vec<String>,
}

/// `None` when the text carries neither a score nor a recommendation.
fn parse_review(text: &str) -> Option<Review> {
    let obj = parse_llm_object(text)?;
    let score = field_f64(&obj, &["overall_score", "overallScore", "score"]).map(clamp_unit);
    let recommendation = field_str(&obj, &["recommendation", "verdict", "decision"])
        .and_then(|r| parse_recommendation(&r));
    if score.is_none() && recommendation.is_none() {
        return None;
    }
    let issues = match field(&obj, &["issues", "problems"]) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| i.as_object().and_then(parse_issue))
            .collect(),
        _ => Vec::new(),
    };
    Some(Review {
        score,
        recommendation,
        issues,
        follow_up_questions: field_str_list(
            &obj,
            &["follow_up_questions", "followUpQuestions", "questions"],
        ),
    })
}

fn parse_recommendation(raw: &str) -> Option<Recommendation> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "approve" | "approved" | "accept" | "accepted" => Some(Recommendation::Approve),
        "revise" | "revision" | "needs_revision" | "needs revision" => Some(Recommendation::Revise),
        "reject" | "rejected" => Some(Recommendation::Reject),
        _ => None,
    }
}

fn parse_severity(raw: &str) -> Severity {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" | "minor" => Severity::Low,
        "high" | "major" => Severity::High,
        "critical" | "blocker" => Severity::Critical,
        _ => Severity::Medium,
    }
}

fn parse_category(raw: &str) -> IssueCategory {
    serde_json::from_value(Value::String(raw.trim().to_ascii_lowercase()))
        .unwrap_or(IssueCategory::Other)
}

fn parse_issue(obj: &Map<String, Value>) -> Option<Issue> {
    let description = field_str(obj, &["description", "issue", "problem"])?
        .trim()
        .to_string();
    if description.is_empty() {
        return None;
    }
    Some(Issue {
        category: field_str(obj, &["category", "type"])
            .map(|c| parse_category(&c))
            .unwrap_or(IssueCategory::Other),
        severity: field_str(obj, &["severity", "priority"])
            .map(|s| parse_severity(&s))
            .unwrap_or(Severity::Medium),
        description,
        suggestion: field_str(obj, &["suggestion", "fix", "recommendation"]),
        step_order: field_f64(obj, &["step_order", "stepOrder", "step"])
            .filter(|s| s.is_finite() && *s >= 1.0)
            .map(|s| s as u32),
    })
}

fn penalty(severity: Severity) -> f32 {
    match severity {
        Severity::Low => 0.05,
        Severity::Medium => 0.2,
        Severity::High => 0.4,
        Severity::Critical => 0.6,
    }
}

fn score_from_issues(issues: &[Issue]) -> f32 {
    (1.0 - issues.iter().map(|i| penalty(i.severity)).sum::<f32>()).max(0.0)
}

fn recommendation_from_issues(issues: &[Issue]) -> Recommendation {
    if issues.iter().any(|i| i.severity.is_blocking()) {
        Recommendation::Reject
    } else if issues.iter().any(|i| i.severity >= Severity::Medium) {
        Recommendation::Revise
    } else {
        Recommendation::Approve
    }
}

/// Registered tools the plan calls.
fn registered_actions<'a>(plan: &'a Plan, registry: &[String]) -> Vec<&'a str> {
    plan.steps
        .iter()
        .filter_map(|s| s.action.as_deref())
        .filter(|a| registry.iter().any(|r| r == a))
        .collect()
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// `name` occurs in `text` as a whole identifier, not inside a longer one.
fn names_tool(text: &str, name: &str) -> bool {
    let text = text.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();
    text.match_indices(&name).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + name.len()..].chars().next();
        !before.is_some_and(is_name_char) && !after.is_some_and(is_name_char)
    })
}

/// A model feasibility complaint about a tool that is registered and used.
fn flags_registered_tool(issue: &Issue, plan: &Plan, used: &[&str]) -> bool {
    if issue.category != IssueCategory::Feasibility {
        return false;
    }
    let by_step = issue.step_order.is_some_and(|order| {
        plan.steps
            .iter()
            .find(|s| s.order == order)
            .and_then(|s| s.action.as_deref())
            .is_some_and(|a| used.contains(&a))
    });
    by_step || used.iter().any(|a| names_tool(&issue.description, a))
}

fn merge(
    review: Option<Review>,
    tool_issues: Vec<Issue>,
    plan: &Plan,
    registry: &[String],
) -> Verdict {
    let tool_blocking = tool_issues.iter().any(|i| i.severity.is_blocking());
    let review = review.unwrap_or_default();

    let used = registered_actions(plan, registry);
    let raised = review.issues.len();
    let mut issues: Vec<Issue> = review
        .issues
        .into_iter()
        .filter(|i| !flags_registered_tool(i, plan, &used))
        .collect();
    let dropped = raised - issues.len();
    issues.extend(tool_issues);

    let mut score = review.score.unwrap_or_else(|| score_from_issues(&issues));
    let mut recommendation = review
        .recommendation
        .unwrap_or_else(|| recommendation_from_issues(&issues));

    if dropped > 0 {
        warn!(dropped, "review flagged registered tools, ignoring those issues");
        recommendation = recommendation_from_issues(&issues);
        score = score.max(score_from_issues(&issues));
    }
    if tool_blocking {
        recommendation = Recommendation::Reject;
        score = score.min(score_from_issues(&issues));
    }
    if recommendation == Recommendation::Reject && !issues.iter().any(|i| i.severity.is_blocking()) {
        warn!("reject without a blocking issue, downgrading to revise");
        recommendation = Recommendation::Revise;
    }

    Verdict {
        score,
        recommendation,
        issues,
        follow_up_questions: review.follow_up_questions,
    }
}
