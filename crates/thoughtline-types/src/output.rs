//! Versioned stage outputs.
//!
//! Every stage invocation produces one record keyed by `request_id` plus a
//! monotonically increasing `version`. Records are never mutated in place;
//! a re-plan or re-summary appends a new version.
//!
//! Each output type implements [`VersionedRecord`], which is what the
//! versioned store in `thoughtline-core` is generic over. For crossing an
//! untyped boundary (files, HTTP), [`StageEnvelope`] wraps the closed
//! [`StageOutput`] sum type with an explicit schema version.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::{ComplexityScore, RequestContext, StageName};
use crate::error::{PipelineError, Result};

/// Version value meaning "not yet assigned by the store".
pub const UNASSIGNED_VERSION: u32 = 0;

/// Current schema version of [`StageEnvelope`].
pub const STAGE_SCHEMA_VERSION: u32 = 1;

fn default_version() -> u32 {
    1
}

fn default_passes() -> u8 {
    crate::context::MIN_REASONING_PASSES
}

// ── Shared header ───────────────────────────────────────────────────────

/// Fields every stage output carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMeta {
    /// The request this output belongs to.
    #[serde(alias = "requestId")]
    pub request_id: String,
    /// Version within `(stage, request_id)`; absent in stored data means 1.
    #[serde(default = "default_version")]
    pub version: u32,
    /// When the output was produced.
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the request context at production time.
    #[serde(alias = "requestContext")]
    pub request_context: RequestContext,
}

impl OutputMeta {
    /// Header for a fresh output; the store assigns the version on save.
    pub fn new(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            version: UNASSIGNED_VERSION,
            timestamp: Utc::now(),
            request_context: ctx.clone(),
        }
    }
}

/// A stage output stored under `(request_id, version)`.
pub trait VersionedRecord:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The stage that produces this record.
    const STAGE: StageName;

    /// Shared header.
    fn meta(&self) -> &OutputMeta;

    /// Mutable shared header (used by the store to assign versions).
    fn meta_mut(&mut self) -> &mut OutputMeta;

    /// Primary numeric score, for range filtering.
    fn score(&self) -> Option<f32> {
        None
    }

    /// Confidence, for range filtering.
    fn confidence(&self) -> Option<f32> {
        None
    }

    /// Shorthand for `self.meta().request_id`.
    fn request_id(&self) -> &str {
        &self.meta().request_id
    }

    /// Shorthand for `self.meta().version`.
    fn version(&self) -> u32 {
        self.meta().version
    }
}

// ── Complexity ──────────────────────────────────────────────────────────

/// Output of the complexity detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    #[serde(flatten)]
    pub meta: OutputMeta,
    /// The classified query.
    pub query: String,
    /// The resulting directive.
    pub complexity: ComplexityScore,
}

// ── Thought ─────────────────────────────────────────────────────────────

/// Structured reasoning about the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    #[serde(flatten)]
    pub meta: OutputMeta,
    /// Final reasoning text.
    pub reasoning: String,
    /// Distilled insights.
    #[serde(default, alias = "keyInsights")]
    pub key_insights: Vec<String>,
    /// Suggested approach.
    #[serde(default)]
    pub approach: String,
    /// Anticipated difficulties.
    #[serde(default)]
    pub challenges: Vec<String>,
    /// Self-reported confidence; `None` when the model never gave one.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// How many passes were run.
    #[serde(default = "default_passes", alias = "reasoningPasses")]
    pub reasoning_passes: u8,
    /// Reasoning text of each pass, in order.
    #[serde(default)]
    pub passes: Vec<String>,
}

// ── Plan ────────────────────────────────────────────────────────────────

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position.
    pub order: u32,
    /// What the step does.
    pub description: String,
    /// External tool to call; `None` for reasoning-only steps.
    #[serde(default)]
    pub action: Option<String>,
    /// Tool arguments.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// An ordered, tool-referencing plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(flatten)]
    pub meta: OutputMeta,
    /// Steps ordered by `order`.
    pub steps: Vec<Step>,
    /// Why this plan answers the query.
    #[serde(default)]
    pub rationale: String,
    /// Version of the thought the plan was built from.
    #[serde(default = "default_version", alias = "thoughtVersion")]
    pub thought_version: u32,
    /// Critique version that triggered this replan, if any.
    #[serde(default, alias = "revisedFromCritique")]
    pub revised_from_critique: Option<u32>,
}

impl Plan {
    /// Tool names referenced by the plan, in step order.
    pub fn actions(&self) -> impl Iterator<Item = (&Step, &str)> {
        self.steps
            .iter()
            .filter_map(|s| s.action.as_deref().map(|a| (s, a)))
    }
}

// ── Critique ────────────────────────────────────────────────────────────

/// Verdict on a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Execute as-is.
    Approve,
    /// Usable but should be improved.
    Revise,
    /// Must not be executed.
    Reject,
}

/// How serious an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High or critical.
    pub fn is_blocking(&self) -> bool {
        *self >= Severity::High
    }
}

/// What an issue is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Feasibility,
    Completeness,
    Correctness,
    Efficiency,
    Clarity,
    #[serde(other)]
    Other,
}

/// A single problem found in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub suggestion: Option<String>,
    /// Step the issue refers to, if any.
    #[serde(default, alias = "stepOrder")]
    pub step_order: Option<u32>,
}

/// Critique of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    #[serde(flatten)]
    pub meta: OutputMeta,
    /// Version of the plan that was critiqued.
    #[serde(default = "default_version", alias = "planVersion")]
    pub plan_version: u32,
    /// Overall quality in `0.0..=1.0`.
    #[serde(alias = "overallScore")]
    pub overall_score: f32,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default, alias = "followUpQuestions")]
    pub follow_up_questions: Vec<String>,
}

impl Critique {
    /// Whether any issue is high severity or worse.
    pub fn has_blocking_issue(&self) -> bool {
        self.issues.iter().any(|i| i.severity.is_blocking())
    }
}

// ── Meta ────────────────────────────────────────────────────────────────

/// Meta-assessment of the reasoning so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaAssessment {
    #[serde(flatten)]
    pub meta: OutputMeta,
    /// Quality of the reasoning chain in `0.0..=1.0`.
    #[serde(alias = "reasoningQuality")]
    pub reasoning_quality: f32,
    /// Send control back to the planner.
    #[serde(alias = "shouldReplan")]
    pub should_replan: bool,
    /// Send control back to the thought stage with more passes.
    #[serde(alias = "shouldDeepenReasoning")]
    pub should_deepen_reasoning: bool,
    #[serde(default, alias = "recommendedActions")]
    pub recommended_actions: Vec<String>,
    /// Human-readable account of the decision.
    #[serde(default)]
    pub rationale: String,
}

// ── Execution ───────────────────────────────────────────────────────────

/// Outcome of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// No tool to call (reasoning-only step) or tool not registered.
    Skipped,
}

/// Result of executing one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub order: u32,
    #[serde(default)]
    pub action: Option<String>,
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "durationMs")]
    pub duration_ms: u64,
}

/// Output of the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    #[serde(flatten)]
    pub meta: OutputMeta,
    /// Version of the plan that was executed.
    #[serde(default = "default_version", alias = "planVersion")]
    pub plan_version: u32,
    pub results: Vec<StepResult>,
}

impl Execution {
    /// Number of steps with the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

// ── Summary ─────────────────────────────────────────────────────────────

/// Final user-facing summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(flatten)]
    pub meta: OutputMeta,
    pub summary: String,
    #[serde(default, alias = "keyFindings")]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default = "default_version", alias = "thoughtVersion")]
    pub thought_version: u32,
    #[serde(default = "default_version", alias = "executionVersion")]
    pub execution_version: u32,
}

// ── VersionedRecord impls ───────────────────────────────────────────────

macro_rules! versioned {
    ($ty:ty, $stage:expr) => {
        versioned!($ty, $stage, |_r| None, |_r| None);
    };
    ($ty:ty, $stage:expr, $score:expr, $confidence:expr) => {
        impl VersionedRecord for $ty {
            const STAGE: StageName = $stage;

            fn meta(&self) -> &OutputMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut OutputMeta {
                &mut self.meta
            }

            fn score(&self) -> Option<f32> {
                let f: fn(&$ty) -> Option<f32> = $score;
                f(self)
            }

            fn confidence(&self) -> Option<f32> {
                let f: fn(&$ty) -> Option<f32> = $confidence;
                f(self)
            }
        }
    };
}

versioned!(
    ComplexityAssessment,
    StageName::ComplexityDetector,
    |r| Some(r.complexity.score),
    |r| Some(r.complexity.confidence)
);
versioned!(Thought, StageName::ThoughtAgent, |_r| None, |r| r.confidence);
versioned!(Plan, StageName::PlannerAgent);
versioned!(
    Critique,
    StageName::CriticAgent,
    |r| Some(r.overall_score),
    |_r| None
);
versioned!(
    MetaAssessment,
    StageName::MetaAgent,
    |r| Some(r.reasoning_quality),
    |_r| None
);
versioned!(Execution, StageName::ExecutorAgent);
versioned!(Summary, StageName::SummaryAgent, |_r| None, |r| r.confidence);

// ── Boundary sum type ───────────────────────────────────────────────────

/// Closed sum of every stage output kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    Complexity(ComplexityAssessment),
    Thought(Thought),
    Plan(Plan),
    Critique(Critique),
    Meta(MetaAssessment),
    Execution(Execution),
    Summary(Summary),
}

impl StageOutput {
    /// The stage that produced the output.
    pub fn stage(&self) -> StageName {
        match self {
            StageOutput::Complexity(_) => StageName::ComplexityDetector,
            StageOutput::Thought(_) => StageName::ThoughtAgent,
            StageOutput::Plan(_) => StageName::PlannerAgent,
            StageOutput::Critique(_) => StageName::CriticAgent,
            StageOutput::Meta(_) => StageName::MetaAgent,
            StageOutput::Execution(_) => StageName::ExecutorAgent,
            StageOutput::Summary(_) => StageName::SummaryAgent,
        }
    }

    /// Shared header of the wrapped output.
    pub fn meta(&self) -> &OutputMeta {
        match self {
            StageOutput::Complexity(o) => &o.meta,
            StageOutput::Thought(o) => &o.meta,
            StageOutput::Plan(o) => &o.meta,
            StageOutput::Critique(o) => &o.meta,
            StageOutput::Meta(o) => &o.meta,
            StageOutput::Execution(o) => &o.meta,
            StageOutput::Summary(o) => &o.meta,
        }
    }
}

/// Schema-versioned wrapper for a [`StageOutput`] crossing an untyped
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEnvelope {
    #[serde(alias = "schemaVersion")]
    pub schema_version: u32,
    #[serde(flatten)]
    pub output: StageOutput,
}

impl StageEnvelope {
    /// Wrap an output at the current schema version.
    pub fn new(output: StageOutput) -> Self {
        Self {
            schema_version: STAGE_SCHEMA_VERSION,
            output,
        }
    }

    /// Decode an envelope, rejecting unknown kinds and schema versions.
    pub fn decode(value: serde_json::Value) -> Result<Self> {
        let schema = value
            .get("schema_version")
            .or_else(|| value.get("schemaVersion"))
            .and_then(|v| v.as_u64());
        match schema {
            Some(v) if v == u64::from(STAGE_SCHEMA_VERSION) => {}
            Some(v) => {
                return Err(PipelineError::validation(format!(
                    "unsupported stage output schema version {v}"
                )));
            }
            None => {
                return Err(PipelineError::validation(
                    "stage output is missing schema_version",
                ));
            }
        }
        serde_json::from_value(value)
            .map_err(|e| PipelineError::validation(format!("unrecognized stage output: {e}")))
    }
}
