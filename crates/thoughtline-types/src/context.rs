//! Per-request state machine record.
//!
//! A [`RequestContext`] is created once by the complexity detector and then
//! read-modify-written by every stage that touches the request. The record
//! tracks which stages ran (in order, without duplicates), the lifecycle
//! status, and the complexity directive downstream stages read.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

// ── StageName ───────────────────────────────────────────────────────────

/// Name of a processing stage, as recorded in the agent chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Classifies the query into a reasoning-depth directive.
    ComplexityDetector,
    /// Produces structured reasoning about the query.
    ThoughtAgent,
    /// Turns reasoning into an ordered, tool-referencing plan.
    PlannerAgent,
    /// Scores the plan and validates referenced tools.
    CriticAgent,
    /// Decides whether to replan or deepen reasoning.
    MetaAgent,
    /// Runs the plan's steps against external tools.
    ExecutorAgent,
    /// Summarizes reasoning and execution for the user.
    SummaryAgent,
}

impl StageName {
    /// Every stage, in canonical pipeline order.
    pub const ALL: [StageName; 7] = [
        StageName::ComplexityDetector,
        StageName::ThoughtAgent,
        StageName::PlannerAgent,
        StageName::CriticAgent,
        StageName::MetaAgent,
        StageName::ExecutorAgent,
        StageName::SummaryAgent,
    ];

    /// The kebab-case name stored in the agent chain.
    pub const fn as_str(&self) -> &'static str {
        match self {
            StageName::ComplexityDetector => "complexity-detector",
            StageName::ThoughtAgent => "thought-agent",
            StageName::PlannerAgent => "planner-agent",
            StageName::CriticAgent => "critic-agent",
            StageName::MetaAgent => "meta-agent",
            StageName::ExecutorAgent => "executor-agent",
            StageName::SummaryAgent => "summary-agent",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase().replace('_', "-");
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str() == needle)
            .ok_or_else(|| PipelineError::validation(format!("unknown stage name: {s}")))
    }
}

// ── RequestStatus ───────────────────────────────────────────────────────

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    /// Created, no stage has entered yet.
    Pending,
    /// A stage currently holds exclusive processing rights.
    InProgress,
    /// The last stage that ran finished successfully.
    Completed,
    /// A stage hit an unrecoverable error.
    Failed,
}

impl RequestStatus {
    /// The kebab-case status name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in-progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "in-progress" | "inprogress" => Ok(RequestStatus::InProgress),
            "completed" => Ok(RequestStatus::Completed),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(PipelineError::validation(format!("unknown status: {other}"))),
        }
    }
}

// ── Complexity directive ────────────────────────────────────────────────

/// Lowest reasoning pass count.
pub const MIN_REASONING_PASSES: u8 = 1;
/// Highest reasoning pass count.
pub const MAX_REASONING_PASSES: u8 = 3;

/// Clamp an arbitrary (possibly garbage) pass count into `1..=3`.
///
/// Non-finite input maps to the minimum.
pub fn clamp_reasoning_passes(raw: f64) -> u8 {
    if !raw.is_finite() {
        return MIN_REASONING_PASSES;
    }
    raw.round()
        .clamp(f64::from(MIN_REASONING_PASSES), f64::from(MAX_REASONING_PASSES)) as u8
}

/// Clamp a score into `0.0..=1.0`. Non-finite input maps to `0.0`.
pub fn clamp_unit(raw: f64) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0) as f32
}

/// Which strategy produced a complexity directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Nearest stored example above the similarity threshold.
    Semantic,
    /// Fixed lexicon of complexity-indicating terms.
    Keyword,
    /// Language-model judgment.
    Llm,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectionMethod::Semantic => "semantic",
            DetectionMethod::Keyword => "keyword",
            DetectionMethod::Llm => "llm",
        })
    }
}

/// Strategy-specific evidence behind a complexity directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Detection {
    /// A stored example matched.
    Semantic {
        /// Cosine similarity of the match.
        similarity: f32,
        /// Id of the matched complexity example.
        #[serde(alias = "matchedExampleId")]
        matched_example_id: String,
    },
    /// The keyword lexicon decided.
    Keyword {
        /// Lexicon terms found in the query.
        #[serde(default, alias = "detectedKeywords")]
        detected_keywords: Vec<String>,
    },
    /// The language model decided.
    Llm {
        /// Free-text justification returned by the model.
        #[serde(default, alias = "llmExplanation")]
        explanation: String,
        /// Confidence the model reported (clamped).
        #[serde(default, alias = "llmConfidence")]
        llm_confidence: f32,
    },
}

impl Detection {
    /// The strategy that produced this evidence.
    pub fn method(&self) -> DetectionMethod {
        match self {
            Detection::Semantic { .. } => DetectionMethod::Semantic,
            Detection::Keyword { .. } => DetectionMethod::Keyword,
            Detection::Llm { .. } => DetectionMethod::Llm,
        }
    }
}

/// Reasoning-depth directive attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    /// Complexity in `0.0..=1.0`.
    #[serde(alias = "complexityScore")]
    pub score: f32,
    /// Number of reasoning passes the thought stage should run (1-3).
    #[serde(alias = "reasoningPasses")]
    pub reasoning_passes: u8,
    /// Confidence in the directive, `0.0..=1.0`.
    pub confidence: f32,
    /// How the directive was reached.
    pub detection: Detection,
}

impl ComplexityScore {
    /// Shorthand for `self.detection.method()`.
    pub fn method(&self) -> DetectionMethod {
        self.detection.method()
    }
}

// ── RequestContext ──────────────────────────────────────────────────────

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// The per-request state machine record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Opaque unique id, generated once at chain start.
    #[serde(alias = "requestId")]
    pub request_id: String,
    /// When the chain started.
    #[serde(default = "now", alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Last time any stage wrote the record.
    #[serde(default = "now", alias = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// Stages that processed the request, in first-execution order.
    #[serde(default, alias = "agentChain")]
    pub agent_chain: Vec<StageName>,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// The original query text.
    #[serde(default, alias = "userQuery")]
    pub user_query: Option<String>,
    /// Directive attached by the complexity detector.
    #[serde(default)]
    pub complexity: Option<ComplexityScore>,
    /// The stage that most recently entered the request.
    #[serde(default, alias = "currentStage")]
    pub current_stage: Option<StageName>,
    /// Message of the error that failed the request, if any.
    #[serde(default, alias = "lastError")]
    pub last_error: Option<String>,
}

impl RequestContext {
    /// Start a new request with a freshly generated id.
    pub fn new(user_query: Option<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), user_query)
    }

    /// Start a new request with an explicit id.
    pub fn with_id(request_id: impl Into<String>, user_query: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.into(),
            created_at: now,
            updated_at: now,
            agent_chain: Vec::new(),
            status: RequestStatus::Pending,
            user_query,
            complexity: None,
            current_stage: None,
            last_error: None,
        }
    }

    /// Append a stage to the chain. Re-adding a stage is a no-op.
    ///
    /// Returns `true` when the stage was appended.
    pub fn add_agent_to_chain(&mut self, stage: StageName) -> bool {
        if self.agent_chain.contains(&stage) {
            return false;
        }
        self.agent_chain.push(stage);
        true
    }

    /// Reasoning passes requested by the complexity directive (1 if absent).
    pub fn reasoning_passes(&self) -> u8 {
        self.complexity
            .as_ref()
            .map(|c| c.reasoning_passes)
            .unwrap_or(MIN_REASONING_PASSES)
    }

    /// Transition into `in-progress` for `stage`.
    ///
    /// Refuses with [`PipelineError::StageConflict`] when another stage
    /// already holds the request.
    pub fn begin_stage(&mut self, stage: StageName) -> Result<()> {
        if self.status == RequestStatus::InProgress {
            return Err(PipelineError::StageConflict {
                request_id: self.request_id.clone(),
                holder: self
                    .current_stage
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".into()),
            });
        }
        self.add_agent_to_chain(stage);
        self.status = RequestStatus::InProgress;
        self.current_stage = Some(stage);
        self.last_error = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition `in-progress -> completed`.
    pub fn complete_stage(&mut self) {
        self.status = RequestStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Mark the request failed, recording the reason.
    pub fn fail_stage(&mut self, reason: impl Into<String>) {
        self.status = RequestStatus::Failed;
        self.last_error = Some(reason.into());
        self.updated_at = Utc::now();
    }
}

// ── ContextFilter ───────────────────────────────────────────────────────

/// Filter for listing request contexts. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    /// Only contexts in this status.
    pub status: Option<RequestStatus>,
    /// Only contexts whose chain contains this stage.
    pub agent: Option<StageName>,
    /// Only contexts created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only contexts created at or before this instant.
    pub until: Option<DateTime<Utc>>,
}

impl ContextFilter {
    /// Whether `ctx` passes every set criterion.
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        if let Some(status) = self.status
            && ctx.status != status
        {
            return false;
        }
        if let Some(agent) = self.agent
            && !ctx.agent_chain.contains(&agent)
        {
            return false;
        }
        if let Some(since) = self.since
            && ctx.created_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && ctx.created_at > until
        {
            return false;
        }
        true
    }
}
