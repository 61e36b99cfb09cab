//! Pipeline configuration schema.
//!
//! All structs accept both `snake_case` and `camelCase` field names in JSON
//! via `#[serde(alias)]`, every field has a default, and unknown fields are
//! silently ignored for forward compatibility. An empty JSON object is a
//! valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub(crate) fn default_true() -> bool {
    true
}

// ── Root config ─────────────────────────────────────────────────────────

/// Root configuration for a pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Complexity router strategies and thresholds.
    #[serde(default)]
    pub complexity: ComplexityConfig,

    /// Few-shot example lookup for the thought and planner stages.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Meta-stage decision floors.
    #[serde(default)]
    pub meta: MetaConfig,

    /// Loop caps.
    #[serde(default)]
    pub limits: LoopLimits,

    /// Language-model endpoint and call parameters.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Registered tool names (static catalog).
    #[serde(default)]
    pub tools: Vec<String>,

    /// Directory for file-backed persistence; in-memory when absent.
    #[serde(default, alias = "dataDir")]
    pub data_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let c = &self.complexity;
        if !c.keyword_enabled && !c.llm_enabled {
            return Err(invalid(
                "complexity: at least one of keyword_enabled / llm_enabled must be true",
            ));
        }
        check_unit("complexity.semantic_min_score", c.semantic_min_score)?;
        if c.keyword_thresholds[0] > c.keyword_thresholds[1] {
            return Err(invalid(
                "complexity.keyword_thresholds must be ascending",
            ));
        }

        check_unit("retrieval.min_score", self.retrieval.min_score)?;

        let m = &self.meta;
        check_unit("meta.replan_score_floor", m.replan_score_floor)?;
        check_unit("meta.deepen_confidence_floor", m.deepen_confidence_floor)?;
        if m.deepen_confidence_floor > m.replan_score_floor {
            return Err(invalid(
                "meta.deepen_confidence_floor must not exceed meta.replan_score_floor",
            ));
        }

        let l = &self.limits;
        if !(1..=3).contains(&l.max_reasoning_passes) {
            return Err(invalid("limits.max_reasoning_passes must be within 1..=3"));
        }

        if self.embedding.dimension == 0 {
            return Err(invalid("embedding.dimension must be positive"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(invalid("llm.timeout_secs must be positive"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> PipelineError {
    PipelineError::ConfigInvalid {
        reason: reason.into(),
    }
}

fn check_unit(field: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::ConfigInvalid {
            reason: format!("{field} must be within 0.0..=1.0, got {value}"),
        })
    }
}

// ── Complexity ──────────────────────────────────────────────────────────

/// Complexity router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityConfig {
    /// Try the stored-example match first.
    #[serde(default = "default_true", alias = "semanticEnabled")]
    pub semantic_enabled: bool,

    /// Minimum similarity for a semantic match.
    #[serde(default = "default_semantic_min_score", alias = "semanticMinScore")]
    pub semantic_min_score: f32,

    /// How many neighbours to fetch for the semantic match.
    #[serde(default = "default_semantic_top_k", alias = "semanticTopK")]
    pub semantic_top_k: usize,

    /// Use the keyword lexicon when no example matches.
    #[serde(default = "default_true", alias = "keywordEnabled")]
    pub keyword_enabled: bool,

    /// Ask the language model when the other strategies are disabled.
    #[serde(default, alias = "llmEnabled")]
    pub llm_enabled: bool,

    /// Raw lexicon score boundaries: below `[0]` is 1 pass, below `[1]`
    /// is 2 passes, otherwise 3.
    #[serde(default = "default_keyword_thresholds", alias = "keywordThresholds")]
    pub keyword_thresholds: [f32; 2],
}

fn default_semantic_min_score() -> f32 {
    0.85
}

fn default_semantic_top_k() -> usize {
    3
}

fn default_keyword_thresholds() -> [f32; 2] {
    [2.0, 4.0]
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            semantic_enabled: true,
            semantic_min_score: default_semantic_min_score(),
            semantic_top_k: default_semantic_top_k(),
            keyword_enabled: true,
            llm_enabled: false,
            keyword_thresholds: default_keyword_thresholds(),
        }
    }
}

// ── Retrieval ───────────────────────────────────────────────────────────

/// Few-shot example lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_top_k", alias = "topK")]
    pub top_k: usize,
    #[serde(default = "default_retrieval_min_score", alias = "minScore")]
    pub min_score: f32,
}

fn default_retrieval_top_k() -> usize {
    2
}

fn default_retrieval_min_score() -> f32 {
    0.7
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_retrieval_top_k(),
            min_score: default_retrieval_min_score(),
        }
    }
}

// ── Meta ────────────────────────────────────────────────────────────────

/// Meta-stage decision floors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Critique scores below this request a replan.
    #[serde(default = "default_replan_floor", alias = "replanScoreFloor")]
    pub replan_score_floor: f32,

    /// Thought confidence below this requests deeper reasoning.
    #[serde(default = "default_deepen_floor", alias = "deepenConfidenceFloor")]
    pub deepen_confidence_floor: f32,
}

fn default_replan_floor() -> f32 {
    0.6
}

fn default_deepen_floor() -> f32 {
    0.4
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            replan_score_floor: default_replan_floor(),
            deepen_confidence_floor: default_deepen_floor(),
        }
    }
}

// ── Limits ──────────────────────────────────────────────────────────────

/// Caps on the feedback loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopLimits {
    /// Replans allowed per request before the chain fails.
    #[serde(default = "default_max_replans", alias = "maxReplans")]
    pub max_replans: u32,

    /// Deepen iterations allowed per request; further requests are ignored.
    #[serde(default = "default_max_deepens", alias = "maxDeepens")]
    pub max_deepens: u32,

    /// Upper bound for the thought stage's pass count.
    #[serde(default = "default_max_passes", alias = "maxReasoningPasses")]
    pub max_reasoning_passes: u8,
}

fn default_max_replans() -> u32 {
    3
}

fn default_max_deepens() -> u32 {
    2
}

fn default_max_passes() -> u8 {
    3
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_replans: default_max_replans(),
            max_deepens: default_max_deepens(),
            max_reasoning_passes: default_max_passes(),
        }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────

/// Language-model endpoint and call parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_base_url", alias = "baseUrl")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env", alias = "apiKeyEnv")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens", alias = "maxTokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call deadline; expiry fails the calling stage.
    #[serde(default = "default_timeout_secs", alias = "timeoutSecs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Embedding ───────────────────────────────────────────────────────────

/// Embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Vector dimensionality shared by the embedder and every index.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_dimension() -> usize {
    768
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
        }
    }
}
