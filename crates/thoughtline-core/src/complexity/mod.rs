//! Complexity router: decides how many reasoning passes a query gets.
//!
//! Three strategies are tried in order and the first that yields a
//! directive wins:
//!
//! 1. **Semantic** -- nearest complexity example at or above
//!    `semantic_min_score`; its stored directive is adopted verbatim.
//! 2. **Keyword** -- the weighted lexicon in [`keywords`].
//! 3. **LLM** -- a classification prompt, used only when the keyword
//!    strategy is disabled. Out-of-range answers are clamped.
//!
//! An embedding failure during the semantic step is logged and the router
//! falls through to the next strategy.
//!
//! The router is also the stage that opens a request: [`ComplexityRouter::route`]
//! creates the [`RequestContext`] in `pending`, attaches the directive, and
//! records a versioned [`ComplexityAssessment`].

pub mod keywords;

use std::sync::Arc;
use std::time::Duration;

use thoughtline_llm::{InvokeConfig, LanguageModel, invoke_with_timeout};
use thoughtline_types::config::ComplexityConfig;
use thoughtline_types::context::{
    ComplexityScore, Detection, MIN_REASONING_PASSES, RequestContext, StageName,
    clamp_reasoning_passes, clamp_unit,
};
use thoughtline_types::example::ComplexityExample;
use thoughtline_types::output::{ComplexityAssessment, OutputMeta};
use thoughtline_types::{PipelineError, Result};
use tracing::{debug, info, warn};

use crate::json_repair::{field_f64, field_str, parse_llm_object};
use crate::memory::ExampleMemory;
use crate::prompts;
use crate::store::{RequestContextStore, VersionedStore};

pub use keywords::{KeywordScore, KeywordScorer};

/// Classifies queries and opens request contexts.
pub struct ComplexityRouter {
    config: ComplexityConfig,
    memory: Arc<ExampleMemory<ComplexityExample>>,
    keywords: KeywordScorer,
    llm: Option<Arc<dyn LanguageModel>>,
    invoke: InvokeConfig,
    timeout: Duration,
    contexts: RequestContextStore,
    outputs: Arc<VersionedStore<ComplexityAssessment>>,
}

impl ComplexityRouter {
    pub fn new(
        config: ComplexityConfig,
        memory: Arc<ExampleMemory<ComplexityExample>>,
        contexts: RequestContextStore,
        outputs: Arc<VersionedStore<ComplexityAssessment>>,
    ) -> Self {
        let keywords = KeywordScorer::new(config.keyword_thresholds);
        Self {
            config,
            memory,
            keywords,
            llm: None,
            invoke: InvokeConfig::default().with_temperature(0.0),
            timeout: Duration::from_secs(60),
            contexts,
            outputs,
        }
    }

    /// Attach the model used by the LLM strategy.
    pub fn with_llm(
        mut self,
        llm: Arc<dyn LanguageModel>,
        invoke: InvokeConfig,
        timeout: Duration,
    ) -> Self {
        self.llm = Some(llm);
        self.invoke = invoke.with_temperature(0.0);
        self.timeout = timeout;
        self
    }

    /// Classify `query` without touching any store except example usage
    /// counters.
    pub async fn detect(&self, query: &str) -> Result<ComplexityScore> {
        if query.trim().is_empty() {
            return Ok(ComplexityScore {
                score: 0.0,
                reasoning_passes: MIN_REASONING_PASSES,
                confidence: 1.0,
                detection: Detection::Keyword {
                    detected_keywords: Vec::new(),
                },
            });
        }

        if self.config.semantic_enabled
            && let Some(score) = self.semantic(query).await?
        {
            return Ok(score);
        }

        if self.config.keyword_enabled {
            let k = self.keywords.score(query);
            debug!(raw = k.raw, passes = k.reasoning_passes, matched = ?k.matched, "keyword complexity");
            return Ok(ComplexityScore {
                score: k.complexity,
                reasoning_passes: k.reasoning_passes,
                confidence: k.confidence,
                detection: Detection::Keyword {
                    detected_keywords: k.matched,
                },
            });
        }

        if self.config.llm_enabled
            && let Some(ref llm) = self.llm
        {
            return self.ask_llm(llm.as_ref(), query).await;
        }

        Err(PipelineError::ConfigInvalid {
            reason: "no complexity strategy is available (keyword disabled, no language model)"
                .into(),
        })
    }

    async fn semantic(&self, query: &str) -> Result<Option<ComplexityScore>> {
        let hits = match self
            .memory
            .query_text(
                query,
                self.config.semantic_top_k.max(1),
                self.config.semantic_min_score,
            )
            .await
        {
            Ok(hits) => hits,
            Err(PipelineError::EmbeddingUnavailable(reason)) => {
                warn!(%reason, "semantic complexity match unavailable, falling back");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(best) = hits.into_iter().next() else {
            return Ok(None);
        };
        if let Err(e) = self.memory.increment_usage(&best.example.id).await {
            warn!(id = %best.example.id, error = %e, "failed to bump example usage");
        }
        let payload = best.example.payload;
        debug!(
            similarity = best.similarity,
            matched = %best.example.id,
            passes = payload.reasoning_passes,
            "semantic complexity match"
        );
        Ok(Some(ComplexityScore {
            score: payload.complexity_score,
            reasoning_passes: payload.reasoning_passes,
            confidence: payload.confidence,
            detection: Detection::Semantic {
                similarity: best.similarity,
                matched_example_id: best.example.id,
            },
        }))
    }

    async fn ask_llm(&self, llm: &dyn LanguageModel, query: &str) -> Result<ComplexityScore> {
        let prompt = prompts::complexity(query);
        let text = invoke_with_timeout(llm, &prompt, &self.invoke, self.timeout).await?;
        Ok(parse_llm_directive(&text))
    }

    /// Classify `query` and open a new request for it.
    ///
    /// The returned context is `pending` with `complexity-detector` as the
    /// only chain entry.
    pub async fn route(&self, query: &str) -> Result<(ComplexityAssessment, RequestContext)> {
        let complexity = self.detect(query).await?;

        let mut ctx = RequestContext::new(Some(query.to_string()));
        ctx.add_agent_to_chain(StageName::ComplexityDetector);
        ctx.current_stage = Some(StageName::ComplexityDetector);
        ctx.complexity = Some(complexity.clone());
        self.contexts.save(&ctx).await?;

        let assessment = self
            .outputs
            .save(ComplexityAssessment {
                meta: OutputMeta::new(&ctx),
                query: query.to_string(),
                complexity,
            })
            .await?;

        info!(
            request_id = %ctx.request_id,
            method = %assessment.complexity.method(),
            passes = assessment.complexity.reasoning_passes,
            score = assessment.complexity.score,
            "routed query"
        );
        Ok((assessment, ctx))
    }
}

/// Read a directive out of model text, clamping anything out of range.
///
/// A missing pass count is derived from the score and vice versa; when
/// neither is present the minimum depth is used with zero confidence.
pub fn parse_llm_directive(text: &str) -> ComplexityScore {
    let obj = parse_llm_object(text).unwrap_or_default();
    let score = field_f64(&obj, &["complexity_score", "complexityScore", "score"]);
    let passes = field_f64(&obj, &["reasoning_passes", "reasoningPasses", "passes"]);
    let confidence = field_f64(&obj, &["confidence", "llm_confidence", "llmConfidence"]);
    let explanation = field_str(&obj, &["explanation", "reasoning", "llmExplanation"])
        .unwrap_or_default();

    if score.is_none() || passes.is_none() {
        warn!(
            has_score = score.is_some(),
            has_passes = passes.is_some(),
            "incomplete complexity answer from model"
        );
    }

    let (score, passes) = match (score, passes) {
        (Some(s), Some(p)) => (clamp_unit(s), clamp_reasoning_passes(p)),
        (Some(s), None) => {
            let s = clamp_unit(s);
            (s, clamp_reasoning_passes(1.0 + f64::from(s) * 2.0))
        }
        (None, Some(p)) => {
            let p = clamp_reasoning_passes(p);
            (f32::from(p - 1) / 2.0, p)
        }
        (None, None) => (0.0, MIN_REASONING_PASSES),
    };
    let llm_confidence = confidence.map(clamp_unit).unwrap_or(0.0);

    ComplexityScore {
        score,
        reasoning_passes: passes,
        confidence: llm_confidence,
        detection: Detection::Llm {
            explanation,
            llm_confidence,
        },
    }
}
