//! Error types for the thoughtline pipeline.
//!
//! [`PipelineError`] is the single error type that crosses stage
//! boundaries. Variants are grouped the way callers need to react to them:
//! input rejections (nothing was written), collaborator failures (the
//! request is marked failed), and recovery-path failures that only surface
//! when no safe default exists.

use thiserror::Error;

use crate::context::StageName;

/// Top-level error type for the pipeline.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    // ── Rejected before any side effect ──────────────────────────────

    /// The input had the wrong shape.
    #[error("validation failed: {reason}")]
    Validation {
        /// What is wrong with the input.
        reason: String,
    },

    /// A stage's required upstream output is absent.
    #[error("{stage} requires {dependency} output for request {request_id}")]
    MissingDependency {
        /// The stage that refused to run.
        stage: StageName,
        /// The upstream stage whose output is missing.
        dependency: StageName,
        /// The request being processed.
        request_id: String,
    },

    /// Another stage currently holds the request.
    #[error("request {request_id} is already in progress in {holder}")]
    StageConflict {
        /// The request that could not be entered.
        request_id: String,
        /// Stage recorded as the current holder, if known.
        holder: String,
    },

    /// A record was looked up by id and does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record ("request context", "example", ...).
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    // ── Collaborator failures ────────────────────────────────────────

    /// The persistence layer could not be reached or refused the write.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The embedding service failed.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The language model failed or timed out.
    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    // ── Unrecoverable output problems ────────────────────────────────

    /// An upstream response could not be parsed and no safe default exists.
    #[error("malformed output from {origin}: {reason}")]
    MalformedUpstreamOutput {
        /// Where the output came from ("planner-agent", "vector index", ...).
        origin: String,
        /// What could not be recovered.
        reason: String,
    },

    /// The critique kept requesting a new plan past the configured cap.
    #[error("request {request_id} exceeded the replan limit of {limit}")]
    ReplanLimitExceeded {
        /// The request that was halted.
        request_id: String,
        /// The configured maximum number of replans.
        limit: u32,
    },

    // ── Configuration / encoding ─────────────────────────────────────

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`PipelineError::MalformedUpstreamOutput`].
    pub fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedUpstreamOutput {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// True for failures of an external collaborator (storage, embedding,
    /// language model).
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::EmbeddingUnavailable(_) | Self::LlmUnavailable(_)
        )
    }

    /// True when the error was raised before the request was touched, so
    /// the request context needs no failure mark.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::MissingDependency { .. }
                | Self::StageConflict { .. }
                | Self::NotFound { .. }
        )
    }
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PipelineError>;
