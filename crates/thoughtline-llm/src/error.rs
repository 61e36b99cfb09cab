//! Error types for the language-model boundary.
//!
//! Every failure here is a collaborator failure from the pipeline's point
//! of view, so all variants convert into
//! [`PipelineError::LlmUnavailable`].

use thiserror::Error;
use thoughtline_types::PipelineError;

/// Errors that can occur when invoking a language model.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the endpoint failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Authentication was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The endpoint is throttling requests (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The model is not configured (e.g. missing API key).
    #[error("model not configured: {0}")]
    NotConfigured(String),

    /// The endpoint returned a response without usable text.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The call exceeded its deadline.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// An HTTP-level error from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A convenience type alias for model calls.
pub type Result<T> = std::result::Result<T, LlmError>;

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        PipelineError::LlmUnavailable(err.to_string())
    }
}
