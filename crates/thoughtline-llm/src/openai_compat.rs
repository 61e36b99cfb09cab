//! OpenAI-compatible model adapter.
//!
//! [`OpenAiCompatModel`] sends each prompt as a single user message to any
//! API that follows the OpenAI chat completion format and returns the first
//! choice's text.
//!
//! Every call carries a fresh `x-request-id` header so transport-level logs
//! can be correlated without any shared counter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thoughtline_types::config::LlmConfig;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LlmError, Result};
use crate::model::{InvokeConfig, LanguageModel};

/// Header carrying the per-call correlation id.
pub const CORRELATION_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A [`LanguageModel`] backed by an OpenAI-compatible HTTP endpoint.
///
/// # Construction
///
/// ```rust,ignore
/// use thoughtline_llm::OpenAiCompatModel;
/// use thoughtline_types::config::LlmConfig;
///
/// let model = OpenAiCompatModel::new(&LlmConfig::default());
/// ```
pub struct OpenAiCompatModel {
    base_url: String,
    model: String,
    api_key_env: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiCompatModel {
    /// Create a model from configuration.
    ///
    /// The API key is resolved from `config.api_key_env` at call time.
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            api_key: None,
            http: reqwest::Client::new(),
        }
    }

    /// Create a model with an explicit API key, bypassing the environment.
    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::new(config)
        }
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn resolve_api_key(&self) -> Result<String> {
        if let Some(ref key) = self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env)
            .map_err(|_| LlmError::NotConfigured(format!("set {} env var", self.api_key_env)))
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str, config: &InvokeConfig) -> Result<String> {
        let api_key = self.resolve_api_key()?;
        let correlation_id = Uuid::new_v4().to_string();

        debug!(
            model = %self.model,
            correlation_id = %correlation_id,
            prompt_chars = prompt.len(),
            "sending completion request"
        );

        let body = CompletionRequest {
            model: &self.model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        let response = self
            .http
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {api_key}"))
            .header(CORRELATION_HEADER, correlation_id.as_str())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(
                model = %self.model,
                correlation_id = %correlation_id,
                status = status.as_u16(),
                "completion request rejected"
            );
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed(text),
                429 => LlmError::RateLimited(text),
                _ => LlmError::RequestFailed(format!("HTTP {status}: {text}")),
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("response has no message content".into()))
    }
}
