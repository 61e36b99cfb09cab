//! The core [`LanguageModel`] trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thoughtline_types::config::LlmConfig;
use tracing::warn;

use crate::error::{LlmError, Result};

/// Per-call generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvokeConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl InvokeConfig {
    /// Parameters taken from the pipeline's LLM configuration.
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Same parameters with a different temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// A model that turns a prompt into text.
///
/// No structure is guaranteed in the returned text; callers that expect
/// JSON must parse defensively.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logging.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn invoke(&self, prompt: &str, config: &InvokeConfig) -> Result<String>;
}

/// Invoke `model` with a deadline.
///
/// Expiry surfaces as [`LlmError::Timeout`]; the in-flight call is dropped.
pub async fn invoke_with_timeout(
    model: &dyn LanguageModel,
    prompt: &str,
    config: &InvokeConfig,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, model.invoke(prompt, config)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(model = model.name(), timeout_secs = timeout.as_secs(), "llm call timed out");
            Err(LlmError::Timeout(timeout.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sleepy;

    #[async_trait]
    impl LanguageModel for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn invoke(&self, _prompt: &str, _config: &InvokeConfig) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn timeout_surfaces_as_error() {
        let err = invoke_with_timeout(
            &Sleepy,
            "hi",
            &InvokeConfig::default(),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn config_from_llm_config() {
        let cfg = LlmConfig {
            max_tokens: 256,
            temperature: 0.9,
            ..Default::default()
        };
        let invoke = InvokeConfig::from_config(&cfg);
        assert_eq!(invoke.max_tokens, 256);
        assert!((invoke.temperature - 0.9).abs() < f32::EPSILON);
        assert!((invoke.with_temperature(0.0).temperature).abs() < f32::EPSILON);
    }
}
