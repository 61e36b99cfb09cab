//! Deterministic model that replays canned responses.
//!
//! Responses are keyed by a substring of the prompt. Each key holds a queue:
//! queued responses are consumed in order and the last one repeats. This
//! lets a test script a critique that rejects once and then approves.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{LlmError, Result};
use crate::model::{InvokeConfig, LanguageModel};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug)]
struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

/// A [`LanguageModel`] that answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    rules: Mutex<Vec<Rule>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    /// An empty script; every call fails until rules are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for prompts containing `needle` (builder pattern).
    pub fn on(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.push(needle.into(), Reply::Text(response.into()));
        self
    }

    /// Queue a failure for prompts containing `needle`.
    pub fn fail_on(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(needle.into(), Reply::Fail(message.into()));
        self
    }

    /// Response used when no rule matches.
    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of prompts containing `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }

    fn push(&self, needle: String, reply: Reply) {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rule) = rules.iter_mut().find(|r| r.needle == needle) {
            rule.replies.push_back(reply);
        } else {
            rules.push(Rule {
                needle,
                replies: VecDeque::from([reply]),
            });
        }
    }

    fn next_reply(&self, prompt: &str) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let rule = rules.iter_mut().find(|r| prompt.contains(&r.needle))?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, prompt: &str, _config: &InvokeConfig) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        match self.next_reply(prompt) {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(LlmError::RequestFailed(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::InvalidResponse("no scripted response".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_then_repeat_last() {
        let model = ScriptedModel::new().on("critic", "first").on("critic", "second");
        let cfg = InvokeConfig::default();
        assert_eq!(model.invoke("you are critic", &cfg).await.unwrap(), "first");
        assert_eq!(model.invoke("you are critic", &cfg).await.unwrap(), "second");
        assert_eq!(model.invoke("you are critic", &cfg).await.unwrap(), "second");
        assert_eq!(model.calls_matching("critic"), 3);
    }

    #[tokio::test]
    async fn fallback_and_failure() {
        let model = ScriptedModel::new()
            .fail_on("boom", "down")
            .with_fallback("{}");
        let cfg = InvokeConfig::default();
        assert!(model.invoke("boom", &cfg).await.is_err());
        assert_eq!(model.invoke("other", &cfg).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn unmatched_without_fallback_errors() {
        let model = ScriptedModel::new();
        let err = model
            .invoke("anything", &InvokeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}
