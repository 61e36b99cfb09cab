//! Language-model boundary for thoughtline.
//!
//! The pipeline treats the model as an opaque function
//! `invoke(prompt, config) -> text`. This crate defines that boundary and
//! the implementations that sit behind it.
//!
//! # Architecture
//!
//! - [`LanguageModel`] trait defines the single `invoke` call
//! - [`OpenAiCompatModel`] implements it for any OpenAI-compatible API
//! - [`ScriptedModel`] replays canned responses (tests and dry runs)
//! - [`invoke_with_timeout`] applies a caller-side deadline

pub mod error;
pub mod model;
pub mod openai_compat;
pub mod scripted;

pub use error::{LlmError, Result};
pub use model::{InvokeConfig, LanguageModel, invoke_with_timeout};
pub use openai_compat::OpenAiCompatModel;
pub use scripted::ScriptedModel;
