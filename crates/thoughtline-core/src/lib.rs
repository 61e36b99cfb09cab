//! # thoughtline-core
//!
//! Engine for the thoughtline reasoning pipeline.
//!
//! - **[`complexity`]** -- routes a query to a reasoning depth (semantic
//!   example match, keyword lexicon, or LLM classification)
//! - **[`memory`]** -- example memories backed by [`embeddings`] and a
//!   [`vector_index`]
//! - **[`store`]** -- request contexts and versioned stage outputs
//! - **[`stages`]** -- thought, planner, critic, meta, executor, summary
//! - **[`pipeline`]** -- the controller with its replan and deepen loops
//! - **[`tools`]** -- tool catalog, plan validation, tool invocation
//! - **[`bootstrap`]** -- wiring from a `PipelineConfig`
//!
//! Model output is parsed through [`json_repair`]; prompts live in
//! [`prompts`].

pub mod bootstrap;
pub mod complexity;
pub mod embeddings;
pub mod json_repair;
pub mod memory;
pub mod pipeline;
pub mod prompts;
pub mod stages;
pub mod store;
pub mod tools;
pub mod vector_index;

pub use bootstrap::PipelineBuilder;
pub use pipeline::{PipelineController, PipelineOutcome};
