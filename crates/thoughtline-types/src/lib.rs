//! # thoughtline-types
//!
//! Core type definitions for the thoughtline reasoning pipeline.
//!
//! This crate is the foundation of the dependency graph -- every other
//! thoughtline crate depends on it. It contains:
//!
//! - **[`error`]** -- [`PipelineError`] and the crate-wide [`Result`] alias
//! - **[`context`]** -- the per-request state machine record
//! - **[`output`]** -- versioned stage outputs (thought, plan, critique, ...)
//! - **[`example`]** -- labeled examples used for semantic guidance
//! - **[`config`]** -- pipeline configuration schema

pub mod config;
pub mod context;
pub mod error;
pub mod example;
pub mod output;

pub use error::{PipelineError, Result};
