//! `thoughtline run` / `thoughtline resume` -- drive the reasoning chain.
//!
//! The chain runs against the configured OpenAI-compatible endpoint. No
//! tool runtime is linked into the binary: with `--dry-run-tools` each
//! planned call is recorded with its parameters, otherwise tool steps are
//! reported as failed in the execution output.
//!
//! Ctrl-C cancels between stages; the request can then be continued with
//! `thoughtline resume <id>` (given a `--data-dir`).
//!
//! # Examples
//!
//! ```text
//! thoughtline run "Show me all facilities" --dry-run-tools
//! thoughtline run "Compare shipment risk" --examples seed.json --data-dir ./tl
//! thoughtline resume 6f1c... --data-dir ./tl
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};
use serde_json::{Map, Value};
use thoughtline_core::tools::{DryRunInvoker, ToolError, ToolInvoker};
use thoughtline_core::{PipelineBuilder, PipelineController, PipelineOutcome};
use thoughtline_types::config::PipelineConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{example_memories, language_model};

/// Arguments for `thoughtline run`.
#[derive(Args)]
pub struct RunArgs {
    /// The query to reason about.
    pub query: String,

    /// JSON file of labeled examples to seed the example memories.
    #[arg(long)]
    pub examples: Option<PathBuf>,

    /// Record tool calls instead of failing them.
    #[arg(long)]
    pub dry_run_tools: bool,

    /// Print the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `thoughtline resume`.
#[derive(Args)]
pub struct ResumeArgs {
    /// Id of the request to continue.
    pub request_id: String,

    /// JSON file of labeled examples to seed the example memories.
    #[arg(long)]
    pub examples: Option<PathBuf>,

    /// Record tool calls instead of failing them.
    #[arg(long)]
    pub dry_run_tools: bool,

    /// Print the outcome as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Invoker used when no tool runtime is available.
struct NoToolRuntime;

#[async_trait]
impl ToolInvoker for NoToolRuntime {
    async fn call(&self, name: &str, _parameters: &Map<String, Value>) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed(format!(
            "no tool runtime available for '{name}' (use --dry-run-tools)"
        )))
    }
}

async fn controller(
    config: PipelineConfig,
    examples: Option<PathBuf>,
    dry_run_tools: bool,
) -> anyhow::Result<PipelineController> {
    let memories = example_memories(&config, examples.as_deref()).await?;
    let invoker: Arc<dyn ToolInvoker> = if dry_run_tools {
        Arc::new(DryRunInvoker)
    } else {
        Arc::new(NoToolRuntime)
    };
    let llm = language_model(&config);
    Ok(PipelineBuilder::new(config)
        .with_llm(llm)
        .with_memories(memories)
        .with_tool_invoker(invoker)
        .build()?)
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current stage");
            on_signal.cancel();
        }
    });
    cancel
}

/// Run the full chain for a query.
pub async fn run(args: RunArgs, config: PipelineConfig) -> anyhow::Result<()> {
    let pipeline = controller(config, args.examples, args.dry_run_tools).await?;
    let outcome = pipeline
        .run_with_cancel(&args.query, cancel_on_ctrl_c())
        .await?;
    print_outcome(&outcome, args.json)
}

/// Continue a persisted request.
pub async fn resume(args: ResumeArgs, config: PipelineConfig) -> anyhow::Result<()> {
    if config.data_dir.is_none() {
        anyhow::bail!("resume needs persisted state: pass --data-dir or set data_dir in the config");
    }
    let pipeline = controller(config, args.examples, args.dry_run_tools).await?;
    let outcome = pipeline
        .resume_with_cancel(&args.request_id, cancel_on_ctrl_c())
        .await?;
    print_outcome(&outcome, args.json)
}

fn print_outcome(outcome: &PipelineOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    let ctx = &outcome.context;
    println!("Request: {}", outcome.request_id);
    println!("  Status:  {}", ctx.status);
    println!("  Passes:  {}", ctx.reasoning_passes());
    println!("  Replans: {}", outcome.replans);
    println!("  Deepens: {}", outcome.deepens);
    let chain: Vec<String> = ctx.agent_chain.iter().map(|s| s.to_string()).collect();
    println!("  Chain:   {}", chain.join(" -> "));

    if outcome.cancelled {
        println!("\nCancelled. Continue with: thoughtline resume {}", outcome.request_id);
        return Ok(());
    }

    let Some(ref summary) = outcome.summary else {
        println!("\n(no summary)");
        return Ok(());
    };
    println!("\n{}", summary.summary);
    if !summary.key_findings.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(["#", "KEY FINDING"]);
        for (i, finding) in summary.key_findings.iter().enumerate() {
            table.add_row([(i + 1).to_string(), finding.clone()]);
        }
        println!("\n{table}");
    }
    if let Some(confidence) = summary.confidence {
        println!("  Confidence: {confidence:.2}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_runtime_fails_tool_calls() {
        let err = NoToolRuntime
            .call("list_facilities", &Map::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--dry-run-tools"));
    }

    #[tokio::test]
    async fn resume_requires_data_dir() {
        let args = ResumeArgs {
            request_id: "req-1".into(),
            examples: None,
            dry_run_tools: false,
            json: false,
        };
        let err = resume(args, PipelineConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("--data-dir"));
    }
}
