//! `thoughtline outputs` -- every stage output version of one request.
//!
//! `--json` prints the outputs as schema-versioned envelopes, the same
//! form any other consumer of the store would decode.
//!
//! # Examples
//!
//! ```text
//! thoughtline outputs 6f1c... --data-dir ./tl
//! thoughtline outputs 6f1c... --stage planner-agent --json
//! ```

use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};
use thoughtline_types::config::PipelineConfig;
use thoughtline_types::context::StageName;
use thoughtline_types::output::{StageEnvelope, StageOutput, StepStatus};

use super::{format_datetime, open_stores, preview};

/// Arguments for `thoughtline outputs`.
#[derive(Args)]
pub struct OutputsArgs {
    /// Request id.
    pub request_id: String,

    /// Only this stage (e.g. planner-agent).
    #[arg(long)]
    pub stage: Option<String>,

    /// Print envelopes as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Show the output history.
pub async fn run(args: OutputsArgs, config: &PipelineConfig) -> anyhow::Result<()> {
    let stage = args
        .stage
        .as_deref()
        .map(str::parse::<StageName>)
        .transpose()?;
    let (_, outputs) = open_stores(config)?;
    let history = outputs.history(&args.request_id, stage).await?;

    if args.json {
        let envelopes: Vec<StageEnvelope> = history.into_iter().map(StageEnvelope::new).collect();
        println!("{}", serde_json::to_string_pretty(&envelopes)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No outputs for request {}.", args.request_id);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["STAGE", "VERSION", "WRITTEN", "DETAIL"]);
    for output in &history {
        let meta = output.meta();
        table.add_row([
            output.stage().to_string(),
            meta.version.to_string(),
            format_datetime(&meta.timestamp),
            detail(output),
        ]);
    }
    println!("{table}");
    println!("  {} output(s)", history.len());
    Ok(())
}

/// One-line description of an output.
fn detail(output: &StageOutput) -> String {
    match output {
        StageOutput::Complexity(c) => format!(
            "score {:.2}, {} pass(es), {}",
            c.complexity.score,
            c.complexity.reasoning_passes,
            c.complexity.method()
        ),
        StageOutput::Thought(t) => match t.confidence {
            Some(conf) => format!("{} pass(es), confidence {conf:.2}", t.reasoning_passes),
            None => format!("{} pass(es)", t.reasoning_passes),
        },
        StageOutput::Plan(p) => {
            let tools: Vec<&str> = p.steps.iter().filter_map(|s| s.action.as_deref()).collect();
            let mut line = format!("{} step(s)", p.steps.len());
            if !tools.is_empty() {
                line.push_str(&format!(": {}", tools.join(", ")));
            }
            if let Some(v) = p.revised_from_critique {
                line.push_str(&format!(" (revised from critique v{v})"));
            }
            line
        }
        StageOutput::Critique(c) => format!(
            "{:?} {:.2}, {} issue(s)",
            c.recommendation, c.overall_score, c.issues.len()
        )
        .to_lowercase(),
        StageOutput::Meta(m) => {
            let decision = if m.should_replan {
                "replan"
            } else if m.should_deepen_reasoning {
                "deepen"
            } else {
                "proceed"
            };
            format!("{decision}, quality {:.2}", m.reasoning_quality)
        }
        StageOutput::Execution(e) => {
            let count = |status: StepStatus| e.results.iter().filter(|r| r.status == status).count();
            format!(
                "{} succeeded, {} failed, {} skipped",
                count(StepStatus::Succeeded),
                count(StepStatus::Failed),
                count(StepStatus::Skipped)
            )
        }
        StageOutput::Summary(s) => preview(&s.summary, 60),
    }
}
