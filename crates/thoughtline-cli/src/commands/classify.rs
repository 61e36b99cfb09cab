//! `thoughtline classify` -- complexity routing only.
//!
//! Works offline: semantic matching uses the local hash embedder and the
//! keyword lexicon needs nothing. The LLM strategy is only attached when
//! `complexity.llm_enabled` is set.
//!
//! # Examples
//!
//! ```text
//! thoughtline classify "Show me all facilities"
//! thoughtline classify "Compare risk across regions" --examples seed.json --json
//! ```

use std::path::PathBuf;

use clap::Args;
use thoughtline_core::PipelineBuilder;
use thoughtline_types::config::PipelineConfig;
use thoughtline_types::context::{ComplexityScore, Detection};

use super::{example_memories, language_model};

/// Arguments for `thoughtline classify`.
#[derive(Args)]
pub struct ClassifyArgs {
    /// The query to classify.
    pub query: String,

    /// JSON file of labeled examples to seed the complexity memory.
    #[arg(long)]
    pub examples: Option<PathBuf>,

    /// Print the directive as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Classify one query.
pub async fn run(args: ClassifyArgs, config: PipelineConfig) -> anyhow::Result<()> {
    let memories = example_memories(&config, args.examples.as_deref()).await?;
    let llm_enabled = config.complexity.llm_enabled;
    let llm = language_model(&config);

    let mut builder = PipelineBuilder::new(config).with_memories(memories);
    if llm_enabled {
        builder = builder.with_llm(llm);
    }
    let router = builder.build_router()?;
    let score = router.detect(&args.query).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&score)?);
    } else {
        print!("{}", render(&score));
    }
    Ok(())
}

fn render(score: &ComplexityScore) -> String {
    let mut out = format!(
        "Complexity: {:.2}\n  Passes:     {}\n  Confidence: {:.2}\n  Method:     {}\n",
        score.score,
        score.reasoning_passes,
        score.confidence,
        score.method()
    );
    match score.detection {
        Detection::Semantic {
            similarity,
            ref matched_example_id,
        } => {
            out.push_str(&format!(
                "  Match:      {matched_example_id} (similarity {similarity:.3})\n"
            ));
        }
        Detection::Keyword {
            ref detected_keywords,
        } if !detected_keywords.is_empty() => {
            out.push_str(&format!("  Keywords:   {}\n", detected_keywords.join(", ")));
        }
        Detection::Llm {
            ref explanation, ..
        } if !explanation.is_empty() => {
            out.push_str(&format!("  Reason:     {explanation}\n"));
        }
        _ => {}
    }
    out
}
