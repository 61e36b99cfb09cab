//! `thoughtline` -- CLI binary for the thoughtline reasoning pipeline.
//!
//! Provides the following subcommands:
//!
//! - `thoughtline run` -- Run the full reasoning chain for a query.
//! - `thoughtline resume` -- Continue a stopped or failed request.
//! - `thoughtline classify` -- Route a query to a reasoning depth only.
//! - `thoughtline contexts` -- List, inspect, and clear request contexts.
//! - `thoughtline outputs` -- Show every stage output version of a request.
//! - `thoughtline config` -- Print the resolved configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// thoughtline reasoning pipeline CLI.
#[derive(Parser)]
#[command(name = "thoughtline", about = "thoughtline reasoning pipeline CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (overrides THOUGHTLINE_CONFIG).
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Directory for persisted contexts and outputs (overrides `data_dir`).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the full reasoning chain for a query.
    Run(commands::run::RunArgs),

    /// Continue a request from the stage where it stopped.
    Resume(commands::run::ResumeArgs),

    /// Classify a query's complexity without running the chain.
    Classify(commands::classify::ClassifyArgs),

    /// Inspect persisted request contexts.
    Contexts {
        #[command(subcommand)]
        action: ContextsCmd,
    },

    /// Show every stage output version for a request.
    Outputs(commands::outputs::OutputsArgs),

    /// Print the resolved configuration.
    Config,
}

/// Subcommands for `thoughtline contexts`.
#[derive(Subcommand)]
enum ContextsCmd {
    /// List request contexts.
    List(commands::contexts::ListArgs),

    /// Show one request context as JSON.
    Show {
        /// Request id.
        request_id: String,
    },

    /// Delete every request context.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = commands::load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Run(args) => commands::run::run(args, config).await?,
        Commands::Resume(args) => commands::run::resume(args, config).await?,
        Commands::Classify(args) => commands::classify::run(args, config).await?,
        Commands::Contexts { action } => match action {
            ContextsCmd::List(args) => commands::contexts::contexts_list(args, &config).await?,
            ContextsCmd::Show { request_id } => {
                commands::contexts::contexts_show(&request_id, &config).await?
            }
            ContextsCmd::Clear => commands::contexts::contexts_clear(&config).await?,
        },
        Commands::Outputs(args) => commands::outputs::run(args, &config).await?,
        Commands::Config => commands::config_show(&config)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_without_error() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_has_all_subcommands() {
        let cmd = Cli::command();
        let sub_names: Vec<&str> = cmd.get_subcommands().map(|s| s.get_name()).collect();
        for name in ["run", "resume", "classify", "contexts", "outputs", "config"] {
            assert!(sub_names.contains(&name), "missing subcommand {name}");
        }
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "thoughtline",
            "classify",
            "Show me all facilities",
            "--verbose",
            "--data-dir",
            "/tmp/tl",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/tl")));
    }

    #[test]
    fn run_parses_seed_and_dry_run() {
        let cli = Cli::try_parse_from([
            "thoughtline",
            "run",
            "Show me all facilities",
            "--examples",
            "seed.json",
            "--dry-run-tools",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.query, "Show me all facilities");
                assert!(args.dry_run_tools);
                assert_eq!(args.examples, Some(PathBuf::from("seed.json")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn contexts_list_parses_filters() {
        let cli = Cli::try_parse_from([
            "thoughtline",
            "contexts",
            "list",
            "--status",
            "failed",
            "--agent",
            "critic-agent",
        ]);
        assert!(cli.is_ok());
    }
}
