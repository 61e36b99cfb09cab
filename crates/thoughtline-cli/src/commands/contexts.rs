//! `thoughtline contexts` -- inspect persisted request contexts.
//!
//! # Examples
//!
//! ```text
//! thoughtline contexts list --data-dir ./tl
//! thoughtline contexts list --status failed --agent critic-agent
//! thoughtline contexts list --search facilities
//! thoughtline contexts show 6f1c...
//! thoughtline contexts clear
//! ```

use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};
use thoughtline_types::config::PipelineConfig;
use thoughtline_types::context::{ContextFilter, RequestContext, RequestStatus, StageName};

use super::{format_datetime, open_stores, preview};

/// Arguments for `thoughtline contexts list`.
#[derive(Args)]
pub struct ListArgs {
    /// Only contexts in this status (pending, in-progress, completed, failed).
    #[arg(long)]
    pub status: Option<String>,

    /// Only contexts whose chain contains this stage (e.g. critic-agent).
    #[arg(long)]
    pub agent: Option<String>,

    /// Case-insensitive text match over request ids and queries.
    #[arg(long)]
    pub search: Option<String>,
}

impl ListArgs {
    fn filter(&self) -> anyhow::Result<ContextFilter> {
        Ok(ContextFilter {
            status: self
                .status
                .as_deref()
                .map(str::parse::<RequestStatus>)
                .transpose()?,
            agent: self
                .agent
                .as_deref()
                .map(str::parse::<StageName>)
                .transpose()?,
            ..Default::default()
        })
    }
}

/// List contexts as a table.
pub async fn contexts_list(args: ListArgs, config: &PipelineConfig) -> anyhow::Result<()> {
    let (contexts, _) = open_stores(config)?;
    let filter = args.filter()?;
    let found: Vec<RequestContext> = match args.search {
        Some(ref text) => contexts
            .search(text)
            .await?
            .into_iter()
            .filter(|ctx| filter.matches(ctx))
            .collect(),
        None => contexts.get_all(&filter).await?,
    };

    if found.is_empty() {
        println!("No request contexts found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["REQUEST ID", "STATUS", "STAGE", "QUERY", "UPDATED"]);
    for ctx in &found {
        table.add_row([
            ctx.request_id.clone(),
            ctx.status.to_string(),
            ctx.current_stage.map(|s| s.to_string()).unwrap_or_default(),
            preview(ctx.user_query.as_deref().unwrap_or(""), 48),
            format_datetime(&ctx.updated_at),
        ]);
    }
    println!("{table}");
    println!("  {} context(s)", found.len());
    Ok(())
}

/// Print one context as JSON.
pub async fn contexts_show(request_id: &str, config: &PipelineConfig) -> anyhow::Result<()> {
    let (contexts, _) = open_stores(config)?;
    let ctx = contexts.get(request_id).await?;
    println!("{}", serde_json::to_string_pretty(&ctx)?);
    Ok(())
}

/// Delete every context.
pub async fn contexts_clear(config: &PipelineConfig) -> anyhow::Result<()> {
    let (contexts, _) = open_stores(config)?;
    let removed = contexts.count().await?;
    contexts.clear().await?;
    println!("Removed {removed} context(s).");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_parses_names() {
        let args = ListArgs {
            status: Some("failed".into()),
            agent: Some("critic-agent".into()),
            search: None,
        };
        let filter = args.filter().unwrap();
        assert_eq!(filter.status, Some(RequestStatus::Failed));
        assert_eq!(filter.agent, Some(StageName::CriticAgent));
    }

    #[test]
    fn unknown_status_is_an_error() {
        let args = ListArgs {
            status: Some("sleeping".into()),
            agent: None,
            search: None,
        };
        assert!(args.filter().is_err());
    }
}
