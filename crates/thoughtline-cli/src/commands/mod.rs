//! CLI command implementations for `thoughtline`.
//!
//! - [`run`] -- full chain and resume.
//! - [`classify`] -- complexity routing only.
//! - [`contexts`] -- request context inspection.
//! - [`outputs`] -- per-stage output history.

pub mod classify;
pub mod contexts;
pub mod outputs;
pub mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thoughtline_core::embeddings::hash_embedder::HashEmbedder;
use thoughtline_core::memory::ExampleMemories;
use thoughtline_core::store::{OutputStores, RequestContextStore, file_backed_contexts};
use thoughtline_llm::{LanguageModel, OpenAiCompatModel};
use thoughtline_types::config::PipelineConfig;
use thoughtline_types::example::ExampleSeed;
use tracing::debug;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "THOUGHTLINE_CONFIG";

/// Load configuration from `config_override`, else `THOUGHTLINE_CONFIG`.
///
/// An explicit `--config` path must exist. A `THOUGHTLINE_CONFIG` path that
/// does not exist falls back to defaults, as does no path at all.
/// `data_dir_override` replaces the file's `data_dir`.
pub fn load_config(
    config_override: Option<&str>,
    data_dir_override: Option<PathBuf>,
) -> anyhow::Result<PipelineConfig> {
    let mut config = match config_override {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!("config file not found: {path_str}");
            }
            read_config(path)?
        }
        None => match std::env::var(CONFIG_ENV) {
            Ok(path_str) if Path::new(&path_str).exists() => read_config(Path::new(&path_str))?,
            Ok(path_str) => {
                debug!(path = %path_str, "config file absent, using defaults");
                PipelineConfig::default()
            }
            Err(_) => PipelineConfig::default(),
        },
    };
    if let Some(dir) = data_dir_override {
        config.data_dir = Some(dir);
    }
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> anyhow::Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config: {e}"))?;
    let config: PipelineConfig = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Display the resolved configuration as formatted JSON.
pub fn config_show(config: &PipelineConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// The persisted stores under `data_dir`. Inspection commands need one.
pub fn open_stores(config: &PipelineConfig) -> anyhow::Result<(RequestContextStore, OutputStores)> {
    let Some(ref dir) = config.data_dir else {
        anyhow::bail!("no data directory: pass --data-dir or set data_dir in the config");
    };
    Ok((file_backed_contexts(dir), OutputStores::file_backed(dir)))
}

/// The configured OpenAI-compatible model.
pub fn language_model(config: &PipelineConfig) -> Arc<dyn LanguageModel> {
    Arc::new(OpenAiCompatModel::new(&config.llm))
}

/// Example memories, seeded from `seed_path` when given.
pub async fn example_memories(
    config: &PipelineConfig,
    seed_path: Option<&Path>,
) -> anyhow::Result<ExampleMemories> {
    let memories =
        ExampleMemories::in_memory(Arc::new(HashEmbedder::new(config.embedding.dimension)));
    if let Some(path) = seed_path {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read examples '{}': {e}", path.display()))?;
        let seed: ExampleSeed = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse examples '{}': {e}", path.display()))?;
        memories.seed(seed).await?;
    }
    Ok(memories)
}

/// Format a `chrono::DateTime<Utc>` as a human-readable string.
pub(crate) fn format_datetime(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Truncate to `max_len` characters, appending "..." if truncated.
pub(crate) fn preview(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_len).collect();
        format!("{cut}...")
    }
}
