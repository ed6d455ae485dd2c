use anyhow::{Context, Result};
use std::path::Path;

use feedmix::config::Config;

/// Load configuration from `path`, or from the environment when absent
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::from_env().context("Failed to load config from environment"),
    }
}

pub fn check_config(config: &Config) -> Result<()> {
    config.validate().context("Configuration is invalid")?;

    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("Configuration OK");
    println!("================");
    println!("{rendered}");

    tracing::info!(
        article_limit = config.retrieval.article_limit,
        max_per_source = config.retrieval.max_per_source,
        min_sources = config.retrieval.min_sources,
        "Configuration validated"
    );
    Ok(())
}
