//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::parse_duration_ms;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<RunConfig> {
    let config: RunConfig = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: RunConfig) -> Result<RunConfig> {
    if let Some(ref url) = cli.store_url {
        config.store.url = Some(url.clone());
    }
    if let Some(ref interval) = cli.poll_interval {
        config.store.poll_interval_ms = parse_duration_ms(interval)
            .context("Invalid poll interval")?;
    }
    if let Some(ref path) = cli.result_file {
        config.output.result_file = Some(path.clone());
    }
    if let Some(ref path) = cli.events_file {
        config.events.file = Some(path.clone());
    }

    Ok(config)
}

/// Build the complete process configuration from CLI, TOML and info file
pub fn load_config(cli: &Cli) -> Result<Config> {
    let run = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => RunConfig::default(),
    };
    let run = merge_cli_with_config(cli, run)?;
    let (info, local) = ExecutionInfo::resolve(cli.info.as_deref());

    Ok(Config { info, local, run })
}
