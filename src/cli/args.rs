//! Command-line argument definitions and helpers.

use std::path::{Path, PathBuf};

use clap::Args;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::ConfigSource;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during argument processing.
#[derive(Debug, Error)]
pub enum ArgsError {
    /// I/O error reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument combination.
    #[error("{0}")]
    InvalidArgs(String),

    /// JSON input could not be parsed.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// Result type for argument operations.
pub type Result<T> = std::result::Result<T, ArgsError>;

// =============================================================================
// Global Arguments
// =============================================================================

/// Global arguments that apply to all commands.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Path to the main configuration file.
    #[arg(long = "config-file", global = true)]
    pub config_file: Option<PathBuf>,

    /// Path to the configuration overrides file.
    #[arg(long = "config-file-overrides", global = true)]
    pub config_file_overrides: Option<PathBuf>,

    /// Configuration overrides in the form name=value.
    #[arg(long = "config", value_parser = parse_config_override, global = true)]
    pub config_overrides: Vec<(String, String)>,

    /// Format output as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable the in-process object cache.
    #[arg(long = "no-cache", global = true)]
    pub no_cache: bool,

    /// Repository directory. Defaults to the `[repository] path` config key.
    #[arg(short = 'C', long = "repo", global = true)]
    pub repo: Option<PathBuf>,
}

impl GlobalArgs {
    /// Convert to a ConfigSource for reading configuration.
    pub fn to_config_source(&self) -> ConfigSource {
        ConfigSource {
            config_file: self.config_file.clone(),
            override_file: self.config_file_overrides.clone(),
            overrides: self.config_overrides.clone(),
        }
    }
}

/// Parse a config override from "name=value" format.
fn parse_config_override(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid config override '{}': expected name=value", s))?;
    Ok((name.to_string(), value.to_string()))
}

// =============================================================================
// Input/Output Helpers
// =============================================================================

/// Read a JSON document from a file, or from stdin when the path is `-`.
pub async fn read_json_input(path: &Path) -> Result<Value> {
    let contents = if path == Path::new("-") {
        let mut contents = String::new();
        tokio::io::stdin().read_to_string(&mut contents).await?;
        contents
    } else {
        tokio::fs::read_to_string(path).await?
    };
    serde_json::from_str(&contents).map_err(|source| ArgsError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Write text to stdout, adding a trailing newline if it lacks one.
pub async fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;
    Ok(())
}

/// Write a value to stdout as pretty-printed JSON.
pub async fn write_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|source| ArgsError::Json {
        path: "<stdout>".to_string(),
        source,
    })?;
    write_stdout(&text).await
}
