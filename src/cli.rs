//! Command-line interface for herald using clap.
//!
//! Supports the configuration file path via `-c`, a validate-only mode and a
//! one-shot delivery of an alert group read from a JSON file.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::alert::{Alert, AlertGroup, LabelSet};
use crate::config::DEFAULT_CONFIG_PATH;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format for journalctl (default).
    #[default]
    Text,
    /// Structured JSON format for log aggregation.
    Json,
}

/// Alert notification delivery to chat, paging and ticketing integrations.
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(version)]
#[command(about = "Alert notification delivery to chat, paging and ticketing integrations")]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Validate configuration and exit.
    #[arg(long = "validate")]
    pub validate: bool,

    /// Log format: text or json.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Deliver the alert group in this JSON file to every receiver and exit.
    #[arg(long = "alerts", conflicts_with = "validate")]
    pub alerts: Option<PathBuf>,

    /// Only deliver to these receivers (repeatable).
    #[arg(long = "receiver", requires = "alerts")]
    pub receivers: Vec<String>,
}

/// On-disk shape of an alert group.
#[derive(Debug, Deserialize)]
struct AlertGroupFile {
    #[serde(default)]
    group_labels: LabelSet,
    alerts: Vec<Alert>,
}

/// Parses an alert group from JSON text.
pub fn parse_alert_group(content: &str) -> anyhow::Result<AlertGroup> {
    let file: AlertGroupFile = serde_json::from_str(content).context("invalid alert group JSON")?;
    Ok(AlertGroup::new(file.group_labels, file.alerts)?)
}

/// Reads an alert group from a JSON file.
pub fn read_alert_group(path: &Path) -> anyhow::Result<AlertGroup> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_alert_group(&content).with_context(|| format!("in {}", path.display()))
}
