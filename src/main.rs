//! Herald - alert notification delivery.

use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use herald::cli::{Cli, LogFormat, parse_alert_group, read_alert_group};
use herald::config::Config;
use herald::{AlertGroup, NotifierDeps, NotifierRegistry};

/// Initialize the tracing subscriber with the specified log format.
///
/// - `LogFormat::Text`: Human-readable format for journalctl
/// - `LogFormat::Json`: Structured JSON format for log aggregation
fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.log_format);

    info!(config_path = %cli.config.display(), "Loading configuration");

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    info!("Validating configuration");
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(error = %e, "Configuration validation error");
        }
        error!(error_count = errors.len(), "Configuration validation failed");
        return ExitCode::FAILURE;
    }

    // Building every notifier validates receiver settings and secrets.
    let registry = match build_registry(&config) {
        Ok(r) => r,
        Err(errors) => {
            for e in &errors {
                error!(error = %e, "Receiver configuration error");
            }
            error!(error_count = errors.len(), "Configuration validation failed");
            return ExitCode::FAILURE;
        }
    };

    if cli.validate {
        println!("Configuration is valid: {}", cli.config.display());
        println!("  Receivers: {}", registry.len());
        for receiver in &config.receivers {
            println!("    - {} ({})", receiver.name, receiver.kind);
        }
        println!("  Templates: {}", config.templates.len());
        println!(
            "  SMTP: {}",
            if config.smtp.is_some() {
                "configured"
            } else {
                "not configured"
            }
        );
        return ExitCode::SUCCESS;
    }

    match run(&cli, registry) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Delivery aborted");
            ExitCode::FAILURE
        }
    }
}

fn build_registry(config: &Config) -> Result<NotifierRegistry, Vec<herald::ConfigError>> {
    let deps = NotifierDeps::from_config(config).map_err(|e| vec![e])?;
    NotifierRegistry::from_config(&config.receivers, &deps)
}

fn read_group(cli: &Cli) -> Result<AlertGroup> {
    match &cli.alerts {
        Some(path) if path.as_os_str() != "-" => read_alert_group(path),
        _ => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("failed to read alert group from stdin")?;
            parse_alert_group(&content)
        }
    }
}

/// Delivers one alert group. Returns whether every receiver succeeded.
fn run(cli: &Cli, registry: NotifierRegistry) -> Result<bool> {
    let group = read_group(cli)?;
    let registry = if cli.receivers.is_empty() {
        registry
    } else {
        registry.select(&cli.receivers)?
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c signal");
                return;
            }
            warn!("Received shutdown signal, cancelling in-flight notifications");
            cancel_clone.cancel();
        });

        info!(
            group_key = %group.key(),
            status = %group.status(),
            alert_count = group.len(),
            receivers = registry.len(),
            "Dispatching alert group"
        );
        let outcomes = registry.dispatch(&cancel, &group).await;

        let mut all_ok = true;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(()) => println!("ok      {} ({})", outcome.receiver, outcome.notifier_type),
                Err(e) => {
                    all_ok = false;
                    let class = if e.is_retryable() { "retry" } else { "failed" };
                    println!("{:<7} {} ({}): {}", class, outcome.receiver, outcome.notifier_type, e);
                }
            }
        }
        Ok(all_ok)
    })
}
