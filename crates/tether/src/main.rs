//! Tether - Monitoring agent
//!
//! # Usage
//!
//! ```bash
//! # Run the agent (default)
//! tether
//! tether --config /etc/tether/tether.toml
//!
//! # Show the persisted registration state
//! tether state
//! ```

mod cmd;
mod facts;
mod health;
mod observer;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tether_config::{Config, LogConfig, LogFormat, LogOutput};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Config files tried, in order, when `--config` is not given
const DEFAULT_CONFIG_PATHS: &[&str] = &["/etc/tether/tether.toml", "tether.toml"];

/// Tether - Monitoring agent
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent
    Run,

    /// Print the persisted registration state
    State(cmd::state::StateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().or_else(default_config_path);
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Some(Command::State(args)) => {
            // State only prints to stdout
            cmd::state::run(args, &config)
        }
        Some(Command::Run) | None => {
            let level = resolve_log_level(cli.log_level.as_deref(), &config);
            init_logging(&level, &config.log)?;
            cmd::run::run(config, config_path).await
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Resolve log level: CLI flag > config file > default "info"
fn resolve_log_level(cli_level: Option<&str>, config: &Config) -> String {
    match cli_level {
        Some(level) => level.to_string(),
        None => config.log.level.as_str().to_string(),
    }
}

fn log_writer(output: &LogOutput) -> Result<BoxMakeWriter> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File(path) => {
            let file = open_log_file(Path::new(path))?;
            BoxMakeWriter::new(Arc::new(file))
        }
    })
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, log: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(log.directives(level))
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let ansi = !matches!(log.output, LogOutput::File(_));
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(ansi)
        .with_writer(log_writer(&log.output)?);
    let layer = match log.format {
        LogFormat::Console => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    };

    tracing_subscriber::registry().with(layer).with(filter).init();

    Ok(())
}
