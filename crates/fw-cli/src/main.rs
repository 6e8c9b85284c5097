//! Feed Warden CLI
//!
//! Command-line interface for fetching vendor incidents on a schedule.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use fw_connectors::ConnectorHealth;
use fw_observability::{init_logging_with_config, LoggingConfig};
use std::path::PathBuf;

mod commands;
mod config;
mod sources;
mod validator;

use commands::{cmd_fetch, cmd_state_reset, cmd_state_show, FetchOptions};
use config::{default_config_path, AppConfig};
use sources::ConfiguredSource;
use validator::ConfigValidator;

#[derive(Parser)]
#[command(name = "feed-warden")]
#[command(author = "Feed Warden Team")]
#[command(version)]
#[command(about = "Incremental incident fetching from security vendor APIs", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one fetch cycle and emit new incidents as JSON lines
    Fetch {
        /// Source name
        source: String,

        /// Append incidents to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Test source connectivity and credentials
    Test {
        /// Source name
        source: String,
    },

    /// Inspect or reset stored cursors
    State {
        #[command(subcommand)]
        action: StateCommands,
    },

    /// List configured sources
    Sources,

    /// Validate configuration
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Show the stored state
    Show {
        /// Source name
        source: String,
    },

    /// Delete the stored state so the next fetch starts over
    Reset {
        /// Source name
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None if config_path.exists() => AppConfig::load(&config_path)?,
        None => {
            if cli.verbose {
                eprintln!("Using default configuration (no config file found)");
            }
            AppConfig::default()
        }
    };

    let mut logging = LoggingConfig::from_level(&config.logging.level, config.logging.format)?;
    if cli.verbose {
        logging.level = tracing::Level::DEBUG;
    }
    init_logging_with_config(logging)?;

    match cli.command {
        Commands::Fetch { source, output } => {
            cmd_fetch(
                &config,
                FetchOptions {
                    source,
                    output,
                    format: cli.format,
                },
            )
            .await
        }
        Commands::Test { source } => cmd_test(&config, &source, cli.format).await,
        Commands::State { action } => match action {
            StateCommands::Show { source } => cmd_state_show(&config, &source, cli.format).await,
            StateCommands::Reset { source } => cmd_state_reset(&config, &source).await,
        },
        Commands::Sources => cmd_sources(&config, cli.format),
        Commands::Validate { config: cfg_path } => cmd_validate(cfg_path.unwrap_or(config_path)),
    }
}

async fn cmd_test(config: &AppConfig, name: &str, format: OutputFormat) -> Result<()> {
    let source = ConfiguredSource::build(config.source(name)?).await?;

    if format == OutputFormat::Text {
        println!("Testing source '{}'...", name.bold());
    }

    let connected = source.test_connection().await?;
    let health = source.health().await?;

    if format == OutputFormat::Json {
        let (status, detail) = match &health {
            ConnectorHealth::Healthy => ("healthy", None),
            ConnectorHealth::Degraded(d) => ("degraded", Some(d.as_str())),
            ConnectorHealth::Unhealthy(d) => ("unhealthy", Some(d.as_str())),
        };
        println!(
            "{}",
            serde_json::json!({
                "source": name,
                "connected": connected,
                "health": status,
                "detail": detail,
            })
        );
    } else {
        match &health {
            ConnectorHealth::Healthy => println!("  {} Connection OK", "✓".green()),
            ConnectorHealth::Degraded(d) => println!("  {} Degraded: {}", "⚠".yellow(), d),
            ConnectorHealth::Unhealthy(d) => println!("  {} Unhealthy: {}", "✗".red(), d),
        }
    }

    if !connected || matches!(health, ConnectorHealth::Unhealthy(_)) {
        bail!("Source '{}' is not reachable", name);
    }
    Ok(())
}

fn cmd_sources(config: &AppConfig, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let sources: Vec<_> = config
            .sources
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name(),
                    "type": s.source_type(),
                    "base_url": s.base_url(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    if config.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{}", "Configured sources".bold());
    println!("─────────────────────");
    for source in &config.sources {
        println!(
            "  {:<24} {:<14} {}",
            source.name().cyan(),
            source.source_type(),
            source.base_url().unwrap_or("-")
        );
    }
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<()> {
    println!(
        "{} {}",
        "Validating".cyan(),
        config_path.display().to_string().bold()
    );

    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Configuration at {} is unusable", config_path.display()))?;

    let result = ConfigValidator::validate(&config);
    result.print();

    if result.has_errors() {
        bail!("Configuration has {} error(s)", result.errors.len());
    }
    Ok(())
}
