//! Medallion CLI
//!
//! Command-line interface for running and inspecting medallion pipelines.

use clap::{Parser, Subcommand};
use colored::Colorize;
use medallion_cli::commands::{CheckpointsCommand, RunCommand, ValidateCommand};
use medallion_cli::output::OutputFormat;
use medallion_config::{LogFormat, MedallionConfig, ObservabilityConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "medallion",
    version,
    about = "Incremental bronze/silver/gold pipeline engine",
    long_about = "Runs a declarative medallion pipeline in micro-batches.\n\n\
                  Configuration is layered: the bundled clickstream pipeline, \
                  then --config, then MEDALLION_* environment variables."
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, value_name = "FILE", env = "MEDALLION_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline
    #[command(name = "run")]
    Run(RunCommand),

    /// Validate configuration and pipeline definition
    #[command(name = "validate")]
    Validate(ValidateCommand),

    /// Show stored checkpoints
    #[command(name = "checkpoints")]
    Checkpoints(CheckpointsCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = MedallionConfig::load(cli.config.as_deref())?;

    init_tracing(&config.observability, cli.verbose);

    match cli.command {
        Commands::Run(command) => command.execute(config, cli.output).await?,
        Commands::Validate(command) => command.execute(config)?,
        Commands::Checkpoints(command) => command.execute(config, cli.output).await?,
    }
    Ok(())
}

/// `RUST_LOG` wins over the configured level; `--verbose` wins over both
fn init_tracing(observability: &ObservabilityConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("medallion=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&observability.log_level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match observability.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}
