//! Kino CLI - Headless coordination runner
//!
//! Features:
//! - Scripted multi-view scenarios against the simulated backend
//! - Event stream output as text or JSON
//! - Quality ladder inspection for HLS manifests

use clap::{Parser, Subcommand, ValueEnum};
use kino_coordinator::CoordinatorConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod stage;

/// Kino CLI - Playback coordination toolkit
#[derive(Parser)]
#[command(name = "kino-cli")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Multi-view playback coordination runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Coordinator configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted scenario and print the resulting event stream
    Simulate {
        #[arg(value_enum)]
        scenario: Scenario,
    },

    /// Fetch a manifest and print its quality ladder
    Qualities {
        /// URL to master or media playlist
        manifest: String,

        /// Fail on ladder warnings
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Scenario {
    /// Views attaching, detaching and joining late on one session
    MultiView,
    /// PiP host torn down while its window is showing
    PipHandoff,
    /// Short and long stalls through the buffering debouncer
    Debounce,
    /// Media-control ownership across two sessions
    Ownership,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = match &cli.config {
        Some(path) => CoordinatorConfig::from_file(path)?,
        None => CoordinatorConfig::default(),
    };

    match cli.command {
        Commands::Simulate { scenario } => {
            commands::simulate(scenario, config, &cli.format).await?;
        }
        Commands::Qualities { manifest, strict } => {
            commands::qualities(&manifest, strict, &config, &cli.format).await?;
        }
    }

    Ok(())
}
