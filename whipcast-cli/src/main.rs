//! whipcast CLI
//!
//! Publish a composited screen + camera stream to a WHIP ingest server.
//!
//! # Usage
//!
//! ```bash
//! # Show what capture sources are available
//! whipcast probe
//!
//! # Publish as session "room-1" until Ctrl+C
//! whipcast publish room-1
//!
//! # List recordings of a session
//! whipcast recordings room-1
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// whipcast - WHIP publisher with local preview
#[derive(Parser)]
#[command(name = "whipcast")]
#[command(version)]
#[command(about = "Publish a composited screen and camera stream over WHIP", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report camera, microphone and screen availability
    Probe(commands::DeviceArgs),

    /// Publish to the ingest server until interrupted
    Publish(commands::PublishArgs),

    /// List recordings of a session
    #[command(alias = "ls")]
    Recordings(commands::RecordingsArgs),

    /// Show the keystroke telemetry profile of a session
    Profile(commands::ProfileArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(format!("whipcast={}", level).parse()?))
        .with_target(false)
        .init();

    let config = cli.config;
    match cli.command {
        Commands::Probe(args) => commands::probe(args).await?,
        Commands::Publish(args) => commands::publish(args, config).await?,
        Commands::Recordings(args) => commands::recordings(args, config).await?,
        Commands::Profile(args) => commands::profile(args, config).await?,
        Commands::Config(args) => commands::config(args, config).await?,
    }

    Ok(())
}
