//! Publish command - stream to the ingest server until interrupted

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;
use whipcast_core::{Phase, Publisher, PublisherEvent, StartOutcome, StopOutcome};

use super::DeviceArgs;

/// Arguments for the publish command
#[derive(Args)]
pub struct PublishArgs {
    /// Session id; also the publish path on the ingest server
    session: String,

    /// Ingest base URL (overrides the config file)
    #[arg(short, long)]
    ingest: Option<Url>,

    /// Show the local preview
    #[arg(short, long)]
    preview: bool,

    #[command(flatten)]
    devices: DeviceArgs,
}

/// Publish until Ctrl+C or until the connection drops
pub async fn publish(args: PublishArgs, config_path: Option<PathBuf>) -> Result<()> {
    println!("whipcast - Publishing\n");

    let mut config = super::load_config(config_path)?;
    if let Some(ingest) = args.ingest {
        config = config.with_ingest_base(ingest);
    }
    if args.preview {
        config.preview_visible = true;
    }

    println!("Configuration:");
    println!("  Ingest:      {}", config.ingest_base);
    println!(
        "  Canvas:      {}x{} @ {} fps",
        config.publish.width, config.publish.height, config.publish.fps
    );
    println!("  ICE servers: {}", config.ice_servers.join(", "));
    println!();

    let publisher = Publisher::new(config, Arc::new(args.devices.devices()));
    let mut events = publisher.subscribe();

    let report = publisher.load().await;
    for (kind, availability) in report.iter() {
        println!("  {:<11} {}", kind, availability);
    }
    println!();

    let locator = match publisher
        .start(&args.session)
        .await
        .with_context(|| format!("Failed to publish '{}'", args.session))?
    {
        StartOutcome::Publishing { locator } => locator,
        StartOutcome::AlreadyActive(phase) => anyhow::bail!("Session already {}", phase),
    };

    println!("Publishing '{}'", args.session.trim());
    if let Some(locator) = &locator {
        println!("  Resource: {}", locator);
    }
    println!();
    println!("Press Ctrl+C to stop...\n");

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            println!("\nReceived interrupt signal...");
        }
        _ = async {
            loop {
                match events.recv().await {
                    Ok(PublisherEvent::Connection(state)) => {
                        info!("Connection {}", state);
                        if state == "failed" || state == "closed" {
                            warn!("Connection {}, stopping", state);
                            break;
                        }
                    }
                    Ok(PublisherEvent::Phase(Phase::Idle)) => break,
                    Ok(PublisherEvent::Error(message)) => warn!("{}", message),
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("Missed {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }
        } => {
            info!("Session ended");
        }
    }

    println!("Stopping...");
    match publisher.stop().await {
        StopOutcome::Stopped => println!("Stopped."),
        StopOutcome::NotPublishing(phase) => println!("Session already {}.", phase),
    }

    Ok(())
}
