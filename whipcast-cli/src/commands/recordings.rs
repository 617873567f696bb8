//! Recordings command - list recorded segments of a session

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use whipcast_core::SessionId;
use whipcast_core::recordings::RecordingsClient;

/// Arguments for the recordings command
#[derive(Args)]
pub struct RecordingsArgs {
    /// Session id
    session: String,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

/// List recordings with their playback URLs
pub async fn recordings(args: RecordingsArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let id = SessionId::normalize(&args.session)?;
    let client = RecordingsClient::new(config.recordings_base.clone());

    let segments = client
        .list(&id)
        .await
        .with_context(|| format!("Failed to list recordings from {}", config.recordings_base))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&segments)?);
        return Ok(());
    }

    if segments.is_empty() {
        println!("No recordings for '{}'.", id);
        return Ok(());
    }

    println!("Recordings for '{}'\n", id);
    println!("{:<4} {:<32} {:>10}  {}", "#", "Start", "Duration", "URL");
    println!("{}", "-".repeat(90));
    for (i, segment) in segments.iter().enumerate() {
        let url = client.clip_url(&id, segment)?;
        println!(
            "{:<4} {:<32} {:>9.1}s  {}",
            i + 1,
            segment.start,
            segment.duration,
            url
        );
    }

    Ok(())
}
