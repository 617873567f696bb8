//! Profile command - fetch a session's telemetry profile

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use whipcast_core::SessionId;
use whipcast_core::telemetry::TelemetryClient;

/// Arguments for the profile command
#[derive(Args)]
pub struct ProfileArgs {
    /// Session id
    session: String,
}

/// Print the collector's profile for a session
pub async fn profile(args: ProfileArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let id = SessionId::normalize(&args.session)?;
    let client = TelemetryClient::new(config.telemetry.base_url.clone());

    let profile = client
        .profile(&id)
        .await
        .with_context(|| format!("Profile for '{}' not found", id))?;

    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}
