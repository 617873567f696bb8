//! CLI command implementations

mod config;
mod probe;
mod profile;
mod publish;
mod recordings;

pub use config::{ConfigArgs, config};
pub use probe::{DeviceArgs, probe};
pub use profile::{ProfileArgs, profile};
pub use publish::{PublishArgs, publish};
pub use recordings::{RecordingsArgs, recordings};

use anyhow::{Context, Result};
use std::path::PathBuf;
use whipcast_core::config::{ConfigFile, PublisherConfig};

/// Load the config file (explicit path or default) and validate it
pub fn load_config(path: Option<PathBuf>) -> Result<PublisherConfig> {
    let file = match path {
        Some(path) => ConfigFile::load_from(path.clone())
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigFile::load_or_default(),
    };
    file.to_publisher_config().context("Invalid configuration")
}
