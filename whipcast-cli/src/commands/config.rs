//! Config command - manage configuration files

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use whipcast_core::config::{ConfigFile, sample_config};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the effective configuration
    Show,

    /// Check the configuration for errors and warnings
    Check,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(ConfigFile::default_path);

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist)");
            }
        }
        ConfigCommand::Show => {
            if !path.exists() {
                println!("No configuration file found at: {}", path.display());
                println!();
                println!("Using default settings. Create a config file with:");
                println!("  whipcast config init");
                println!();
            } else {
                println!("Configuration file: {}\n", path.display());
            }

            let file = ConfigFile::load_from(path).context("Failed to load config file")?;
            print!("{}", toml::to_string_pretty(&file).context("Failed to render config")?);
        }
        ConfigCommand::Check => {
            let file = ConfigFile::load_from(path.clone()).context("Failed to load config file")?;
            let config = file.to_publisher_config().context("Invalid configuration")?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("{}: OK", path.display());
            } else {
                for warning in warnings {
                    println!("warning: {}", warning);
                }
            }
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists: {}", path.display());
                println!();
                println!("Use --force to overwrite, or edit the existing file.");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).context("Failed to create config directory")?;
                }
            }

            std::fs::write(&path, sample_config()).context("Failed to write config file")?;

            println!("Created configuration file: {}", path.display());
            println!();
            println!("Edit this file to point whipcast at your ingest server.");
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
