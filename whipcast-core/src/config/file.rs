//! Configuration file loading
//!
//! Loads user configuration from `~/.config/whipcast/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    DEFAULT_INGEST_URL, DEFAULT_RECORDINGS_URL, DEFAULT_STUN_SERVER, DEFAULT_TELEMETRY_URL,
    PublisherConfig, TelemetryConfig,
};
use crate::compositor::{BLACK, CompositorLayout};
use crate::error::{Result, WhipcastError};

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Ingest server settings
    #[serde(default)]
    pub ingest: IngestSettings,

    /// Local preview canvas
    #[serde(default)]
    pub preview: PreviewSettings,

    /// Publish canvas
    #[serde(default)]
    pub publish: CanvasSettings,

    /// Load-time probing
    #[serde(default)]
    pub probe: ProbeSettings,

    /// Keystroke telemetry reporting
    #[serde(default)]
    pub telemetry: TelemetrySettings,

    /// Recordings server
    #[serde(default)]
    pub recordings: RecordingsSettings,
}

/// Ingest server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Base URL; sessions publish to `<url>/<session>/whip`
    #[serde(default = "default_ingest_url")]
    pub url: String,

    /// STUN/TURN server URLs
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
}

/// Canvas geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Overlay inset from the top-right corner
    pub margin: u32,
}

/// Preview settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSettings {
    #[serde(flatten)]
    pub canvas: CanvasSettings,

    /// Show the preview on startup
    #[serde(default)]
    pub visible: bool,
}

/// Load-time probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Probe and acquire camera/microphone on load
    #[serde(default = "default_true")]
    pub on_load: bool,

    /// Also ask for the screen on load
    #[serde(default = "default_true")]
    pub display_on_load: bool,
}

/// Telemetry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_telemetry_url")]
    pub url: String,

    /// Milliseconds between reports
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Maximum keystrokes per report
    #[serde(default = "default_window")]
    pub window: usize,
}

/// Recordings server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingsSettings {
    #[serde(default = "default_recordings_url")]
    pub url: String,
}

fn default_ingest_url() -> String {
    DEFAULT_INGEST_URL.to_string()
}

fn default_ice_servers() -> Vec<String> {
    vec![DEFAULT_STUN_SERVER.to_string()]
}

fn default_telemetry_url() -> String {
    DEFAULT_TELEMETRY_URL.to_string()
}

fn default_recordings_url() -> String {
    DEFAULT_RECORDINGS_URL.to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_window() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            url: default_ingest_url(),
            ice_servers: default_ice_servers(),
        }
    }
}

impl From<&CompositorLayout> for CanvasSettings {
    fn from(layout: &CompositorLayout) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            fps: layout.fps,
            margin: layout.margin,
        }
    }
}

impl Default for CanvasSettings {
    fn default() -> Self {
        (&CompositorLayout::publish()).into()
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            canvas: (&CompositorLayout::preview()).into(),
            visible: false,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            on_load: true,
            display_on_load: true,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            url: default_telemetry_url(),
            interval_ms: default_interval_ms(),
            window: default_window(),
        }
    }
}

impl Default for RecordingsSettings {
    fn default() -> Self {
        Self {
            url: default_recordings_url(),
        }
    }
}

impl CanvasSettings {
    fn layout(&self) -> CompositorLayout {
        CompositorLayout {
            width: self.width,
            height: self.height,
            fps: self.fps,
            pip_fraction: 0.25,
            margin: self.margin,
            background: BLACK,
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("whipcast").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("whipcast")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/whipcast/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| WhipcastError::config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| WhipcastError::config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    WhipcastError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| WhipcastError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| WhipcastError::config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Write the sample config if no config file exists yet
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        std::fs::create_dir_all(path.parent().unwrap_or(&path)).map_err(|e| {
            WhipcastError::config(format!("Failed to create config directory: {}", e))
        })?;
        std::fs::write(&path, sample_config())
            .map_err(|e| WhipcastError::config(format!("Failed to write config file: {}", e)))?;
        info!("Created {:?}", path);
        Ok(true)
    }

    /// Convert into a validated runtime configuration
    pub fn to_publisher_config(&self) -> Result<PublisherConfig> {
        let config = PublisherConfig {
            ingest_base: parse_url("ingest.url", &self.ingest.url)?,
            ice_servers: self.ingest.ice_servers.clone(),
            preview: self.preview.canvas.layout(),
            preview_visible: self.preview.visible,
            publish: self.publish.layout(),
            probe_on_load: self.probe.on_load,
            display_on_load: self.probe.display_on_load,
            telemetry: TelemetryConfig {
                base_url: parse_url("telemetry.url", &self.telemetry.url)?,
                interval: Duration::from_millis(self.telemetry.interval_ms),
                window: self.telemetry.window,
            },
            recordings_base: parse_url("recordings.url", &self.recordings.url)?,
        };

        config.validate_strict().map_err(WhipcastError::Config)?;
        for warning in config.validate() {
            warn!("{}", warning);
        }
        Ok(config)
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| WhipcastError::config(format!("{} = {:?}: {}", key, value, e)))
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# whipcast configuration

[ingest]
# Ingest server base URL. Sessions publish to <url>/<session-id>/whip
url = "http://localhost:8889/"

# STUN/TURN servers used for ICE
ice_servers = ["stun:stun.l.google.com:19302"]

[preview]
# Local preview canvas
width = 854
height = 480
fps = 30
# Camera overlay inset from the top-right corner, in pixels
margin = 12
# Show the preview on startup
visible = false

[publish]
# Composited stream sent to the ingest server
width = 1280
height = 720
fps = 30
margin = 20

[probe]
# Check permissions and acquire camera/microphone when starting
on_load = true
# Also ask for the screen when starting
display_on_load = true

[telemetry]
# Keystroke timing collector
url = "http://localhost:8080/"
# Milliseconds between reports
interval_ms = 1000
# Maximum keystrokes per report
window = 256

[recordings]
# Recording playback server
url = "http://localhost:9996/"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();
        assert_eq!(config.ingest.url, "http://localhost:8889/");
        assert_eq!(config.preview.canvas.width, 854);
        assert_eq!(config.publish.margin, 20);
        assert!(config.probe.on_load);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = sample_config();
        let config: ConfigFile = toml::from_str(&sample).unwrap();
        assert_eq!(config.preview.canvas.margin, 12);
        assert_eq!(config.telemetry.interval_ms, 1000);
    }

    #[test]
    fn test_sample_matches_defaults() {
        let sample: ConfigFile = toml::from_str(&sample_config()).unwrap();
        assert_eq!(
            sample.to_publisher_config().unwrap(),
            ConfigFile::default().to_publisher_config().unwrap()
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut config = ConfigFile::default();
        config.ingest.url = "not a url".into();
        let err = config.to_publisher_config().unwrap_err();
        assert!(err.to_string().contains("ingest.url"));
    }
}
