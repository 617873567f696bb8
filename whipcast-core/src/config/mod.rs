//! Configuration types for whipcast
//!
//! `PublisherConfig` is the validated runtime configuration the controller is
//! built from. `ConfigFile` is its on-disk TOML form.

mod file;

pub use file::{ConfigFile, sample_config};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::compositor::CompositorLayout;

/// Default ingest server (WHIP endpoints live under it)
pub const DEFAULT_INGEST_URL: &str = "http://localhost:8889/";
/// Default telemetry collector
pub const DEFAULT_TELEMETRY_URL: &str = "http://localhost:8080/";
/// Default recordings server
pub const DEFAULT_RECORDINGS_URL: &str = "http://localhost:9996/";
/// Default STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Telemetry reporting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Collector base URL
    pub base_url: Url,
    /// Time between reports
    pub interval: Duration,
    /// Maximum keystrokes kept per report
    pub window: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: parse_default(DEFAULT_TELEMETRY_URL),
            interval: Duration::from_secs(1),
            window: 256,
        }
    }
}

/// Runtime configuration of a publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Ingest base URL
    pub ingest_base: Url,
    /// ICE servers for the peer connection
    pub ice_servers: Vec<String>,
    /// Preview canvas layout
    pub preview: CompositorLayout,
    /// Show the preview as soon as the publisher loads
    pub preview_visible: bool,
    /// Publish canvas layout
    pub publish: CompositorLayout,
    /// Probe capabilities and acquire sources on load
    pub probe_on_load: bool,
    /// Include a display acquisition in the on-load probe
    pub display_on_load: bool,
    /// Telemetry reporting
    pub telemetry: TelemetryConfig,
    /// Recordings server base URL
    pub recordings_base: Url,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            ingest_base: parse_default(DEFAULT_INGEST_URL),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            preview: CompositorLayout::preview(),
            preview_visible: false,
            publish: CompositorLayout::publish(),
            probe_on_load: true,
            display_on_load: true,
            telemetry: TelemetryConfig::default(),
            recordings_base: parse_default(DEFAULT_RECORDINGS_URL),
        }
    }
}

impl PublisherConfig {
    /// Use a different ingest server
    pub fn with_ingest_base(mut self, url: Url) -> Self {
        self.ingest_base = url;
        self
    }

    /// Non-fatal problems worth telling the user about
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.ice_servers.is_empty() {
            warnings.push("No ICE servers configured; publishing only works on a reachable network".to_string());
        }
        if self.preview.fps > 60 || self.publish.fps > 60 {
            warnings.push("Frame rates above 60 fps are rarely useful for screen sharing".to_string());
        }
        if self.ingest_base.scheme() == "http"
            && !matches!(self.ingest_base.host_str(), Some("localhost" | "127.0.0.1" | "::1"))
        {
            warnings.push(format!(
                "Ingest URL {} is not encrypted; SDP will be sent in the clear",
                self.ingest_base
            ));
        }

        warnings
    }

    /// Hard errors that make the configuration unusable
    pub fn validate_strict(&self) -> Result<(), String> {
        for (name, layout) in [("preview", &self.preview), ("publish", &self.publish)] {
            if layout.width == 0 || layout.height == 0 {
                return Err(format!("{} resolution cannot be zero", name));
            }
            if layout.fps == 0 {
                return Err(format!("{} frame rate cannot be zero", name));
            }
            if layout.width > 7680 || layout.height > 4320 {
                return Err(format!(
                    "{} resolution {}x{} exceeds maximum supported (7680x4320)",
                    name, layout.width, layout.height
                ));
            }
            if !(0.0..=1.0).contains(&layout.pip_fraction) {
                return Err(format!("{} picture-in-picture fraction must be within 0..1", name));
            }
            if layout.pip_rect().width + layout.margin > layout.width {
                return Err(format!("{} margin leaves no room for the overlay", name));
            }
        }

        if self.ingest_base.cannot_be_a_base() {
            return Err(format!("Ingest URL {} cannot be used as a base", self.ingest_base));
        }
        if self.telemetry.interval.is_zero() {
            return Err("Telemetry interval cannot be zero".to_string());
        }

        Ok(())
    }
}

fn parse_default(url: &str) -> Url {
    // Compile-time constants; parsing cannot fail
    Url::parse(url).unwrap_or_else(|_| unreachable!("invalid default URL {}", url))
}
