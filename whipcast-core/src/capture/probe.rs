//! Capability probing
//!
//! Reports what the platform can offer without acquiring anything. Nothing
//! here is fatal: every failure becomes an availability value.

use std::sync::Arc;
use tracing::{debug, info};

use super::MediaDevices;
use crate::types::{Availability, DeviceKind, SourceKind};

/// Availability of every source kind after a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeReport {
    pub camera: Availability,
    pub microphone: Availability,
    pub screen: Availability,
}

impl ProbeReport {
    /// Availability for one kind
    pub fn get(&self, kind: SourceKind) -> Availability {
        match kind {
            SourceKind::Camera => self.camera,
            SourceKind::Microphone => self.microphone,
            SourceKind::Screen => self.screen,
        }
    }

    /// Iterate over (kind, availability) pairs
    pub fn iter(&self) -> impl Iterator<Item = (SourceKind, Availability)> + '_ {
        SourceKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }
}

/// Queries permissions and enumerates devices
pub struct CapabilityProber {
    devices: Arc<dyn MediaDevices>,
}

impl CapabilityProber {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    /// Probe camera, microphone and screen availability
    pub async fn probe(&self) -> ProbeReport {
        let mut report = ProbeReport::default();

        if self.devices.supports_permission_query() {
            report.camera = self.permission(SourceKind::Camera).await;
            report.microphone = self.permission(SourceKind::Microphone).await;
        }

        // A screen-share grant cannot be queried, only requested
        report.screen = if self.devices.supports_display_capture() {
            Availability::Denied
        } else {
            Availability::Unavailable
        };

        match self.devices.enumerate_devices().await {
            Ok(devices) => {
                if !devices.iter().any(|d| d.kind == DeviceKind::VideoInput) {
                    report.camera = Availability::Unavailable;
                }
                if !devices.iter().any(|d| d.kind == DeviceKind::AudioInput) {
                    report.microphone = Availability::Unavailable;
                }
            }
            Err(e) => debug!("Device enumeration failed (ignored): {}", e),
        }

        info!(
            "Probe: camera={}, microphone={}, screen={}",
            report.camera, report.microphone, report.screen
        );
        report
    }

    async fn permission(&self, kind: SourceKind) -> Availability {
        match self.devices.query_permission(kind).await {
            Ok(state) => state.into(),
            Err(e) => {
                debug!("Permission query for {} failed: {}", kind, e);
                Availability::Unknown
            }
        }
    }
}
