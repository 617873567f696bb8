//! Publisher controller
//!
//! Owns the prober, the source manager, the preview and the publish session,
//! and exposes the user-facing operations. There is no global state: every
//! publisher is an independent object, and observers subscribe to its events.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::{CapabilityProber, MediaDevices, ProbeReport, SourceManager, SourceView};
use crate::config::PublisherConfig;
use crate::encode::FfmpegEncoders;
use crate::error::Result;
use crate::events::{EventBus, PublisherEvent};
use crate::identity::SessionId;
use crate::output::{ConnectionFactory, HttpSignaling, Signaling, WebRtcConnectionFactory};
use crate::preview::PreviewCompositor;
use crate::session::{Phase, PublishSession, StartOutcome, StopOutcome};
use crate::types::{Availability, SourceKind};

/// Publish controller
pub struct Publisher {
    config: PublisherConfig,
    events: EventBus,
    prober: CapabilityProber,
    sources: SourceManager,
    preview: PreviewCompositor,
    session: PublishSession,
    permission_watch: Mutex<Option<JoinHandle<()>>>,
}

impl Publisher {
    /// Publisher using WebRTC with FFmpeg encoders and HTTP signaling
    pub fn new(config: PublisherConfig, devices: Arc<dyn MediaDevices>) -> Self {
        let connections = Arc::new(
            WebRtcConnectionFactory::new(config.ice_servers.clone())
                .with_encoders(Arc::new(FfmpegEncoders::new(&config.publish))),
        );
        Self::with_transport(config, devices, connections, Arc::new(HttpSignaling::new()))
    }

    /// Publisher with explicit transport implementations
    pub fn with_transport(
        config: PublisherConfig,
        devices: Arc<dyn MediaDevices>,
        connections: Arc<dyn ConnectionFactory>,
        signaling: Arc<dyn Signaling>,
    ) -> Self {
        let events = EventBus::new();
        let view = SourceView::new();
        let preview = PreviewCompositor::new(config.preview, view.clone(), events.clone());
        let sources = SourceManager::new(devices.clone(), view, preview.clone(), events.clone());
        let session = PublishSession::new(
            devices.clone(),
            connections,
            signaling,
            preview.clone(),
            events.clone(),
            config.ingest_base.clone(),
            config.publish,
        );

        Self {
            prober: CapabilityProber::new(devices),
            config,
            events,
            sources,
            preview,
            session,
            permission_watch: Mutex::new(None),
        }
    }

    /// Register an observer
    pub fn subscribe(&self) -> broadcast::Receiver<PublisherEvent> {
        self.events.subscribe()
    }

    /// Probe capabilities, then acquire sources and show the preview as
    /// configured
    pub async fn load(&self) -> ProbeReport {
        let report = self.prober.probe().await;
        self.sources.apply_probe(&report);

        if let Some(watch) = self.sources.watch_permissions() {
            debug!("Following permission changes");
            if let Some(previous) = self.permission_watch.lock().replace(watch) {
                previous.abort();
            }
        }

        if self.config.probe_on_load {
            self.sources.probe_on_load(self.config.display_on_load).await;
        }
        if self.config.preview_visible {
            self.preview.set_visible(true);
        }
        report
    }

    pub async fn request_camera(&self) -> Availability {
        self.sources.request_camera().await
    }

    pub async fn request_microphone(&self) -> Availability {
        self.sources.request_microphone().await
    }

    pub async fn request_screen(&self) -> Availability {
        self.sources.request_screen().await
    }

    pub fn set_preview_visible(&self, visible: bool) {
        self.preview.set_visible(visible);
    }

    /// Flip preview visibility, returning the new state
    pub fn toggle_preview(&self) -> bool {
        self.preview.toggle()
    }

    /// Start publishing under a user-entered session id
    pub async fn start(&self, raw_id: &str) -> Result<StartOutcome> {
        let id = SessionId::normalize(raw_id).inspect_err(|e| {
            self.events.emit(PublisherEvent::Error(e.to_string()));
        })?;
        self.session.start(id).await
    }

    /// Stop publishing and release every source
    pub async fn stop(&self) -> StopOutcome {
        let outcome = self.session.stop().await;
        if outcome == StopOutcome::Stopped {
            self.sources.release_all();
        }
        outcome
    }

    /// Synchronous shutdown for process exit
    pub fn unload(&self) {
        if self.session.phase() != Phase::Idle {
            warn!("Unloading while {}", self.session.phase());
        }
        if let Some(watch) = self.permission_watch.lock().take() {
            watch.abort();
        }
        self.session.unload();
        self.sources.release_all();
        self.preview.set_visible(false);
        info!("Publisher unloaded");
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn availability(&self, kind: SourceKind) -> Availability {
        self.sources.availability(kind)
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceManager {
        &self.sources
    }

    pub fn preview(&self) -> &PreviewCompositor {
        &self.preview
    }

    pub fn session(&self) -> &PublishSession {
        &self.session
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("phase", &self.session.phase())
            .field("preview", &self.preview)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticDevices;
    use crate::types::PermissionState;

    #[tokio::test]
    async fn test_load_reports_and_acquires() {
        let publisher = Publisher::new(PublisherConfig::default(), Arc::new(SyntheticDevices::new()));
        let report = publisher.load().await;
        assert_eq!(report.screen, Availability::Denied);
        assert_eq!(publisher.availability(SourceKind::Camera), Availability::Working);
        assert_eq!(publisher.availability(SourceKind::Screen), Availability::Working);
        assert_eq!(publisher.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_blank_id() {
        let publisher = Publisher::new(PublisherConfig::default(), Arc::new(SyntheticDevices::new()));
        let mut events = publisher.subscribe();
        assert!(publisher.start(" // ").await.is_err());
        assert!(matches!(events.try_recv(), Ok(PublisherEvent::Error(_))));
        assert_eq!(publisher.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_permission_revoked_after_load() {
        let devices = SyntheticDevices::new();
        let config = PublisherConfig {
            probe_on_load: false,
            ..Default::default()
        };
        let publisher = Publisher::new(config, Arc::new(devices.clone()));
        let mut events = publisher.subscribe();

        publisher.load().await;
        assert_eq!(publisher.availability(SourceKind::Microphone), Availability::Working);
        while events.try_recv().is_ok() {}

        assert!(devices.change_permission(SourceKind::Microphone, PermissionState::Denied));
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            PublisherEvent::Availability {
                kind: SourceKind::Microphone,
                availability: Availability::Denied
            }
        ));
        assert_eq!(publisher.availability(SourceKind::Microphone), Availability::Denied);
        assert_eq!(publisher.availability(SourceKind::Camera), Availability::Working);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let publisher = Publisher::new(PublisherConfig::default(), Arc::new(SyntheticDevices::new()));
        assert_eq!(publisher.stop().await, StopOutcome::NotPublishing(Phase::Idle));
    }
}
