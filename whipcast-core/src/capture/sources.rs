//! Per-kind capture source management
//!
//! Each source kind holds at most one live track. Requests replace the
//! previous track, failures only change availability.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AcquireError, MediaDevices, MediaTrack, split_tracks};
use crate::compositor::Layers;
use crate::events::{EventBus, PublisherEvent};
use crate::preview::PreviewCompositor;
use crate::types::{Availability, MediaConstraints, SourceKind, VideoConstraints};

/// Camera constraints used for source requests
pub fn camera_constraints() -> VideoConstraints {
    VideoConstraints::with_size(640, 360)
}

/// Screen constraints used for source requests
pub fn screen_constraints() -> VideoConstraints {
    VideoConstraints::default().with_frame_rate(30)
}

#[derive(Debug, Default)]
struct Slot {
    track: Option<Arc<dyn MediaTrack>>,
    availability: Availability,
}

/// Read-only view of the current sources
///
/// Shared between the source manager and the preview compositor.
#[derive(Debug, Clone, Default)]
pub struct SourceView {
    slots: Arc<RwLock<HashMap<SourceKind, Slot>>>,
}

impl SourceView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current track for a kind, if one is held
    pub fn track(&self, kind: SourceKind) -> Option<Arc<dyn MediaTrack>> {
        self.slots.read().get(&kind).and_then(|s| s.track.clone())
    }

    /// Current availability for a kind
    pub fn availability(&self, kind: SourceKind) -> Availability {
        self.slots
            .read()
            .get(&kind)
            .map(|s| s.availability)
            .unwrap_or_default()
    }

    /// Screen as background, camera as overlay
    pub fn layers(&self) -> Layers {
        let slots = self.slots.read();
        let screen = slots.get(&SourceKind::Screen).and_then(|s| s.track.as_ref());
        let camera = slots.get(&SourceKind::Camera).and_then(|s| s.track.as_ref());
        Layers::from_tracks(screen, camera)
    }

    /// Store a track, returning the one it replaced
    fn replace(&self, kind: SourceKind, track: Option<Arc<dyn MediaTrack>>) -> Option<Arc<dyn MediaTrack>> {
        let mut slots = self.slots.write();
        let slot = slots.entry(kind).or_default();
        std::mem::replace(&mut slot.track, track)
    }

    /// Set availability, returning whether it changed
    fn set_availability(&self, kind: SourceKind, availability: Availability) -> bool {
        let mut slots = self.slots.write();
        let slot = slots.entry(kind).or_default();
        let changed = slot.availability != availability;
        slot.availability = availability;
        changed
    }
}

/// Acquires and releases capture sources independently of any publish session
pub struct SourceManager {
    devices: Arc<dyn MediaDevices>,
    view: SourceView,
    preview: PreviewCompositor,
    events: EventBus,
}

impl SourceManager {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        view: SourceView,
        preview: PreviewCompositor,
        events: EventBus,
    ) -> Self {
        Self {
            devices,
            view,
            preview,
            events,
        }
    }

    /// Shared view of the held sources
    pub fn view(&self) -> &SourceView {
        &self.view
    }

    /// Current availability for a kind
    pub fn availability(&self, kind: SourceKind) -> Availability {
        self.view.availability(kind)
    }

    /// Record an availability and notify observers
    pub fn set_availability(&self, kind: SourceKind, availability: Availability) {
        self.view.set_availability(kind, availability);
        self.events.emit(PublisherEvent::Availability { kind, availability });
    }

    /// Follow permission changes reported by the platform.
    ///
    /// Each change becomes an availability update. Returns `None` when the
    /// devices cannot report changes.
    pub fn watch_permissions(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.devices.permission_changes()?;
        let view = self.view.clone();
        let events = self.events.clone();
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        let availability = Availability::from(change.state);
                        info!("{} permission changed to {:?}", change.kind, change.state);
                        view.set_availability(change.kind, availability);
                        events.emit(PublisherEvent::Availability {
                            kind: change.kind,
                            availability,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Missed {} permission changes", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Apply a full probe report
    pub fn apply_probe(&self, report: &super::ProbeReport) {
        for (kind, availability) in report.iter() {
            self.set_availability(kind, availability);
        }
    }

    /// Request a camera track (640x360, no audio)
    pub async fn request_camera(&self) -> Availability {
        self.stop_kind(SourceKind::Camera);
        let result = self
            .devices
            .get_user_media(MediaConstraints::camera(camera_constraints()))
            .await
            .map(split_tracks);
        let availability = match result {
            Ok((Some(video), audio)) => {
                if let Some(extra) = audio {
                    extra.stop();
                }
                self.store(SourceKind::Camera, video)
            }
            Ok((None, audio)) => {
                if let Some(extra) = audio {
                    extra.stop();
                }
                self.fail(SourceKind::Camera, AcquireError::NotFound)
            }
            Err(e) => self.fail(SourceKind::Camera, e),
        };
        self.preview.refresh();
        availability
    }

    /// Request a microphone track
    pub async fn request_microphone(&self) -> Availability {
        self.stop_kind(SourceKind::Microphone);
        let result = self
            .devices
            .get_user_media(MediaConstraints::microphone())
            .await
            .map(split_tracks);
        let availability = match result {
            Ok((video, Some(audio))) => {
                if let Some(extra) = video {
                    extra.stop();
                }
                self.store(SourceKind::Microphone, audio)
            }
            Ok((video, None)) => {
                if let Some(extra) = video {
                    extra.stop();
                }
                self.fail(SourceKind::Microphone, AcquireError::NotFound)
            }
            Err(e) => self.fail(SourceKind::Microphone, e),
        };
        self.preview.refresh();
        availability
    }

    /// Request a screen capture track at 30 fps
    pub async fn request_screen(&self) -> Availability {
        self.stop_kind(SourceKind::Screen);
        let availability = if !self.devices.supports_display_capture() {
            self.fail(SourceKind::Screen, AcquireError::Unsupported)
        } else {
            match self.devices.get_display_media(screen_constraints()).await {
                Ok(track) => self.store(SourceKind::Screen, track),
                Err(e) => self.fail(SourceKind::Screen, e),
            }
        };
        self.preview.refresh();
        availability
    }

    /// Acquire camera and microphone together, plus the screen if asked.
    ///
    /// A permission failure of the combined request marks both camera and
    /// microphone denied.
    pub async fn probe_on_load(&self, include_display: bool) {
        self.stop_kind(SourceKind::Camera);
        self.stop_kind(SourceKind::Microphone);

        match self
            .devices
            .get_user_media(MediaConstraints::camera_and_microphone(camera_constraints()))
            .await
        {
            Ok(tracks) => {
                let (video, audio) = split_tracks(tracks);
                match video {
                    Some(track) => self.store(SourceKind::Camera, track),
                    None => self.fail(SourceKind::Camera, AcquireError::NotFound),
                };
                match audio {
                    Some(track) => self.store(SourceKind::Microphone, track),
                    None => self.fail(SourceKind::Microphone, AcquireError::NotFound),
                };
            }
            Err(e) => {
                self.fail(SourceKind::Camera, e.clone());
                self.fail(SourceKind::Microphone, e);
            }
        }

        if include_display && self.devices.supports_display_capture() {
            self.stop_kind(SourceKind::Screen);
            match self.devices.get_display_media(screen_constraints()).await {
                Ok(track) => {
                    self.store(SourceKind::Screen, track);
                }
                Err(e) => {
                    self.fail(SourceKind::Screen, e);
                }
            }
        }

        self.preview.refresh();
    }

    /// Stop and forget every held track. Safe to call repeatedly.
    pub fn release_all(&self) {
        let mut released = 0;
        for kind in SourceKind::ALL {
            if self.stop_kind(kind) {
                released += 1;
            }
        }
        if released > 0 {
            info!("Released {} capture source(s)", released);
        }
        self.preview.refresh();
    }

    fn stop_kind(&self, kind: SourceKind) -> bool {
        match self.view.replace(kind, None) {
            Some(track) => {
                debug!("Stopping {} track {}", kind, track.id());
                track.stop();
                true
            }
            None => false,
        }
    }

    fn store(&self, kind: SourceKind, track: Arc<dyn MediaTrack>) -> Availability {
        info!("Acquired {} ({})", kind, track.label());
        if let Some(previous) = self.view.replace(kind, Some(track)) {
            previous.stop();
        }
        self.set_availability(kind, Availability::Working);
        Availability::Working
    }

    fn fail(&self, kind: SourceKind, error: AcquireError) -> Availability {
        let availability = error.availability();
        warn!("Could not acquire {}: {}", kind, error);
        self.set_availability(kind, availability);
        availability
    }
}

impl std::fmt::Debug for SourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceManager")
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}
