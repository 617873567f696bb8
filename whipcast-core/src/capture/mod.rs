//! Capture backends, capability probing and source management
//!
//! This module handles:
//! - The `MediaDevices` / `MediaTrack` seam every capture backend implements
//! - Permission and device probing
//! - Per-kind source acquisition and release
//! - A synthetic test-pattern backend

pub mod probe;
pub mod sources;
pub mod synthetic;

pub use probe::{CapabilityProber, ProbeReport};
pub use sources::{SourceManager, SourceView};
pub use synthetic::{SyntheticDevices, SyntheticTrack};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::WhipcastError;
use crate::types::{
    Availability, DeviceInfo, MediaConstraints, MediaSample, PermissionState, SourceKind,
    TrackId, TrackKind, VideoConstraints, VideoFrame,
};

/// Why a capture acquisition failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// User declined the prompt
    #[error("permission denied")]
    PermissionDenied,
    /// No device matches the request
    #[error("no matching device")]
    NotFound,
    /// The backend lacks this capability
    #[error("not supported by this backend")]
    Unsupported,
    /// Anything else
    #[error("{0}")]
    Failed(String),
}

impl AcquireError {
    /// Availability a source ends up in after this failure
    pub fn availability(&self) -> Availability {
        match self {
            Self::PermissionDenied => Availability::Denied,
            _ => Availability::Unavailable,
        }
    }

    /// Convert into a crate error for the given source
    pub fn into_error(self, kind: SourceKind) -> WhipcastError {
        match self {
            Self::PermissionDenied => WhipcastError::PermissionDenied(kind),
            other => WhipcastError::DeviceUnavailable(kind, other.to_string()),
        }
    }
}

/// A live media track produced by a capture backend or the compositor
pub trait MediaTrack: Send + Sync + std::fmt::Debug {
    /// Unique id of this track
    fn id(&self) -> TrackId;

    /// Video or audio
    fn kind(&self) -> TrackKind;

    /// Human-readable label
    fn label(&self) -> &str;

    /// Whether the track still produces media
    fn is_live(&self) -> bool;

    /// End the track. Idempotent; returns `true` only for the call that
    /// actually ended it.
    fn stop(&self) -> bool;

    /// Most recent video frame, `None` until the first frame arrives
    fn latest_frame(&self) -> Option<Arc<VideoFrame>>;

    /// Subscribe to samples produced after this call
    fn subscribe(&self) -> broadcast::Receiver<MediaSample>;
}

/// Capture capabilities of the platform
///
/// Backends implement this for real devices; the core never touches a
/// platform API directly.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Whether permission state can be queried without prompting
    fn supports_permission_query(&self) -> bool;

    /// Query the permission state for a camera or microphone
    async fn query_permission(&self, kind: SourceKind) -> Result<PermissionState, AcquireError>;

    /// Enumerate devices without acquiring them
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, AcquireError>;

    /// Whether the platform offers display capture at all
    fn supports_display_capture(&self) -> bool;

    /// Acquire camera and/or microphone tracks
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, AcquireError>;

    /// Acquire a display capture track (may show a picker)
    async fn get_display_media(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Arc<dyn MediaTrack>, AcquireError>;

    /// Permission changes made outside the app, e.g. in system settings.
    /// `None` when the platform cannot report them.
    fn permission_changes(&self) -> Option<broadcast::Receiver<PermissionChange>> {
        None
    }
}

/// A permission state reported by the platform after it changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionChange {
    pub kind: SourceKind,
    pub state: PermissionState,
}

/// Split acquired tracks into the first video and first audio track.
///
/// Any additional tracks are stopped, since nobody would own them.
pub fn split_tracks(
    tracks: Vec<Arc<dyn MediaTrack>>,
) -> (Option<Arc<dyn MediaTrack>>, Option<Arc<dyn MediaTrack>>) {
    let mut video = None;
    let mut audio = None;
    for track in tracks {
        let slot = match track.kind() {
            TrackKind::Video => &mut video,
            TrackKind::Audio => &mut audio,
        };
        if slot.is_none() {
            *slot = Some(track);
        } else {
            debug!("Stopping surplus {} track {}", track.kind(), track.id());
            track.stop();
        }
    }
    (video, audio)
}

/// Shared bookkeeping for track implementations
#[derive(Debug)]
pub struct TrackState {
    id: TrackId,
    kind: TrackKind,
    label: String,
    live: AtomicBool,
    latest: Mutex<Option<Arc<VideoFrame>>>,
    tx: broadcast::Sender<MediaSample>,
}

impl TrackState {
    /// Create state for a new live track
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(4); // Small buffer for low latency
        Self {
            id: TrackId::new(),
            kind,
            label: label.into(),
            live: AtomicBool::new(true),
            latest: Mutex::new(None),
            tx,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Mark ended; `true` if this call ended it
    pub fn end(&self) -> bool {
        let ended = self.live.swap(false, Ordering::SeqCst);
        if ended {
            debug!("{} ({}) ended", self.id, self.label);
        }
        ended
    }

    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.latest.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaSample> {
        self.tx.subscribe()
    }

    /// Publish a sample to subscribers. Ignored once the track has ended.
    pub fn push(&self, sample: MediaSample) {
        if !self.is_live() {
            return;
        }
        if let MediaSample::Video(frame) = &sample {
            *self.latest.lock() = Some(frame.clone());
        }
        let _ = self.tx.send(sample);
    }
}
