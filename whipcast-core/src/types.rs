//! Core types for whipcast
//!
//! These types describe capture sources, their availability, acquisition
//! constraints and the frames that flow between tracks and the compositor.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for unique track IDs
static TRACK_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    /// Create a new unique track id
    pub fn new() -> Self {
        Self(TRACK_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Track({})", self.0)
    }
}

/// Kind of capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Screen / display capture
    Screen,
    /// Camera video
    Camera,
    /// Microphone audio
    Microphone,
}

impl SourceKind {
    /// All source kinds, in display order
    pub const ALL: [SourceKind; 3] = [SourceKind::Microphone, SourceKind::Camera, SourceKind::Screen];

    /// Media kind of the tracks this source produces
    pub fn track_kind(&self) -> TrackKind {
        match self {
            Self::Screen | Self::Camera => TrackKind::Video,
            Self::Microphone => TrackKind::Audio,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Screen => write!(f, "screen"),
            SourceKind::Camera => write!(f, "camera"),
            SourceKind::Microphone => write!(f, "microphone"),
        }
    }
}

/// Availability of a capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Availability {
    /// Not probed yet, or the platform cannot tell
    #[default]
    Unknown,
    /// No matching device or capability
    Unavailable,
    /// User declined, or not yet allowed
    Denied,
    /// A live track is held
    Working,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Unavailable => write!(f, "not available"),
            Self::Denied => write!(f, "not allowed"),
            Self::Working => write!(f, "working"),
        }
    }
}

/// Result of a permission query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

impl From<PermissionState> for Availability {
    fn from(state: PermissionState) -> Self {
        match state {
            PermissionState::Granted => Availability::Working,
            PermissionState::Denied => Availability::Denied,
            PermissionState::Prompt => Availability::Unknown,
        }
    }
}

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Kind of an enumerated input device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// Information about an enumerated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Backend-specific identifier
    pub id: String,
    /// Human-readable label (may be empty before permission is granted)
    pub label: String,
    /// What kind of device this is
    pub kind: DeviceKind,
}

impl DeviceInfo {
    /// Create a new device info
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }
}

/// Video acquisition constraints (all values are ideals, not requirements)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoConstraints {
    pub ideal_width: Option<u32>,
    pub ideal_height: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl VideoConstraints {
    /// Constraints with an ideal resolution
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            ideal_width: Some(width),
            ideal_height: Some(height),
            frame_rate: None,
        }
    }

    /// Set the ideal frame rate
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }
}

/// Constraints for a combined camera/microphone acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaConstraints {
    /// Video constraints, or `None` for no video
    pub video: Option<VideoConstraints>,
    /// Whether to acquire audio
    pub audio: bool,
}

impl MediaConstraints {
    /// Camera only, with the given constraints
    pub fn camera(video: VideoConstraints) -> Self {
        Self {
            video: Some(video),
            audio: false,
        }
    }

    /// Microphone only
    pub fn microphone() -> Self {
        Self {
            video: None,
            audio: true,
        }
    }

    /// Camera and microphone
    pub fn camera_and_microphone(video: VideoConstraints) -> Self {
        Self {
            video: Some(video),
            audio: true,
        }
    }
}

/// BGRA video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Tightly packed BGRA data (width * height * 4 bytes)
    pub data: Vec<u8>,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
}

impl VideoFrame {
    /// Create a frame filled with a single BGRA color
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            data,
            pts: 0,
        }
    }

    /// BGRA value of the pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        self.data
            .get(idx..idx + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }
}

/// Interleaved 16-bit PCM audio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Interleaved samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
}

/// A sample emitted by a media track
#[derive(Debug, Clone)]
pub enum MediaSample {
    Video(Arc<VideoFrame>),
    Audio(Arc<AudioFrame>),
}

/// Nanoseconds since the Unix epoch, used for frame timestamps
pub fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
