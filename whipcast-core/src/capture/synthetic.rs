//! Synthetic capture backend
//!
//! Produces test-pattern video and a sine tone instead of real device media,
//! so the publish path can be exercised end to end on machines without
//! capture hardware or portal access.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{AcquireError, MediaDevices, MediaTrack, PermissionChange, TrackState};
use crate::types::{
    AudioFrame, DeviceInfo, DeviceKind, MediaConstraints, MediaSample, PermissionState,
    SourceKind, TrackId, TrackKind, VideoConstraints, VideoFrame, now_nanos,
};

const DEFAULT_FPS: u32 = 30;
const AUDIO_SAMPLE_RATE: u32 = 48000;
const AUDIO_CHANNELS: u16 = 2;
const AUDIO_FRAME_MS: u64 = 20;
const TONE_HZ: f32 = 440.0;

/// Synthetic devices with configurable presence and permission outcomes
#[derive(Debug, Clone)]
pub struct SyntheticDevices {
    /// Whether a camera is enumerated
    pub camera: bool,
    /// Whether a microphone is enumerated
    pub microphone: bool,
    /// Whether display capture is offered
    pub display: bool,
    /// Whether permission state can be queried
    pub permission_query: bool,
    /// Outcome of camera/microphone prompts
    pub user_media_permission: PermissionState,
    /// Outcome of the display picker
    pub display_permission: PermissionState,
    /// Permission changes announced through `change_permission`
    pub permission_events: broadcast::Sender<PermissionChange>,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self {
            camera: true,
            microphone: true,
            display: true,
            permission_query: true,
            user_media_permission: PermissionState::Granted,
            display_permission: PermissionState::Granted,
            permission_events: broadcast::channel(8).0,
        }
    }
}

impl SyntheticDevices {
    /// All devices present and granted
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a permission change, as a platform would after the user
    /// edits it in system settings. Returns whether anyone was listening.
    pub fn change_permission(&self, kind: SourceKind, state: PermissionState) -> bool {
        debug!("Synthetic {} permission -> {:?}", kind, state);
        self.permission_events
            .send(PermissionChange { kind, state })
            .is_ok()
    }

    fn check(&self, permission: PermissionState) -> Result<(), AcquireError> {
        match permission {
            PermissionState::Denied => Err(AcquireError::PermissionDenied),
            PermissionState::Granted | PermissionState::Prompt => Ok(()),
        }
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    fn supports_permission_query(&self) -> bool {
        self.permission_query
    }

    async fn query_permission(&self, kind: SourceKind) -> Result<PermissionState, AcquireError> {
        if !self.permission_query {
            return Err(AcquireError::Unsupported);
        }
        match kind {
            SourceKind::Camera | SourceKind::Microphone => Ok(self.user_media_permission),
            SourceKind::Screen => Err(AcquireError::Unsupported),
        }
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, AcquireError> {
        let mut devices = Vec::new();
        if self.camera {
            devices.push(DeviceInfo::new("synthetic:camera", "Test Pattern Camera", DeviceKind::VideoInput));
        }
        if self.microphone {
            devices.push(DeviceInfo::new("synthetic:mic", "Sine Tone Microphone", DeviceKind::AudioInput));
        }
        Ok(devices)
    }

    fn supports_display_capture(&self) -> bool {
        self.display
    }

    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, AcquireError> {
        if constraints.video.is_none() && !constraints.audio {
            return Err(AcquireError::Failed("no media requested".into()));
        }
        if (constraints.video.is_some() && !self.camera) || (constraints.audio && !self.microphone) {
            return Err(AcquireError::NotFound);
        }
        self.check(self.user_media_permission)?;

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if let Some(video) = constraints.video {
            let width = video.ideal_width.unwrap_or(640);
            let height = video.ideal_height.unwrap_or(360);
            let fps = video.frame_rate.unwrap_or(DEFAULT_FPS);
            tracks.push(SyntheticTrack::video("Test Pattern Camera", Pattern::Bars, width, height, fps));
        }
        if constraints.audio {
            tracks.push(SyntheticTrack::tone("Sine Tone Microphone"));
        }
        Ok(tracks)
    }

    async fn get_display_media(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Arc<dyn MediaTrack>, AcquireError> {
        if !self.display {
            return Err(AcquireError::Unsupported);
        }
        self.check(self.display_permission)?;

        let width = constraints.ideal_width.unwrap_or(1280);
        let height = constraints.ideal_height.unwrap_or(720);
        let fps = constraints.frame_rate.unwrap_or(DEFAULT_FPS);
        info!("Synthetic display capture {}x{} @ {}fps", width, height, fps);
        Ok(SyntheticTrack::video("Test Pattern Screen", Pattern::Gradient, width, height, fps))
    }

    fn permission_changes(&self) -> Option<broadcast::Receiver<PermissionChange>> {
        Some(self.permission_events.subscribe())
    }
}

/// Video test patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Vertical color bars scrolling sideways
    Bars,
    /// Diagonal gradient with a moving bar
    Gradient,
}

/// Render one frame of a pattern at the given frame index
pub fn render_pattern(pattern: Pattern, width: u32, height: u32, index: u64) -> VideoFrame {
    const BARS: [[u8; 4]; 7] = [
        [255, 255, 255, 255],
        [0, 255, 255, 255],
        [255, 255, 0, 255],
        [0, 255, 0, 255],
        [255, 0, 255, 255],
        [0, 0, 255, 255],
        [255, 0, 0, 255],
    ];

    let mut data = Vec::with_capacity((width * height * 4) as usize);
    let shift = (index * 4) as u32;
    for y in 0..height {
        for x in 0..width {
            let px = match pattern {
                Pattern::Bars => {
                    let bar = ((x + shift) % width.max(1)) * BARS.len() as u32 / width.max(1);
                    BARS[bar as usize]
                }
                Pattern::Gradient => {
                    if (x + width - shift % width.max(1)) % width.max(1) < 8 {
                        [255, 255, 255, 255]
                    } else {
                        let r = (x * 255 / width.max(1)) as u8;
                        let g = (y * 255 / height.max(1)) as u8;
                        let b = ((x + y) * 255 / (width + height).max(1)) as u8;
                        [b, g, r, 255]
                    }
                }
            };
            data.extend_from_slice(&px);
        }
    }

    VideoFrame {
        width,
        height,
        data,
        pts: now_nanos(),
    }
}

/// A track fed by a background generator task
#[derive(Debug)]
pub struct SyntheticTrack {
    state: Arc<TrackState>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticTrack {
    /// Start a video pattern track
    pub fn video(
        label: &str,
        pattern: Pattern,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Arc<dyn MediaTrack> {
        let state = Arc::new(TrackState::new(TrackKind::Video, label));
        let task_state = state.clone();
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut index = 0u64;
            while task_state.is_live() {
                ticker.tick().await;
                let frame = render_pattern(pattern, width, height, index);
                task_state.push(MediaSample::Video(Arc::new(frame)));
                index += 1;
            }
        });

        debug!("Synthetic video track {} started", state.id());
        Arc::new(Self {
            state,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }

    /// Start a sine tone audio track
    pub fn tone(label: &str) -> Arc<dyn MediaTrack> {
        let state = Arc::new(TrackState::new(TrackKind::Audio, label));
        let task_state = state.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(AUDIO_FRAME_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let per_frame = (AUDIO_SAMPLE_RATE as u64 * AUDIO_FRAME_MS / 1000) as usize;
            let mut phase = 0f32;
            let step = TONE_HZ * std::f32::consts::TAU / AUDIO_SAMPLE_RATE as f32;
            while task_state.is_live() {
                ticker.tick().await;
                let mut samples = Vec::with_capacity(per_frame * AUDIO_CHANNELS as usize);
                for _ in 0..per_frame {
                    let v = (phase.sin() * i16::MAX as f32 * 0.1) as i16;
                    for _ in 0..AUDIO_CHANNELS {
                        samples.push(v);
                    }
                    phase = (phase + step) % std::f32::consts::TAU;
                }
                task_state.push(MediaSample::Audio(Arc::new(AudioFrame {
                    samples,
                    sample_rate: AUDIO_SAMPLE_RATE,
                    channels: AUDIO_CHANNELS,
                    pts: now_nanos(),
                })));
            }
        });

        Arc::new(Self {
            state,
            task: parking_lot::Mutex::new(Some(task)),
        })
    }
}

impl MediaTrack for SyntheticTrack {
    fn id(&self) -> TrackId {
        self.state.id()
    }

    fn kind(&self) -> TrackKind {
        self.state.kind()
    }

    fn label(&self) -> &str {
        self.state.label()
    }

    fn is_live(&self) -> bool {
        self.state.is_live()
    }

    fn stop(&self) -> bool {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.state.end()
    }

    fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.state.latest_frame()
    }

    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MediaSample> {
        self.state.subscribe()
    }
}

impl Drop for SyntheticTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_dimensions() {
        let frame = render_pattern(Pattern::Bars, 64, 36, 0);
        assert_eq!(frame.data.len(), 64 * 36 * 4);
        let frame = render_pattern(Pattern::Gradient, 32, 18, 5);
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 18);
    }

    #[tokio::test]
    async fn test_missing_camera_not_found() {
        let devices = SyntheticDevices {
            camera: false,
            ..Default::default()
        };
        let result = devices
            .get_user_media(MediaConstraints::camera(VideoConstraints::with_size(640, 360)))
            .await;
        assert_eq!(result.unwrap_err(), AcquireError::NotFound);
    }

    #[tokio::test]
    async fn test_permission_changes_reach_subscribers() {
        let devices = SyntheticDevices::new();
        assert!(!devices.change_permission(SourceKind::Camera, PermissionState::Denied));

        let mut rx = devices.permission_changes().unwrap();
        assert!(devices.change_permission(SourceKind::Microphone, PermissionState::Denied));
        assert_eq!(
            rx.try_recv().unwrap(),
            PermissionChange {
                kind: SourceKind::Microphone,
                state: PermissionState::Denied
            }
        );
    }

    #[tokio::test]
    async fn test_denied_display() {
        let devices = SyntheticDevices {
            display_permission: PermissionState::Denied,
            ..Default::default()
        };
        let result = devices.get_display_media(VideoConstraints::default()).await;
        assert_eq!(result.unwrap_err(), AcquireError::PermissionDenied);
    }

    #[tokio::test]
    async fn test_video_track_produces_frames() {
        let devices = SyntheticDevices::new();
        let tracks = devices
            .get_user_media(MediaConstraints::camera(VideoConstraints::with_size(16, 9).with_frame_rate(60)))
            .await
            .unwrap();
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];
        let mut rx = track.subscribe();
        let sample = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(matches!(sample, Ok(Ok(MediaSample::Video(_)))));
        assert!(track.latest_frame().is_some());

        assert!(track.stop());
        assert!(!track.stop());
        assert!(!track.is_live());
    }
}
