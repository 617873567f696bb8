//! Mock infrastructure for testing
//!
//! Devices, tracks, connections and signaling that record what happens to
//! them in a shared, ordered log.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, broadcast};
use url::Url;
use whipcast_core::capture::{AcquireError, MediaDevices, MediaTrack, TrackState};
use whipcast_core::error::{Result, WhipcastError};
use whipcast_core::events::EventBus;
use whipcast_core::output::{ConnectionFactory, PeerConnection, Signaling, SignalingAnswer};
use whipcast_core::types::{
    DeviceInfo, DeviceKind, MediaConstraints, MediaSample, PermissionState, SourceKind, TrackId,
    TrackKind, VideoConstraints, VideoFrame,
};

/// Offer with VP8 (96) listed before H264 (97)
pub const OFFER_SDP: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 H264/90000\r\n\
a=rtpmap:98 VP9/90000\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=rtpmap:111 opus/48000/2\r\n";

/// Answer accepted by `MockConnection`
pub const ANSWER_SDP: &str = "v=0\r\n\
o=- 3 4 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 97\r\n\
a=rtpmap:97 H264/90000\r\n";

pub const RED: [u8; 4] = [0, 0, 255, 255];
pub const GREEN: [u8; 4] = [0, 255, 0, 255];

/// Ordered record of interesting calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Index of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Track that counts how often it is stopped
#[derive(Debug)]
pub struct MockTrack {
    state: TrackState,
    stop_calls: AtomicUsize,
    log: CallLog,
}

impl MockTrack {
    pub fn new(kind: TrackKind, label: &str, log: CallLog) -> Arc<Self> {
        let track = Arc::new(Self {
            state: TrackState::new(kind, label),
            stop_calls: AtomicUsize::new(0),
            log,
        });
        if kind == TrackKind::Video {
            let color = if label == "screen" { RED } else { GREEN };
            track
                .state
                .push(MediaSample::Video(Arc::new(VideoFrame::solid(64, 36, color))));
        }
        track
    }

    /// Number of `stop` calls
    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
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
        let ended = self.state.end();
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("stop:{}", self.state.label()));
        ended
    }

    fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.state.latest_frame()
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaSample> {
        self.state.subscribe()
    }
}

/// Capture devices with injectable failures
#[derive(Debug, Default)]
pub struct MockDevices {
    pub log: CallLog,
    pub camera_error: Option<AcquireError>,
    pub screen_error: Option<AcquireError>,
    pub no_display: bool,
    pub no_video_input: bool,
    pub permission: Option<PermissionState>,
    pub user_media_calls: AtomicUsize,
    pub display_calls: AtomicUsize,
    pub tracks: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockDevices {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    /// Every track handed out so far
    pub fn issued(&self) -> Vec<Arc<MockTrack>> {
        self.tracks.lock().clone()
    }

    fn issue(&self, kind: TrackKind, label: &str) -> Arc<dyn MediaTrack> {
        let track = MockTrack::new(kind, label, self.log.clone());
        self.tracks.lock().push(track.clone());
        track
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    fn supports_permission_query(&self) -> bool {
        self.permission.is_some()
    }

    async fn query_permission(
        &self,
        _kind: SourceKind,
    ) -> std::result::Result<PermissionState, AcquireError> {
        self.permission.ok_or(AcquireError::Unsupported)
    }

    async fn enumerate_devices(&self) -> std::result::Result<Vec<DeviceInfo>, AcquireError> {
        let mut devices = vec![DeviceInfo::new("mic0", "Mock Mic", DeviceKind::AudioInput)];
        if !self.no_video_input {
            devices.push(DeviceInfo::new("cam0", "Mock Cam", DeviceKind::VideoInput));
        }
        Ok(devices)
    }

    fn supports_display_capture(&self) -> bool {
        !self.no_display
    }

    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> std::result::Result<Vec<Arc<dyn MediaTrack>>, AcquireError> {
        self.user_media_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.camera_error {
            return Err(e.clone());
        }
        if constraints.video.is_some() && self.no_video_input {
            return Err(AcquireError::NotFound);
        }
        let mut tracks = Vec::new();
        if constraints.video.is_some() {
            tracks.push(self.issue(TrackKind::Video, "camera"));
        }
        if constraints.audio {
            tracks.push(self.issue(TrackKind::Audio, "microphone"));
        }
        Ok(tracks)
    }

    async fn get_display_media(
        &self,
        _constraints: VideoConstraints,
    ) -> std::result::Result<Arc<dyn MediaTrack>, AcquireError> {
        self.display_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.screen_error {
            return Err(e.clone());
        }
        Ok(self.issue(TrackKind::Video, "screen"))
    }
}

/// Peer connection that logs teardown calls
pub struct MockConnection {
    log: CallLog,
    fail_remote: bool,
    local: Mutex<Option<String>>,
    senders: Mutex<Vec<Arc<dyn MediaTrack>>>,
    pub remote: Mutex<Option<String>>,
}

impl MockConnection {
    pub fn sender_labels(&self) -> Vec<String> {
        self.senders.lock().iter().map(|t| t.label().to_string()).collect()
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()> {
        self.log.push(format!("add_track:{}", track.label()));
        self.senders.lock().push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        Ok(OFFER_SDP.to_string())
    }

    async fn set_local_description(&self, sdp: &str) -> Result<()> {
        // Like a real connection, only the offer it generated is accepted
        if sdp != OFFER_SDP {
            return Err(WhipcastError::webrtc("local offer was modified"));
        }
        *self.local.lock() = Some(sdp.to_string());
        Ok(())
    }

    async fn local_description(&self) -> Result<String> {
        self.local
            .lock()
            .clone()
            .ok_or_else(|| WhipcastError::webrtc("no local description"))
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<()> {
        if self.fail_remote || !sdp.starts_with("v=0") {
            return Err(WhipcastError::negotiation("malformed answer"));
        }
        *self.remote.lock() = Some(sdp.to_string());
        Ok(())
    }

    async fn stop_senders(&self) -> Result<()> {
        self.log.push("stop_senders");
        for track in self.senders.lock().iter().filter(|t| t.is_live()) {
            track.stop();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.push("close");
        Ok(())
    }
}

/// Creates `MockConnection`s and keeps the last one
#[derive(Default)]
pub struct MockConnectionFactory {
    pub log: CallLog,
    pub fail_remote: bool,
    pub created: AtomicUsize,
    pub last: Mutex<Option<Arc<MockConnection>>>,
}

impl MockConnectionFactory {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn last(&self) -> Option<Arc<MockConnection>> {
        self.last.lock().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self, _events: EventBus) -> Result<Arc<dyn PeerConnection>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.log.push("create_connection");
        let connection = Arc::new(MockConnection {
            log: self.log.clone(),
            fail_remote: self.fail_remote,
            local: Mutex::new(None),
            senders: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
        });
        *self.last.lock() = Some(connection.clone());
        Ok(connection)
    }
}

/// Signaling with a scripted response and an optional gate
#[derive(Default)]
pub struct MockSignaling {
    pub log: CallLog,
    /// `Location` value returned with the answer
    pub location: Option<String>,
    /// Reject the offer with this message
    pub reject: Option<String>,
    /// Fail every DELETE
    pub fail_delete: bool,
    /// When set, `publish` waits for a notification before answering
    pub gate: Option<Arc<Notify>>,
    /// When set, the next DELETE waits for a notification
    pub delete_gate: Mutex<Option<Arc<Notify>>>,
    pub posted: Mutex<Vec<(Url, String)>>,
    pub deletes: Mutex<Vec<Url>>,
}

impl MockSignaling {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            location: Some("/room-1/whip/res-1".to_string()),
            ..Default::default()
        }
    }

    pub fn posted_urls(&self) -> Vec<String> {
        self.posted.lock().iter().map(|(u, _)| u.to_string()).collect()
    }

    pub fn posted_offer(&self) -> Option<String> {
        self.posted.lock().first().map(|(_, sdp)| sdp.clone())
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.lock().len()
    }
}

#[async_trait]
impl Signaling for MockSignaling {
    async fn publish(&self, url: &Url, offer: &str) -> Result<SignalingAnswer> {
        self.log.push(format!("post:{}", url));
        self.posted.lock().push((url.clone(), offer.to_string()));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.reject {
            return Err(WhipcastError::negotiation(message.clone()));
        }
        let location = match &self.location {
            Some(value) => Some(whipcast_core::output::resolve_locator(url, value)?),
            None => None,
        };
        Ok(SignalingAnswer {
            sdp: ANSWER_SDP.to_string(),
            location,
        })
    }

    async fn delete(&self, locator: &Url) -> Result<()> {
        self.log.push(format!("delete:{}", locator));
        self.deletes.lock().push(locator.clone());
        let gate = self.delete_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_delete {
            return Err(WhipcastError::teardown("connection refused"));
        }
        Ok(())
    }
}
