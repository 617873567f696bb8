//! WebRTC peer connection
//!
//! Uses the `webrtc` crate. Each added track gets an H.264 (video) or Opus
//! (audio) sender. Raw frames are turned into RTP samples by a
//! `SampleEncoder` from the configured `EncoderFactory` (FFmpeg by default in
//! `Publisher::new`); without one the connection negotiates normally but
//! sends no media.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MediaEngine};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{ConnectionFactory, PeerConnection};
use crate::capture::MediaTrack;
use crate::error::{Result, WhipcastError};
use crate::events::{EventBus, PublisherEvent};
use crate::types::{MediaSample, TrackKind};

const STREAM_ID: &str = "whipcast";

/// Turns raw samples into encoded RTP samples
pub trait SampleEncoder: Send {
    /// Encode one sample into zero or more RTP-ready samples
    fn encode(&mut self, sample: &MediaSample) -> Vec<Sample>;
}

/// Creates an encoder per sender
pub trait EncoderFactory: Send + Sync {
    /// H.264 for video, Opus for audio; `None` if unsupported
    fn encoder(&self, kind: TrackKind) -> Option<Box<dyn SampleEncoder>>;
}

/// Builds `webrtc` peer connections
#[derive(Clone)]
pub struct WebRtcConnectionFactory {
    ice_servers: Vec<String>,
    encoders: Option<Arc<dyn EncoderFactory>>,
}

impl WebRtcConnectionFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self {
            ice_servers,
            encoders: None,
        }
    }

    /// Use `encoders` to feed media into the senders
    pub fn with_encoders(mut self, encoders: Arc<dyn EncoderFactory>) -> Self {
        self.encoders = Some(encoders);
        self
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }
}

impl std::fmt::Debug for WebRtcConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcConnectionFactory")
            .field("ice_servers", &self.ice_servers)
            .field("encoders", &self.encoders.is_some())
            .finish()
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcConnectionFactory {
    async fn create(&self, events: EventBus) -> Result<Arc<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| WhipcastError::webrtc(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WhipcastError::webrtc(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        debug!("ICE servers: {:?}", self.ice_servers);

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| WhipcastError::webrtc(format!("Failed to create peer connection: {}", e)))?;

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!("Peer connection state: {}", state);
            if state == RTCPeerConnectionState::Failed {
                error!("Peer connection failed");
            }
            events.emit(PublisherEvent::Connection(state.to_string()));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcConnection {
            pc: Arc::new(pc),
            encoders: self.encoders.clone(),
            senders: Mutex::new(Vec::new()),
        }))
    }
}

struct SenderEntry {
    sender: Arc<RTCRtpSender>,
    track: Arc<dyn MediaTrack>,
    tasks: Vec<JoinHandle<()>>,
}

/// A `webrtc` peer connection with its senders
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    encoders: Option<Arc<dyn EncoderFactory>>,
    senders: Mutex<Vec<SenderEntry>>,
}

impl WebRtcConnection {
    /// Number of attached senders
    pub fn sender_count(&self) -> usize {
        self.senders.lock().len()
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()> {
        let kind = track.kind();
        let mime_type = match kind {
            TrackKind::Video => MIME_TYPE_H264,
            TrackKind::Audio => MIME_TYPE_OPUS,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                ..Default::default()
            },
            kind.to_string(),
            STREAM_ID.to_string(),
        ));

        let sender = self
            .pc
            .add_track(local.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| WhipcastError::webrtc(format!("Failed to add {} track: {}", kind, e)))?;

        let mut tasks = Vec::new();

        // RTCP must be drained for interceptors to work
        let rtcp_sender = sender.clone();
        tasks.push(tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtcp_sender.read(&mut rtcp_buf).await {}
        }));

        match self.encoders.as_ref().and_then(|f| f.encoder(kind)) {
            Some(encoder) => tasks.push(spawn_pump(track.subscribe(), encoder, local)),
            None => warn!("No {} encoder configured, {} sender will be silent", kind, track.label()),
        }

        debug!("Added {} sender for {}", kind, track.id());
        self.senders.lock().push(SenderEntry { sender, track, tasks });
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| WhipcastError::webrtc(format!("Failed to create offer: {}", e)))?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| WhipcastError::webrtc(format!("Invalid local offer: {}", e)))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| WhipcastError::webrtc(format!("Failed to set local description: {}", e)))
    }

    async fn local_description(&self) -> Result<String> {
        let mut gathered = self.pc.gathering_complete_promise().await;
        let _ = gathered.recv().await;

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| WhipcastError::webrtc("No local description"))
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| WhipcastError::negotiation(format!("Invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| WhipcastError::negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn stop_senders(&self) -> Result<()> {
        let entries = std::mem::take(&mut *self.senders.lock());
        let mut failures = Vec::new();

        for entry in entries {
            for task in &entry.tasks {
                task.abort();
            }
            if let Err(e) = entry.sender.stop().await {
                warn!("Failed to stop sender for {}: {}", entry.track.id(), e);
                failures.push(e.to_string());
            }
            entry.track.stop();
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(WhipcastError::teardown(failures.join("; ")))
        }
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| WhipcastError::webrtc(format!("Failed to close connection: {}", e)))
    }
}

fn spawn_pump(
    mut rx: broadcast::Receiver<MediaSample>,
    mut encoder: Box<dyn SampleEncoder>,
    local: Arc<TrackLocalStaticSample>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(sample) => {
                    for encoded in encoder.encode(&sample) {
                        if let Err(e) = local.write_sample(&encoded).await {
                            warn!("Failed to write sample: {}", e);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Sender lagged by {} samples", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
