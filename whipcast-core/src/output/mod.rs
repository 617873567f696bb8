//! Publish transport
//!
//! - `PeerConnection` / `ConnectionFactory`: the media connection the session
//!   negotiates and tears down
//! - `Signaling`: the HTTP offer/answer exchange with the ingest server
//! - WebRTC and HTTP implementations of both

mod webrtc;
mod whip;

pub use self::webrtc::{EncoderFactory, SampleEncoder, WebRtcConnection, WebRtcConnectionFactory};
pub use whip::{HttpSignaling, Signaling, SignalingAnswer, publish_url, resolve_locator};

use async_trait::async_trait;
use std::sync::Arc;

use crate::capture::MediaTrack;
use crate::error::Result;
use crate::events::EventBus;

/// A media connection carrying local tracks to the ingest server
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach a local track as a sender
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<()>;

    /// Generate an offer SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply the offer from `create_offer`, unmodified, as the local description
    async fn set_local_description(&self, sdp: &str) -> Result<()>;

    /// Local description once candidate gathering has finished
    async fn local_description(&self) -> Result<String>;

    /// Apply the server's answer
    async fn set_remote_description(&self, sdp: &str) -> Result<()>;

    /// Stop every sender and the track it carries
    async fn stop_senders(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Creates a fresh connection per publish attempt
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// State changes are reported on `events`
    async fn create(&self, events: EventBus) -> Result<Arc<dyn PeerConnection>>;
}
