//! whipcast core library
//!
//! Publish a composited screen + camera + microphone stream to a WHIP ingest
//! server, with a local preview and deterministic teardown.
//!
//! This library provides:
//! - Capability probing and per-source capture management
//! - A frame compositor shared by the preview and the publish stream
//! - The publish session state machine (offer/answer over HTTP, WebRTC media)
//! - Clients for the telemetry and recordings collaborators
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐    ┌────────────────┐    ┌──────────────────┐
//! │ Source Manager │───▶│  Compositor    │───▶│ Publish Session  │──▶ WHIP ingest
//! │ (MediaDevices) │    │ (preview/pub)  │    │ (WebRTC + HTTP)  │
//! └────────────────┘    └────────────────┘    └──────────────────┘
//!          │                                           │
//!          └──────────── EventBus (observers) ◀────────┘
//! ```

pub mod capture;
pub mod compositor;
pub mod config;
pub mod encode;
pub mod error;
pub mod events;
pub mod identity;
pub mod output;
pub mod preview;
pub mod publisher;
pub mod recordings;
pub mod sdp;
pub mod session;
pub mod telemetry;
pub mod types;

pub use config::{ConfigFile, PublisherConfig};
pub use error::{Result, WhipcastError};
pub use events::{EventBus, PublisherEvent};
pub use identity::SessionId;
pub use publisher::Publisher;
pub use session::{Phase, StartOutcome, StopOutcome};
pub use types::{Availability, SourceKind};
