//! Publish session state machine
//!
//! ```text
//!  Idle ──start──▶ Capturing ──▶ Negotiating ──▶ Publishing
//!   ▲                  │              │               │
//!   │                  └── failure ───┴──────┐      stop
//!   │                                        ▼        ▼
//!   └──────────────────────────────────── Stopping ◀──┘
//! ```
//!
//! The session acquires its own camera, microphone and screen tracks and
//! never touches the ones held by the source manager. State lives behind a
//! mutex that is never held across an `.await`; the phase check and the phase
//! change happen under one lock, which is what makes `start` and `stop`
//! re-entrancy safe.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::capture::{MediaDevices, MediaTrack, split_tracks};
use crate::compositor::{Canvas, CanvasTrack, CompositorLayout, LayerSource, Layers};
use crate::error::{Result, WhipcastError};
use crate::events::{EventBus, PublisherEvent};
use crate::identity::SessionId;
use crate::output::{ConnectionFactory, PeerConnection, Signaling, publish_url};
use crate::preview::PreviewCompositor;
use crate::sdp::prefer_h264;
use crate::types::{MediaConstraints, SourceKind, VideoConstraints};

/// Lifecycle phase of a publish session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Capturing,
    Negotiating,
    Publishing,
    Stopping,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Capturing => write!(f, "capturing"),
            Phase::Negotiating => write!(f, "negotiating"),
            Phase::Publishing => write!(f, "publishing"),
            Phase::Stopping => write!(f, "stopping"),
        }
    }
}

/// Result of `PublishSession::start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The session is live
    Publishing { locator: Option<Url> },
    /// Another attempt or session was active; nothing was done
    AlreadyActive(Phase),
}

/// Result of `PublishSession::stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Teardown ran and the session is idle again
    Stopped,
    /// The session was not publishing; nothing was done
    NotPublishing(Phase),
}

/// Camera constraints for the publish stream (with audio)
pub fn publish_camera_constraints() -> VideoConstraints {
    VideoConstraints::with_size(640, 360)
}

/// Screen constraints for the publish stream
pub fn publish_screen_constraints() -> VideoConstraints {
    VideoConstraints::with_size(1280, 720).with_frame_rate(30)
}

/// Tracks owned by one publish attempt
#[derive(Debug, Default)]
struct PublishTracks {
    composite: Option<Arc<dyn MediaTrack>>,
    microphone: Option<Arc<dyn MediaTrack>>,
    camera: Option<Arc<dyn MediaTrack>>,
    screen: Option<Arc<dyn MediaTrack>>,
}

impl PublishTracks {
    fn into_vec(self) -> Vec<Arc<dyn MediaTrack>> {
        [self.composite, self.microphone, self.camera, self.screen]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[derive(Default)]
struct SessionState {
    phase: Phase,
    /// Bumped whenever an attempt is abandoned, so late results are dropped
    attempt: u64,
    path: Option<SessionId>,
    connection: Option<Arc<dyn PeerConnection>>,
    locator: Option<Url>,
    tracks: PublishTracks,
}

/// Everything a teardown needs, taken out of the state in one step
struct Teardown {
    /// Attempt being torn down; a newer attempt keeps its state
    attempt: u64,
    connection: Option<Arc<dyn PeerConnection>>,
    locator: Option<Url>,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl SessionState {
    fn begin_teardown(&mut self) -> Teardown {
        self.phase = Phase::Stopping;
        Teardown {
            attempt: self.attempt,
            connection: self.connection.take(),
            locator: self.locator.take(),
            tracks: std::mem::take(&mut self.tracks).into_vec(),
        }
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt && matches!(self.phase, Phase::Capturing | Phase::Negotiating)
    }
}

/// Publishes a composed stream to an ingest server
pub struct PublishSession {
    devices: Arc<dyn MediaDevices>,
    connections: Arc<dyn ConnectionFactory>,
    signaling: Arc<dyn Signaling>,
    preview: PreviewCompositor,
    events: EventBus,
    ingest_base: Url,
    layout: CompositorLayout,
    state: Mutex<SessionState>,
}

impl PublishSession {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        connections: Arc<dyn ConnectionFactory>,
        signaling: Arc<dyn Signaling>,
        preview: PreviewCompositor,
        events: EventBus,
        ingest_base: Url,
        layout: CompositorLayout,
    ) -> Self {
        Self {
            devices,
            connections,
            signaling,
            preview,
            events,
            ingest_base,
            layout,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Session id of the active attempt
    pub fn path(&self) -> Option<SessionId> {
        self.state.lock().path.clone()
    }

    /// Publish resource returned by the ingest server
    pub fn locator(&self) -> Option<Url> {
        self.state.lock().locator.clone()
    }

    /// Whether a connection is held
    pub fn has_connection(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    /// Start publishing under `id`.
    ///
    /// Does nothing unless the session is idle. Any failure tears down
    /// whatever was set up and leaves the session idle again.
    pub async fn start(&self, id: SessionId) -> Result<StartOutcome> {
        let attempt = {
            let mut state = self.state.lock();
            if state.phase != Phase::Idle {
                debug!("Start ignored, session is {}", state.phase);
                return Ok(StartOutcome::AlreadyActive(state.phase));
            }
            state.phase = Phase::Capturing;
            state.path = Some(id.clone());
            state.attempt
        };
        info!("Starting publish session '{}'", id);
        self.set_phase(Phase::Capturing);

        match self.run(attempt, &id).await {
            Ok(locator) => {
                info!("Publishing '{}'", id);
                Ok(StartOutcome::Publishing { locator })
            }
            Err(e) => {
                error!("Publish '{}' failed: {}", id, e);
                self.events.emit(PublisherEvent::Error(e.to_string()));
                let teardown = {
                    let mut state = self.state.lock();
                    state.is_current(attempt).then(|| state.begin_teardown())
                };
                if let Some(teardown) = teardown {
                    self.set_phase(Phase::Stopping);
                    self.finish_teardown(teardown).await;
                }
                Err(e)
            }
        }
    }

    /// Stop publishing. Does nothing unless the session is publishing.
    pub async fn stop(&self) -> StopOutcome {
        let teardown = {
            let mut state = self.state.lock();
            if state.phase != Phase::Publishing {
                debug!("Stop ignored, session is {}", state.phase);
                return StopOutcome::NotPublishing(state.phase);
            }
            state.begin_teardown()
        };
        info!("Stopping publish session");
        self.set_phase(Phase::Stopping);
        self.finish_teardown(teardown).await;
        StopOutcome::Stopped
    }

    /// Synchronous teardown for process exit.
    ///
    /// Stops every publish track immediately; the DELETE and the connection
    /// close are spawned without being awaited.
    pub fn unload(&self) {
        let teardown = {
            let mut state = self.state.lock();
            if state.phase == Phase::Idle {
                return;
            }
            state.attempt += 1;
            let teardown = state.begin_teardown();
            state.phase = Phase::Idle;
            state.path = None;
            teardown
        };
        info!("Unloading publish session");

        for track in &teardown.tracks {
            if track.is_live() {
                track.stop();
            }
        }
        self.preview.unbind();

        if teardown.connection.is_some() || teardown.locator.is_some() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let signaling = self.signaling.clone();
                    handle.spawn(async move {
                        if let Some(locator) = &teardown.locator {
                            if let Err(e) = signaling.delete(locator).await {
                                debug!("DELETE on unload failed (ignored): {}", e);
                            }
                        }
                        if let Some(connection) = &teardown.connection {
                            let _ = connection.stop_senders().await;
                            let _ = connection.close().await;
                        }
                    });
                }
                Err(_) => warn!("No runtime on unload, publish resource left on the server"),
            }
        }
        self.set_phase(Phase::Idle);
    }

    async fn run(&self, attempt: u64, id: &SessionId) -> Result<Option<Url>> {
        // Capturing
        let composite = self.capture(attempt).await?;
        let microphone = self.state.lock().tracks.microphone.clone();

        // Negotiating
        let connection = self.connections.create(self.events.clone()).await?;
        {
            let mut state = self.state.lock();
            if !state.is_current(attempt) {
                drop(state);
                spawn_close(connection);
                return Err(cancelled());
            }
            state.connection = Some(connection.clone());
            state.phase = Phase::Negotiating;
        }
        self.set_phase(Phase::Negotiating);

        connection.add_track(composite).await?;
        if let Some(microphone) = microphone {
            connection.add_track(microphone).await?;
        }

        // The connection only accepts its own offer; the codec order is
        // rewritten on the gathered description that goes on the wire.
        let offer = connection.create_offer().await?;
        connection.set_local_description(&offer).await?;
        let local = connection.local_description().await?;
        let local = prefer_h264(&local).into_owned();

        let url = publish_url(&self.ingest_base, id)?;
        let answer = self.signaling.publish(&url, &local).await?;
        {
            let mut state = self.state.lock();
            if !state.is_current(attempt) {
                drop(state);
                if let Some(locator) = answer.location {
                    self.spawn_delete(locator);
                }
                return Err(cancelled());
            }
            state.locator = answer.location.clone();
        }

        connection.set_remote_description(&answer.sdp).await?;

        {
            let mut state = self.state.lock();
            if !state.is_current(attempt) {
                return Err(cancelled());
            }
            state.phase = Phase::Publishing;
        }
        self.set_phase(Phase::Publishing);
        self.events.emit(PublisherEvent::Published {
            locator: answer.location.clone(),
        });
        Ok(answer.location)
    }

    /// Acquire publish tracks and build the composite. Returns the composite.
    async fn capture(&self, attempt: u64) -> Result<Arc<dyn MediaTrack>> {
        match self
            .devices
            .get_user_media(MediaConstraints::camera_and_microphone(publish_camera_constraints()))
            .await
        {
            Ok(tracks) => {
                let (camera, microphone) = split_tracks(tracks);
                if let Err(e) = self.adopt(attempt, camera, |t| &mut t.camera) {
                    if let Some(microphone) = microphone {
                        microphone.stop();
                    }
                    return Err(e);
                }
                self.adopt(attempt, microphone, |t| &mut t.microphone)?;
            }
            Err(e) => warn!("Publishing without camera and microphone: {}", e),
        }

        if !self.devices.supports_display_capture() {
            return Err(WhipcastError::DeviceUnavailable(
                SourceKind::Screen,
                "display capture not supported".into(),
            ));
        }
        let screen = self
            .devices
            .get_display_media(publish_screen_constraints())
            .await
            .map_err(|e| e.into_error(SourceKind::Screen))?;
        self.adopt(attempt, Some(screen.clone()), |t| &mut t.screen)?;

        let camera = self.state.lock().tracks.camera.clone();
        let layers: LayerSource =
            Arc::new(move || Layers::from_tracks(Some(&screen), camera.as_ref()));
        let canvas = Arc::new(Mutex::new(Canvas::new(self.layout.width, self.layout.height)));
        let composite: Arc<dyn MediaTrack> =
            CanvasTrack::start("publish", self.layout, canvas, layers);
        self.adopt(attempt, Some(composite.clone()), |t| &mut t.composite)?;

        self.preview.bind(composite.clone());
        Ok(composite)
    }

    /// Store a freshly acquired track, or stop it if the attempt was abandoned
    fn adopt(
        &self,
        attempt: u64,
        track: Option<Arc<dyn MediaTrack>>,
        slot: impl FnOnce(&mut PublishTracks) -> &mut Option<Arc<dyn MediaTrack>>,
    ) -> Result<()> {
        let Some(track) = track else {
            return Ok(());
        };
        let mut state = self.state.lock();
        if state.is_current(attempt) {
            *slot(&mut state.tracks) = Some(track);
            Ok(())
        } else {
            drop(state);
            track.stop();
            Err(cancelled())
        }
    }

    async fn finish_teardown(&self, teardown: Teardown) {
        let Teardown {
            attempt,
            connection,
            locator,
            tracks,
        } = teardown;

        if let Some(locator) = &locator {
            if let Err(e) = self.signaling.delete(locator).await {
                warn!("Failed to remove publish resource (ignored): {}", e);
            }
        }

        if let Some(connection) = &connection {
            if let Err(e) = connection.stop_senders().await {
                warn!("Failed to stop senders: {}", e);
            }
            if let Err(e) = connection.close().await {
                warn!("Failed to close connection: {}", e);
            }
        }

        let mut stopped = 0;
        for track in &tracks {
            if track.is_live() && track.stop() {
                stopped += 1;
            }
        }
        debug!("Stopped {} remaining publish track(s)", stopped);

        {
            let mut state = self.state.lock();
            if state.attempt != attempt {
                debug!("Attempt {} superseded, leaving state of attempt {}", attempt, state.attempt);
                return;
            }
            state.phase = Phase::Idle;
            state.path = None;
        }
        self.preview.unbind();
        self.set_phase(Phase::Idle);
        info!("Publish session stopped");
    }

    fn spawn_delete(&self, locator: Url) {
        let signaling = self.signaling.clone();
        tokio::spawn(async move {
            if let Err(e) = signaling.delete(&locator).await {
                debug!("DELETE of abandoned resource failed (ignored): {}", e);
            }
        });
    }

    fn set_phase(&self, phase: Phase) {
        debug!("Phase -> {}", phase);
        self.events.emit(PublisherEvent::Phase(phase));
    }
}

impl Drop for PublishSession {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for PublishSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PublishSession")
            .field("phase", &state.phase)
            .field("path", &state.path)
            .field("locator", &state.locator)
            .field("ingest_base", &self.ingest_base)
            .finish_non_exhaustive()
    }
}

fn cancelled() -> WhipcastError {
    WhipcastError::negotiation("publish attempt was abandoned")
}

fn spawn_close(connection: Arc<dyn PeerConnection>) {
    tokio::spawn(async move {
        let _ = connection.stop_senders().await;
        let _ = connection.close().await;
    });
}
