//! Frame compositor
//!
//! Paints a full-frame background source and a picture-in-picture overlay
//! onto a BGRA canvas, and runs that as a recurring draw task whose output is
//! exposed as a video track. The preview and the publish stream both use it,
//! with different layouts.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::capture::{MediaTrack, TrackState};
use crate::types::{MediaSample, TrackId, TrackKind, VideoFrame, now_nanos};

/// Opaque black (BGRA)
pub const BLACK: [u8; 4] = [0, 0, 0, 255];

/// Canvas geometry and draw rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositorLayout {
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Draw and capture rate
    pub fps: u32,
    /// Overlay width as a fraction of the canvas width
    pub pip_fraction: f32,
    /// Overlay inset from the top and right edges
    pub margin: u32,
    /// Fill color when there is no background source (BGRA)
    pub background: [u8; 4],
}

impl CompositorLayout {
    /// 854x480 local preview
    pub fn preview() -> Self {
        Self {
            width: 854,
            height: 480,
            fps: 30,
            pip_fraction: 0.25,
            margin: 12,
            background: BLACK,
        }
    }

    /// 1280x720 publish stream
    pub fn publish() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            pip_fraction: 0.25,
            margin: 20,
            background: BLACK,
        }
    }

    /// Overlay rectangle: top-right corner, 16:9
    pub fn pip_rect(&self) -> Rect {
        let width = (self.width as f32 * self.pip_fraction).round() as u32;
        let height = (width as f32 * 9.0 / 16.0).round() as u32;
        Rect {
            x: self.width.saturating_sub(width + self.margin),
            y: self.margin,
            width,
            height,
        }
    }

    /// Time between draw steps
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for CompositorLayout {
    fn default() -> Self {
        Self::preview()
    }
}

/// Axis-aligned rectangle in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// BGRA drawing surface
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    /// Create a transparent canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width * height * 4) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resize, clearing contents if the size changed
    pub fn resize(&mut self, width: u32, height: u32) {
        if width != self.width || height != self.height {
            *self = Self::new(width, height);
        }
    }

    /// Clear to transparent
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Fill the whole canvas with a color
    pub fn fill(&mut self, color: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Draw `frame` scaled into `rect` (nearest neighbor), clipped to the canvas.
    ///
    /// Frames whose buffer does not match their declared size are skipped.
    pub fn draw_scaled(&mut self, frame: &VideoFrame, rect: Rect) {
        if frame.width == 0
            || frame.height == 0
            || rect.width == 0
            || rect.height == 0
            || frame.data.len() < (frame.width * frame.height * 4) as usize
        {
            return;
        }

        let stride = self.width as usize * 4;
        let src_stride = frame.width as usize * 4;
        let y_end = rect.y.saturating_add(rect.height).min(self.height);
        let x_end = rect.x.saturating_add(rect.width).min(self.width);

        for py in rect.y..y_end {
            let sy = ((py - rect.y) as u64 * frame.height as u64 / rect.height as u64) as usize;
            let src_row = sy * src_stride;
            let dst_row = py as usize * stride;
            for px in rect.x..x_end {
                let sx = ((px - rect.x) as u64 * frame.width as u64 / rect.width as u64) as usize;
                let src = src_row + sx * 4;
                let dst = dst_row + px as usize * 4;
                self.data[dst..dst + 4].copy_from_slice(&frame.data[src..src + 4]);
            }
        }
    }

    /// Copy the current contents out as a frame
    pub fn snapshot(&self) -> VideoFrame {
        VideoFrame {
            width: self.width,
            height: self.height,
            data: self.data.clone(),
            pts: now_nanos(),
        }
    }
}

/// Sources for one draw step
#[derive(Debug, Clone, Default)]
pub struct Layers {
    /// Drawn full-frame
    pub background: Option<Arc<VideoFrame>>,
    /// Drawn as picture-in-picture
    pub overlay: Option<Arc<VideoFrame>>,
}

impl Layers {
    /// Latest frames of a background and an overlay track
    pub fn from_tracks(
        background: Option<&Arc<dyn MediaTrack>>,
        overlay: Option<&Arc<dyn MediaTrack>>,
    ) -> Self {
        Self {
            background: background.filter(|t| t.is_live()).and_then(|t| t.latest_frame()),
            overlay: overlay.filter(|t| t.is_live()).and_then(|t| t.latest_frame()),
        }
    }
}

/// Produces the layers for each draw step
pub type LayerSource = Arc<dyn Fn() -> Layers + Send + Sync>;

/// Run one draw step
pub fn compose(canvas: &mut Canvas, layout: &CompositorLayout, layers: &Layers) {
    canvas.resize(layout.width, layout.height);

    let full = Rect {
        x: 0,
        y: 0,
        width: layout.width,
        height: layout.height,
    };
    match &layers.background {
        Some(frame) => {
            canvas.fill(layout.background);
            canvas.draw_scaled(frame, full);
        }
        None => canvas.fill(layout.background),
    }

    if let Some(frame) = &layers.overlay {
        canvas.draw_scaled(frame, layout.pip_rect());
    }
}

fn draw(
    state: &TrackState,
    canvas: &Mutex<Canvas>,
    layout: &CompositorLayout,
    layers: &LayerSource,
) {
    if !state.is_live() {
        return;
    }
    let current = layers();
    let frame = {
        let mut canvas = canvas.lock();
        compose(&mut canvas, layout, &current);
        canvas.snapshot()
    };
    state.push(MediaSample::Video(Arc::new(frame)));
}

/// Video track captured from a canvas redrawn by a background task
///
/// Stopping the track cancels the draw task.
pub struct CanvasTrack {
    state: Arc<TrackState>,
    layout: CompositorLayout,
    canvas: Arc<Mutex<Canvas>>,
    layers: LayerSource,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CanvasTrack {
    /// Start drawing `layers` onto `canvas` at the layout's frame rate
    pub fn start(
        label: &str,
        layout: CompositorLayout,
        canvas: Arc<Mutex<Canvas>>,
        layers: LayerSource,
    ) -> Arc<Self> {
        let state = Arc::new(TrackState::new(TrackKind::Video, label));
        let task_state = state.clone();
        let task_canvas = canvas.clone();
        let task_layers = layers.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(layout.frame_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut frames = 0u64;
            while task_state.is_live() {
                ticker.tick().await;
                draw(&task_state, &task_canvas, &layout, &task_layers);
                frames += 1;
                if frames % 300 == 0 {
                    trace!("{} drew {} frames", task_state.label(), frames);
                }
            }
        });

        debug!(
            "Compositor '{}' started at {}x{} @ {}fps",
            label, layout.width, layout.height, layout.fps
        );
        Arc::new(Self {
            state,
            layout,
            canvas,
            layers,
            task: Mutex::new(Some(task)),
        })
    }

    /// Draw one frame now instead of waiting for the next tick
    pub fn redraw(&self) {
        draw(&self.state, &self.canvas, &self.layout, &self.layers);
    }

    /// Layout this track draws with
    pub fn layout(&self) -> &CompositorLayout {
        &self.layout
    }

    /// Whether the draw task is still scheduled
    pub fn is_drawing(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for CanvasTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasTrack")
            .field("id", &self.state.id())
            .field("label", &self.state.label())
            .field("layout", &self.layout)
            .field("live", &self.state.is_live())
            .finish()
    }
}

impl MediaTrack for CanvasTrack {
    fn id(&self) -> TrackId {
        self.state.id()
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
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

    fn subscribe(&self) -> broadcast::Receiver<MediaSample> {
        self.state.subscribe()
    }
}

impl Drop for CanvasTrack {
    fn drop(&mut self) {
        self.stop();
    }
}
