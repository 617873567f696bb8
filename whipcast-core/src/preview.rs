//! Local preview
//!
//! Draws the current sources (or the bound publish output) onto a reused
//! canvas while visible. The draw loop runs if and only if the preview is
//! visible.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::capture::{MediaTrack, SourceView};
use crate::compositor::{Canvas, CanvasTrack, CompositorLayout, LayerSource, Layers};
use crate::events::{EventBus, PublisherEvent};

#[derive(Debug, Default)]
struct PreviewState {
    visible: bool,
    canvas: Option<Arc<Mutex<Canvas>>>,
    output: Option<Arc<CanvasTrack>>,
}

struct PreviewInner {
    layout: CompositorLayout,
    sources: SourceView,
    events: EventBus,
    binding: Arc<Mutex<Option<Arc<dyn MediaTrack>>>>,
    state: Mutex<PreviewState>,
}

/// Handle to the preview compositor. Clones share the same preview.
#[derive(Clone)]
pub struct PreviewCompositor {
    inner: Arc<PreviewInner>,
}

impl PreviewCompositor {
    pub fn new(layout: CompositorLayout, sources: SourceView, events: EventBus) -> Self {
        Self {
            inner: Arc::new(PreviewInner {
                layout,
                sources,
                events,
                binding: Arc::new(Mutex::new(None)),
                state: Mutex::new(PreviewState::default()),
            }),
        }
    }

    pub fn layout(&self) -> &CompositorLayout {
        &self.inner.layout
    }

    pub fn is_visible(&self) -> bool {
        self.inner.state.lock().visible
    }

    /// Show or hide the preview. Repeating the current state does nothing.
    pub fn set_visible(&self, visible: bool) {
        let changed = {
            let mut state = self.inner.state.lock();
            if state.visible == visible {
                false
            } else {
                state.visible = visible;
                if visible {
                    self.start_locked(&mut state);
                } else if let Some(output) = state.output.take() {
                    output.stop();
                }
                true
            }
        };

        if changed {
            info!("Preview {}", if visible { "shown" } else { "hidden" });
            self.inner.events.emit(PublisherEvent::Preview { visible });
        }
    }

    /// Flip visibility, returning the new state
    pub fn toggle(&self) -> bool {
        let visible = !self.is_visible();
        self.set_visible(visible);
        visible
    }

    /// Recomposite immediately if visible
    pub fn refresh(&self) {
        let output = self.inner.state.lock().output.clone();
        if let Some(output) = output {
            output.redraw();
        }
    }

    /// Current preview output track, present while visible
    pub fn output_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.inner
            .state
            .lock()
            .output
            .clone()
            .map(|t| t as Arc<dyn MediaTrack>)
    }

    /// Draw `track` full-frame instead of the individual sources
    pub fn bind(&self, track: Arc<dyn MediaTrack>) {
        debug!("Preview bound to {}", track.id());
        *self.inner.binding.lock() = Some(track);
        self.refresh();
    }

    /// Go back to drawing the individual sources
    pub fn unbind(&self) {
        if self.inner.binding.lock().take().is_some() {
            debug!("Preview binding cleared");
        }
        self.refresh();
    }

    /// Whether a publish output is currently bound
    pub fn is_bound(&self) -> bool {
        self.inner.binding.lock().is_some()
    }

    fn start_locked(&self, state: &mut PreviewState) {
        if let Some(previous) = state.output.take() {
            previous.stop();
        }

        let layout = self.inner.layout;
        let canvas = state
            .canvas
            .get_or_insert_with(|| Arc::new(Mutex::new(Canvas::new(layout.width, layout.height))))
            .clone();

        let sources = self.inner.sources.clone();
        let binding = self.inner.binding.clone();
        let layers: LayerSource = Arc::new(move || {
            let bound = binding.lock().clone();
            match bound {
                Some(track) => Layers::from_tracks(Some(&track), None),
                None => sources.layers(),
            }
        });

        state.output = Some(CanvasTrack::start("preview", layout, canvas, layers));
    }

    #[cfg(test)]
    fn canvas_ptr(&self) -> Option<*const Mutex<Canvas>> {
        self.inner.state.lock().canvas.as_ref().map(Arc::as_ptr)
    }
}

impl std::fmt::Debug for PreviewCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewCompositor")
            .field("layout", &self.inner.layout)
            .field("visible", &self.is_visible())
            .field("bound", &self.is_bound())
            .finish()
    }
}
