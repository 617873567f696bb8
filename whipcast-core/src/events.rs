//! Publisher events
//!
//! Every state change the UI might care about is broadcast here instead of
//! being written into a concrete widget. Observers subscribe and receive every
//! event sent after they subscribed.

use tokio::sync::broadcast;
use tracing::trace;
use url::Url;

use crate::session::Phase;
use crate::types::{Availability, SourceKind};

/// Capacity of the event channel; slow observers see `Lagged`
const EVENT_CAPACITY: usize = 64;

/// Something observable happened
#[derive(Debug, Clone, PartialEq)]
pub enum PublisherEvent {
    /// A capture source's availability changed
    Availability {
        kind: SourceKind,
        availability: Availability,
    },
    /// The publish session moved to a new phase
    Phase(Phase),
    /// The preview was shown or hidden
    Preview { visible: bool },
    /// The ingest server accepted the offer
    Published { locator: Option<Url> },
    /// Peer connection state change (informational only)
    Connection(String),
    /// A failure that ended an operation, for the status channel
    Error(String),
}

/// Broadcast channel for publisher events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PublisherEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Register an observer
    pub fn subscribe(&self) -> broadcast::Receiver<PublisherEvent> {
        self.tx.subscribe()
    }

    /// Send an event; having no observers is fine
    pub fn emit(&self, event: PublisherEvent) {
        trace!("event: {:?}", event);
        let _ = self.tx.send(event);
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
