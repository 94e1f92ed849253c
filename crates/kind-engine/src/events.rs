//! Notifications in and out of the engine
//!
//! Inbound [`DiagramEvent`]s are what the host reports after editing the
//! diagram. Outbound [`EngineEvent`]s go to downstream consumers (renderers,
//! property panels) through an [`EventSink`].

use serde::{Deserialize, Serialize};

use crate::types::{Classification, ElementId};

/// Graph-change notification emitted by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiagramEvent {
    /// A connection was drawn
    ConnectionCreated { connection: ElementId },
    /// A connection had its source or target moved
    ConnectionReconnected { connection: ElementId },
    /// A whole diagram finished importing
    ImportDone,
    /// Metadata or properties of an element changed
    ElementChanged { element: ElementId },
    /// An element was deleted
    ElementRemoved { element: ElementId },
}

/// Trait for sending engine events
///
/// This abstracts over the transport mechanism (channel, callback, etc.)
/// so the engine can be embedded in different hosts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: EngineEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Elements whose derived state changed and should be redrawn
    #[serde(rename_all = "camelCase")]
    ElementsChanged { elements: Vec<ElementId> },

    /// A connection's stored classification was rewritten
    #[serde(rename_all = "camelCase")]
    ConnectionReconciled {
        connection: ElementId,
        classification: Classification,
    },

    /// Reconciling a connection failed; it will be retried on the next
    /// relevant notification
    #[serde(rename_all = "camelCase")]
    ReconcileFailed { connection: ElementId, error: String },
}

impl EngineEvent {
    /// Create an elements-changed event for a single element
    pub fn element_changed(id: &str) -> Self {
        Self::ElementsChanged {
            elements: vec![id.to_string()],
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: EngineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<EngineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: EngineEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn send(&self, event: EngineEvent) -> Result<(), EventError> {
        (**self).send(event)
    }
}
