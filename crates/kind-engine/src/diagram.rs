//! Host diagram seam
//!
//! [`DiagramModel`] is everything the engine needs from the editor that owns
//! the diagram: element lookup, an atomic metadata update, and the queue of
//! change notifications those updates produce. [`Diagram`] is an in-memory
//! implementation used by embedders without their own element store and by
//! the tests.

use serde::{Deserialize, Serialize};

use crate::error::{KindEngineError, Result};
use crate::events::DiagramEvent;
use crate::metadata::MetadataUpdate;
use crate::types::{DiagramElement, ElementId, ElementType, TaskKind};

/// Read access to diagram elements plus the host's model mutator
pub trait DiagramModel {
    /// Find an element by ID
    fn element(&self, id: &str) -> Option<&DiagramElement>;

    /// All elements, in host order
    fn elements(&self) -> Box<dyn Iterator<Item = &DiagramElement> + '_>;

    /// Apply a metadata update as one atomic change
    ///
    /// Returns whether anything changed. An effective update must produce
    /// exactly one [`DiagramEvent::ElementChanged`] notification.
    fn update_metadata(&mut self, id: &str, update: MetadataUpdate) -> Result<bool>;

    /// Drain notifications produced since the last call
    fn take_notifications(&mut self) -> Vec<DiagramEvent> {
        Vec::new()
    }

    /// Find a task by ID
    fn task(&self, id: &str) -> Result<&DiagramElement> {
        let element = self
            .element(id)
            .ok_or_else(|| KindEngineError::UnknownElement(id.to_string()))?;
        if element.is_task() {
            Ok(element)
        } else {
            Err(KindEngineError::NotATask(id.to_string()))
        }
    }

    /// Current kind of a task; anything that is not a task has no kind
    fn kind_of(&self, id: &str) -> TaskKind {
        self.element(id)
            .filter(|e| e.is_task())
            .map(|e| e.metadata.task_kind())
            .unwrap_or_default()
    }

    /// Walk the containment chain upward to the enclosing pool
    ///
    /// Gives up after `max_depth` steps; an overflow reads as "no pool".
    fn containing_pool(&self, id: &str, max_depth: usize) -> Option<&DiagramElement> {
        let mut current = self.element(id)?.parent.clone();
        for _ in 0..max_depth {
            let element = self.element(current.as_deref()?)?;
            if element.is_participant() {
                return Some(element);
            }
            current = element.parent.clone();
        }
        None
    }

    /// The pool displaying a flow node's owning process
    fn pool_of_process_member(&self, id: &str) -> Option<&DiagramElement> {
        let process = self.element(id)?.process.clone()?;
        self.elements()
            .find(|e| e.is_participant() && e.process_ref.as_deref() == Some(process.as_str()))
    }

    /// IDs of all message flows, in host order
    fn message_flow_ids(&self) -> Vec<ElementId> {
        self.elements()
            .filter(|e| e.is_message_flow())
            .map(|e| e.id.clone())
            .collect()
    }

    /// IDs of message flows starting or ending at the element
    fn attached_message_flows(&self, id: &str) -> Vec<ElementId> {
        self.elements()
            .filter(|e| e.is_message_flow())
            .filter(|e| e.source.as_deref() == Some(id) || e.target.as_deref() == Some(id))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Sources of sequence flows entering the node
    fn sequence_predecessors(&self, id: &str) -> Vec<ElementId> {
        self.elements()
            .filter(|e| e.element_type == ElementType::SequenceFlow)
            .filter(|e| e.target.as_deref() == Some(id))
            .filter_map(|e| e.source.clone())
            .collect()
    }

    /// Targets of sequence flows leaving the node
    fn sequence_successors(&self, id: &str) -> Vec<ElementId> {
        self.elements()
            .filter(|e| e.element_type == ElementType::SequenceFlow)
            .filter(|e| e.source.as_deref() == Some(id))
            .filter_map(|e| e.target.clone())
            .collect()
    }
}

/// In-memory diagram
///
/// Every effective metadata update queues one `ElementChanged`
/// notification; structural edits queue the notification an editor would
/// emit for them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagram {
    /// Unique identifier for this diagram
    pub id: String,
    elements: Vec<DiagramElement>,
    #[serde(skip)]
    notifications: Vec<DiagramEvent>,
    #[serde(skip)]
    updates_applied: usize,
}

impl Diagram {
    /// Create a new empty diagram
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Load a diagram from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the diagram to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add an element without emitting a notification
    pub fn insert(&mut self, element: DiagramElement) {
        match self.elements.iter_mut().find(|e| e.id == element.id) {
            Some(existing) => *existing = element,
            None => self.elements.push(element),
        }
    }

    /// Add a connection and notify as an editor would after drawing it
    pub fn connect(&mut self, connection: DiagramElement) {
        let id = connection.id.clone();
        self.insert(connection);
        self.notifications
            .push(DiagramEvent::ConnectionCreated { connection: id });
    }

    /// Move a connection's endpoints
    pub fn reconnect(&mut self, connection: &str, source: &str, target: &str) -> Result<()> {
        let element = self
            .element_mut(connection)
            .ok_or_else(|| KindEngineError::UnknownElement(connection.to_string()))?;
        element.source = Some(source.to_string());
        element.target = Some(target.to_string());
        self.notifications.push(DiagramEvent::ConnectionReconnected {
            connection: connection.to_string(),
        });
        Ok(())
    }

    /// Delete an element
    pub fn remove(&mut self, id: &str) -> Option<DiagramElement> {
        let pos = self.elements.iter().position(|e| e.id == id)?;
        self.notifications.push(DiagramEvent::ElementRemoved {
            element: id.to_string(),
        });
        Some(self.elements.remove(pos))
    }

    /// Signal that a bulk import finished
    pub fn finish_import(&mut self) {
        self.notifications.push(DiagramEvent::ImportDone);
    }

    /// Find an element by ID (mutable)
    ///
    /// Edits made through this reference emit no notification.
    pub fn element_mut(&mut self, id: &str) -> Option<&mut DiagramElement> {
        self.elements.iter_mut().find(|e| e.id == id)
    }

    /// Number of metadata updates that changed something
    pub fn updates_applied(&self) -> usize {
        self.updates_applied
    }

    /// Notifications queued but not yet drained
    pub fn pending_notifications(&self) -> &[DiagramEvent] {
        &self.notifications
    }
}

impl DiagramModel for Diagram {
    fn element(&self, id: &str) -> Option<&DiagramElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    fn elements(&self) -> Box<dyn Iterator<Item = &DiagramElement> + '_> {
        Box::new(self.elements.iter())
    }

    fn update_metadata(&mut self, id: &str, update: MetadataUpdate) -> Result<bool> {
        let element = self
            .element_mut(id)
            .ok_or_else(|| KindEngineError::UnknownElement(id.to_string()))?;
        let changed = element.metadata.apply(&update);
        if changed {
            self.updates_applied += 1;
            self.notifications.push(DiagramEvent::ElementChanged {
                element: id.to_string(),
            });
        }
        Ok(changed)
    }

    fn take_notifications(&mut self) -> Vec<DiagramEvent> {
        std::mem::take(&mut self.notifications)
    }
}
