//! Core types for process diagrams
//!
//! These types describe the diagram elements the engine reads (tasks,
//! pools, flows) and the two closed classifications it derives on top
//! of them: the kind of a task and the classification of a message flow.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KindEngineError;
use crate::metadata::Metadata;

/// Unique identifier for a diagram element
pub type ElementId = String;

/// The kind of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskKind {
    /// No kind assigned
    #[default]
    None,
    /// Task moves to a destination
    Movement,
    /// Task binds with a partner task in another pool
    Binding,
    /// Task releases an earlier binding
    Unbinding,
}

impl TaskKind {
    /// All kinds, in palette order
    pub const ALL: [TaskKind; 4] = [
        TaskKind::None,
        TaskKind::Movement,
        TaskKind::Binding,
        TaskKind::Unbinding,
    ];

    /// Canonical stored spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Movement => "Movement",
            Self::Binding => "Binding",
            Self::Unbinding => "Unbinding",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = KindEngineError;

    /// Parses a kind key case-insensitively; historical diagrams carry
    /// mixed-case values. An empty key means no kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "movement" => Ok(Self::Movement),
            "binding" => Ok(Self::Binding),
            "unbinding" => Ok(Self::Unbinding),
            _ => Err(KindEngineError::unknown_kind(s)),
        }
    }
}

/// Derived classification of a message flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Classification {
    #[default]
    None,
    Binding,
    Unbinding,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Binding => "Binding",
            Self::Unbinding => "Unbinding",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Classification implied by the kinds of the two endpoint tasks
    pub fn from_kinds(source: TaskKind, target: TaskKind) -> Self {
        match (source, target) {
            (TaskKind::Binding, TaskKind::Binding) => Self::Binding,
            (TaskKind::Unbinding, TaskKind::Unbinding) => Self::Unbinding,
            _ => Self::None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type of a diagram element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// Pool; references the process it displays
    Participant,
    /// Business process owning flow nodes
    Process,
    /// Visual subdivision of a pool
    Lane,
    Task,
    Gateway,
    Event,
    /// Edge between flow nodes of one process
    SequenceFlow,
    /// Edge between elements of different pools
    MessageFlow,
}

impl ElementType {
    /// Whether sequence flows may attach to this element
    pub fn is_flow_node(&self) -> bool {
        matches!(self, Self::Task | Self::Gateway | Self::Event)
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::SequenceFlow | Self::MessageFlow)
    }
}

/// An element of the diagram as the engine sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramElement {
    /// Unique identifier for this element
    pub id: ElementId,
    /// Element type
    pub element_type: ElementType,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Visual container (lane, pool); walked upward to find a pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ElementId>,
    /// Owning process for flow nodes and sequence flows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ElementId>,
    /// Process displayed by a participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_ref: Option<ElementId>,
    /// Source element of a connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ElementId>,
    /// Target element of a connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ElementId>,
    /// Typed extension metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl DiagramElement {
    /// Create a bare element of the given type
    pub fn new(id: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            id: id.into(),
            element_type,
            name: String::new(),
            parent: None,
            process: None,
            process_ref: None,
            source: None,
            target: None,
            metadata: Metadata::default(),
        }
    }

    /// Set the display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_task(&self) -> bool {
        self.element_type == ElementType::Task
    }

    pub fn is_message_flow(&self) -> bool {
        self.element_type == ElementType::MessageFlow
    }

    pub fn is_participant(&self) -> bool {
        self.element_type == ElementType::Participant
    }

    /// Name for display, falling back to the id
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}
