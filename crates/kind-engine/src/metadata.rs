//! Typed element metadata
//!
//! Every piece of state the engine owns lives as an [`Attribute`] inside the
//! [`Metadata`] container of a host element. Attributes form a closed set;
//! loosely-typed host values only cross into this module through
//! [`Attribute::from_raw`], which validates and normalizes them.
//!
//! Container contract:
//! - [`Metadata::set`] is an upsert and reports `false` when nothing changed
//! - [`Metadata::remove_where`] removes in order and reports whether anything went
//! - nothing here defers work; all scheduling belongs to the change scheduler

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KindEngineError, Result};
use crate::types::{Classification, ElementId, TaskKind};

/// Stable identifier of an assignment row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(Uuid);

impl AssignmentId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A condition/value pair attached to a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub condition: String,
    pub value: String,
}

impl Assignment {
    pub fn new(condition: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: AssignmentId::new(),
            condition: condition.into(),
            value: value.into(),
        }
    }
}

/// Discriminant of an [`Attribute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeKind {
    TaskType,
    Destination,
    Binding,
    Assignment,
    MessageFlowType,
    SourceParticipant,
    TargetParticipant,
}

impl AttributeKind {
    /// Attributes owned by the connection classifier
    pub const CLASSIFICATION: [AttributeKind; 3] = [
        AttributeKind::MessageFlowType,
        AttributeKind::SourceParticipant,
        AttributeKind::TargetParticipant,
    ];

    /// Namespaced key used by hosts that store plain strings
    pub fn key(&self) -> &'static str {
        match self {
            Self::TaskType => "kind:Type",
            Self::Destination => "kind:Destination",
            Self::Binding => "kind:Binding",
            Self::Assignment => "kind:Assignment",
            Self::MessageFlowType => "kind:MessageFlowType",
            Self::SourceParticipant => "kind:SourceParticipant",
            Self::TargetParticipant => "kind:TargetParticipant",
        }
    }

    /// Look up a kind by its namespaced key (case-insensitive)
    pub fn from_key(key: &str) -> Option<Self> {
        const KINDS: [AttributeKind; 7] = [
            AttributeKind::TaskType,
            AttributeKind::Destination,
            AttributeKind::Binding,
            AttributeKind::Assignment,
            AttributeKind::MessageFlowType,
            AttributeKind::SourceParticipant,
            AttributeKind::TargetParticipant,
        ];
        KINDS
            .into_iter()
            .find(|kind| kind.key().eq_ignore_ascii_case(key.trim()))
    }
}

/// A typed metadata entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Attribute {
    /// The task's kind
    TaskType(TaskKind),
    /// Movement target place
    Destination(String),
    /// Binding details; empty reference until the user picks one
    Binding { reference: String },
    Assignment(Assignment),
    /// Stored classification of a message flow (never `None`)
    MessageFlowType(Classification),
    /// Pool containing the source task, captured at classification time
    SourceParticipant(ElementId),
    /// Pool containing the target task, captured at classification time
    TargetParticipant(ElementId),
}

impl Attribute {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::TaskType(_) => AttributeKind::TaskType,
            Self::Destination(_) => AttributeKind::Destination,
            Self::Binding { .. } => AttributeKind::Binding,
            Self::Assignment(_) => AttributeKind::Assignment,
            Self::MessageFlowType(_) => AttributeKind::MessageFlowType,
            Self::SourceParticipant(_) => AttributeKind::SourceParticipant,
            Self::TargetParticipant(_) => AttributeKind::TargetParticipant,
        }
    }

    /// Whether `other` occupies the same slot (assignments are keyed by id)
    fn same_slot(&self, other: &Attribute) -> bool {
        match (self, other) {
            (Self::Assignment(a), Self::Assignment(b)) => a.id == b.id,
            _ => self.kind() == other.kind(),
        }
    }

    /// Build a typed attribute from a namespaced key and raw string value
    ///
    /// Kind and classification values are case-normalized. Assignments are
    /// not scalar and must go through [`Metadata::import_legacy_assignments`].
    pub fn from_raw(key: &str, value: &str) -> Result<Self> {
        let invalid = || KindEngineError::InvalidAttribute {
            key: key.to_string(),
            value: value.to_string(),
        };
        let kind = AttributeKind::from_key(key).ok_or_else(invalid)?;
        let attribute = match kind {
            AttributeKind::TaskType => Self::TaskType(value.parse()?),
            AttributeKind::Destination => Self::Destination(value.to_string()),
            AttributeKind::Binding => Self::Binding {
                reference: value.to_string(),
            },
            AttributeKind::MessageFlowType => {
                match value.trim().to_ascii_lowercase().as_str() {
                    "binding" => Self::MessageFlowType(Classification::Binding),
                    "unbinding" => Self::MessageFlowType(Classification::Unbinding),
                    _ => return Err(invalid()),
                }
            }
            AttributeKind::SourceParticipant => Self::SourceParticipant(value.to_string()),
            AttributeKind::TargetParticipant => Self::TargetParticipant(value.to_string()),
            AttributeKind::Assignment => return Err(invalid()),
        };
        Ok(attribute)
    }
}

/// Metadata container attached to a diagram element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: Vec<Attribute>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a container from raw `(key, value)` pairs
    pub fn from_raw_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut metadata = Self::new();
        for (key, value) in entries {
            metadata.set(Attribute::from_raw(key, value)?);
        }
        Ok(metadata)
    }

    /// All entries in insertion order
    pub fn entries(&self) -> &[Attribute] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry of the given kind
    pub fn get(&self, kind: AttributeKind) -> Option<&Attribute> {
        self.entries.iter().find(|attr| attr.kind() == kind)
    }

    pub fn contains(&self, kind: AttributeKind) -> bool {
        self.get(kind).is_some()
    }

    /// Create the attribute, or update it in place
    ///
    /// Returns `false` when an identical value was already stored.
    pub fn set(&mut self, attribute: Attribute) -> bool {
        match self.entries.iter_mut().find(|existing| existing.same_slot(&attribute)) {
            Some(existing) if *existing == attribute => false,
            Some(existing) => {
                *existing = attribute;
                true
            }
            None => {
                self.entries.push(attribute);
                true
            }
        }
    }

    /// Remove every entry matching `predicate`
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&Attribute) -> bool) -> bool {
        let before = self.entries.len();
        self.entries.retain(|attr| !predicate(attr));
        self.entries.len() != before
    }

    /// Apply a batched update; returns whether the container changed
    pub fn apply(&mut self, update: &MetadataUpdate) -> bool {
        let before = self.entries.clone();
        self.remove_where(|attr| match attr {
            Attribute::Assignment(a) => {
                update.remove.contains(&AttributeKind::Assignment)
                    || update.remove_assignments.contains(&a.id)
            }
            other => update.remove.contains(&other.kind()),
        });
        for attribute in &update.set {
            self.set(attribute.clone());
        }
        self.entries != before
    }

    /// Stored task kind; absent means no kind
    pub fn task_kind(&self) -> TaskKind {
        match self.get(AttributeKind::TaskType) {
            Some(Attribute::TaskType(kind)) => *kind,
            _ => TaskKind::None,
        }
    }

    pub fn destination(&self) -> Option<&str> {
        match self.get(AttributeKind::Destination) {
            Some(Attribute::Destination(place)) => Some(place),
            _ => None,
        }
    }

    pub fn binding_reference(&self) -> Option<&str> {
        match self.get(AttributeKind::Binding) {
            Some(Attribute::Binding { reference }) => Some(reference),
            _ => None,
        }
    }

    /// Stored message flow classification; absent means `None`
    pub fn classification(&self) -> Classification {
        match self.get(AttributeKind::MessageFlowType) {
            Some(Attribute::MessageFlowType(classification)) => *classification,
            _ => Classification::None,
        }
    }

    pub fn source_participant(&self) -> Option<&str> {
        match self.get(AttributeKind::SourceParticipant) {
            Some(Attribute::SourceParticipant(id)) => Some(id),
            _ => None,
        }
    }

    pub fn target_participant(&self) -> Option<&str> {
        match self.get(AttributeKind::TargetParticipant) {
            Some(Attribute::TargetParticipant(id)) => Some(id),
            _ => None,
        }
    }

    /// Assignments in creation order
    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> + '_ {
        self.entries.iter().filter_map(|attr| match attr {
            Attribute::Assignment(a) => Some(a),
            _ => None,
        })
    }

    /// Pair positional condition/value lists from older diagrams
    ///
    /// Row `i` takes `conditions[i]` and `values[i]`; the shorter list is
    /// padded with empty strings so no half-row is dropped. Each row gets a
    /// fresh stable id. Returns the ids in row order.
    pub fn import_legacy_assignments(
        &mut self,
        conditions: &[String],
        values: &[String],
    ) -> Vec<AssignmentId> {
        let rows = conditions.len().max(values.len());
        (0..rows)
            .map(|i| {
                let assignment = Assignment::new(
                    conditions.get(i).cloned().unwrap_or_default(),
                    values.get(i).cloned().unwrap_or_default(),
                );
                let id = assignment.id.clone();
                self.entries.push(Attribute::Assignment(assignment));
                id
            })
            .collect()
    }
}

/// A batched metadata change applied atomically by the host model
///
/// Removals run before writes, so `remove(k).set(v)` replaces kind `k`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    remove: Vec<AttributeKind>,
    remove_assignments: Vec<AssignmentId>,
    set: Vec<Attribute>,
}

impl MetadataUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every attribute of this kind
    pub fn remove(mut self, kind: AttributeKind) -> Self {
        if !self.remove.contains(&kind) {
            self.remove.push(kind);
        }
        self
    }

    /// Remove every attribute of these kinds
    pub fn remove_all(self, kinds: impl IntoIterator<Item = AttributeKind>) -> Self {
        kinds.into_iter().fold(self, Self::remove)
    }

    /// Remove one assignment row
    pub fn remove_assignment(mut self, id: AssignmentId) -> Self {
        self.remove_assignments.push(id);
        self
    }

    /// Create or update an attribute
    pub fn set(mut self, attribute: Attribute) -> Self {
        self.set.push(attribute);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.remove_assignments.is_empty() && self.set.is_empty()
    }

    pub fn removed_kinds(&self) -> &[AttributeKind] {
        &self.remove
    }

    pub fn written(&self) -> &[Attribute] {
        &self.set
    }
}
