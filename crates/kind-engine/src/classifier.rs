//! Message flow classification
//!
//! A message flow is `Binding` when both endpoint tasks are Binding tasks,
//! `Unbinding` when both are Unbinding tasks, and unclassified otherwise.
//! The classification and the pools of both endpoints are cached on the
//! flow's metadata; [`Classifier::reconcile`] keeps that cache equal to what
//! the endpoints imply and writes nothing when it already is.

use crate::diagram::DiagramModel;
use crate::error::{Endpoint, KindEngineError, Result};
use crate::metadata::{Attribute, AttributeKind, Metadata, MetadataUpdate};
use crate::types::{Classification, DiagramElement, ElementId};

/// Classification of a connection plus the pool references cached with it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationState {
    pub classification: Classification,
    pub source_pool: Option<ElementId>,
    pub target_pool: Option<ElementId>,
}

impl ClassificationState {
    /// State currently stored on a connection
    pub fn stored(metadata: &Metadata) -> Self {
        Self {
            classification: metadata.classification(),
            source_pool: metadata.source_participant().map(str::to_string),
            target_pool: metadata.target_participant().map(str::to_string),
        }
    }

    /// Metadata update turning any stored state into this one
    fn to_update(&self) -> MetadataUpdate {
        let update = MetadataUpdate::new().remove_all(AttributeKind::CLASSIFICATION);
        match (&self.classification, &self.source_pool, &self.target_pool) {
            (Classification::None, _, _) => update,
            (classification, Some(source), Some(target)) => update
                .set(Attribute::MessageFlowType(*classification))
                .set(Attribute::SourceParticipant(source.clone()))
                .set(Attribute::TargetParticipant(target.clone())),
            // desired states always carry both pools when classified
            _ => update,
        }
    }
}

/// Result of reconciling one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Stored state already matched
    Unchanged,
    /// New classification written
    Classified(Classification),
    /// Stale classification removed
    Cleared,
}

/// Derive the classification a connection should have
///
/// Missing endpoints and endpoints that are not tasks classify as `None`.
pub fn classify<M: DiagramModel>(model: &M, connection: &DiagramElement) -> Classification {
    let endpoint_kind = |id: &Option<ElementId>| {
        id.as_deref()
            .and_then(|id| model.element(id))
            .filter(|e| e.is_task())
            .map(|e| e.metadata.task_kind())
    };
    match (endpoint_kind(&connection.source), endpoint_kind(&connection.target)) {
        (Some(source), Some(target)) => Classification::from_kinds(source, target),
        _ => Classification::None,
    }
}

/// Derives and reconciles message flow classifications
#[derive(Debug, Clone)]
pub struct Classifier {
    max_parent_depth: usize,
}

impl Classifier {
    pub fn new(max_parent_depth: usize) -> Self {
        Self { max_parent_depth }
    }

    /// State the connection should carry
    ///
    /// Fails with a resolution error when the connection classifies but an
    /// endpoint has no pool within the traversal limit.
    pub fn desired_state<M: DiagramModel>(
        &self,
        model: &M,
        connection: &DiagramElement,
    ) -> Result<ClassificationState> {
        let classification = classify(model, connection);
        if classification.is_none() {
            return Ok(ClassificationState::default());
        }

        let pool_of = |endpoint: Endpoint, id: &Option<ElementId>| {
            id.as_deref()
                .and_then(|id| model.containing_pool(id, self.max_parent_depth))
                .map(|pool| pool.id.clone())
                .ok_or_else(|| KindEngineError::Resolution {
                    connection: connection.id.clone(),
                    endpoint,
                })
        };

        Ok(ClassificationState {
            classification,
            source_pool: Some(pool_of(Endpoint::Source, &connection.source)?),
            target_pool: Some(pool_of(Endpoint::Target, &connection.target)?),
        })
    }

    /// Bring a connection's stored classification in line with its endpoints
    ///
    /// Without `forced`, a connection whose stored state already matches is
    /// left alone, which is what stops the engine's own writes from looping.
    /// With `forced`, the classification is cleared and recomputed in one
    /// update. Nothing is written if an endpoint's pool cannot be resolved.
    pub fn reconcile<M: DiagramModel>(
        &self,
        model: &mut M,
        connection: &str,
        forced: bool,
    ) -> Result<ReconcileOutcome> {
        let element = model
            .element(connection)
            .ok_or_else(|| KindEngineError::UnknownElement(connection.to_string()))?;
        if !element.is_message_flow() {
            return Err(KindEngineError::NotAConnection(connection.to_string()));
        }

        let stored = ClassificationState::stored(&element.metadata);
        let desired = self.desired_state(model, element)?;

        if !forced && stored == desired {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let changed = model.update_metadata(connection, desired.to_update())?;
        let outcome = match (changed, desired.classification) {
            (false, _) => ReconcileOutcome::Unchanged,
            (true, Classification::None) => ReconcileOutcome::Cleared,
            (true, classification) => ReconcileOutcome::Classified(classification),
        };
        log::debug!("Reconciled connection '{}': {:?}", connection, outcome);
        Ok(outcome)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(crate::constants::defaults::MAX_PARENT_DEPTH)
    }
}
