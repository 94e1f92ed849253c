//! Advisory validation of task kinds
//!
//! Walks the sequence flows of one pool to relate Binding and Unbinding
//! tasks, and turns the answers into warnings. Validation never vetoes an
//! edit: every [`ValidationResult`] is valid and only carries advice.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, text};
use crate::diagram::DiagramModel;
use crate::error::Result;
use crate::types::{ElementId, TaskKind};

/// What a warning is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// An Unbinding task with no Binding task before it
    MissingUpstreamBinding,
    /// Unbinding tasks that would lose their Binding task
    OrphanedUnbinding,
    /// Unbinding tasks that currently depend on a Binding task
    DependentUnbindings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A transient, non-blocking diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub message: String,
    pub affected_tasks: Vec<ElementId>,
}

/// Outcome of validating an edit; `valid` is always true
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    fn advisory(warnings: Vec<ValidationWarning>) -> Self {
        Self {
            valid: true,
            warnings,
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Backward,
    Forward,
}

/// Graph validator over a pool's sequence flows
#[derive(Debug, Clone)]
pub struct GraphValidator {
    preview_limit: usize,
}

impl GraphValidator {
    /// `preview_limit` caps how many task names a warning spells out
    pub fn new(preview_limit: usize) -> Self {
        Self { preview_limit }
    }

    /// Binding tasks reachable backward from `task` within its pool
    ///
    /// The task itself is never part of the result.
    pub fn find_upstream_binding_tasks<M: DiagramModel>(
        &self,
        model: &M,
        task: &str,
    ) -> BTreeSet<ElementId> {
        collect_reachable(model, task, Direction::Backward, TaskKind::Binding)
    }

    /// Unbinding tasks reachable forward from `binding_task` within its pool
    pub fn find_dependent_unbinding_tasks<M: DiagramModel>(
        &self,
        model: &M,
        binding_task: &str,
    ) -> BTreeSet<ElementId> {
        collect_reachable(model, binding_task, Direction::Forward, TaskKind::Unbinding)
    }

    /// Advise on changing `task` to `new_kind`
    ///
    /// Nothing is reported when the kind does not change.
    pub fn validate_kind_change<M: DiagramModel>(
        &self,
        model: &M,
        task: &str,
        new_kind: TaskKind,
    ) -> Result<ValidationResult> {
        let element = model.task(task)?;
        let current = element.metadata.task_kind();
        let mut warnings = Vec::new();

        if current == new_kind {
            return Ok(ValidationResult::advisory(warnings));
        }

        if new_kind == TaskKind::Unbinding
            && self.find_upstream_binding_tasks(model, task).is_empty()
        {
            warnings.push(ValidationWarning {
                kind: WarningKind::MissingUpstreamBinding,
                severity: Severity::Warning,
                message: format!(
                    "No Binding task precedes '{}' in its pool; nothing will be unbound",
                    element.label()
                ),
                affected_tasks: vec![task.to_string()],
            });
        }

        if current == TaskKind::Binding {
            let dependents = self.find_dependent_unbinding_tasks(model, task);
            if !dependents.is_empty() {
                warnings.push(ValidationWarning {
                    kind: WarningKind::OrphanedUnbinding,
                    severity: Severity::Warning,
                    message: format!(
                        "'{}' will no longer be a Binding task; these Unbinding tasks depend on it: {}",
                        element.label(),
                        self.preview(model, &dependents)
                    ),
                    affected_tasks: dependents.into_iter().collect(),
                });
            }
        }

        Ok(ValidationResult::advisory(warnings))
    }

    /// Informational note listing the Unbinding tasks a Binding task feeds
    pub fn dependents_note<M: DiagramModel>(
        &self,
        model: &M,
        task: &str,
    ) -> Result<Option<ValidationWarning>> {
        let element = model.task(task)?;
        if element.metadata.task_kind() != TaskKind::Binding {
            return Ok(None);
        }
        let dependents = self.find_dependent_unbinding_tasks(model, task);
        if dependents.is_empty() {
            return Ok(None);
        }
        Ok(Some(ValidationWarning {
            kind: WarningKind::DependentUnbindings,
            severity: Severity::Info,
            message: format!(
                "Unbinding tasks depending on '{}': {}",
                element.label(),
                self.preview(model, &dependents)
            ),
            affected_tasks: dependents.into_iter().collect(),
        }))
    }

    /// Comma-separated task names, cut off after the preview limit
    fn preview<M: DiagramModel>(&self, model: &M, tasks: &BTreeSet<ElementId>) -> String {
        let mut names: Vec<&str> = tasks
            .iter()
            .take(self.preview_limit)
            .map(|id| model.element(id).map_or(id.as_str(), |e| e.label()))
            .collect();
        if tasks.len() > self.preview_limit {
            names.push(text::ELLIPSIS);
        }
        names.join(", ")
    }
}

impl Default for GraphValidator {
    fn default() -> Self {
        Self::new(defaults::ORPHAN_PREVIEW_LIMIT)
    }
}

/// Depth-first walk along sequence flows, restricted to the start task's
/// pool, collecting tasks of `wanted` kind
fn collect_reachable<M: DiagramModel>(
    model: &M,
    start: &str,
    direction: Direction,
    wanted: TaskKind,
) -> BTreeSet<ElementId> {
    let mut found = BTreeSet::new();
    let Some(pool) = model.pool_of_process_member(start) else {
        log::debug!("Task '{}' is not inside a pool; skipping traversal", start);
        return found;
    };
    let process = pool.process_ref.clone();
    let in_pool = |id: &str| {
        model
            .element(id)
            .is_some_and(|e| e.element_type.is_flow_node() && e.process == process)
    };

    let mut visited: HashSet<ElementId> = HashSet::new();
    visited.insert(start.to_string());
    let mut stack = vec![start.to_string()];

    while let Some(node) = stack.pop() {
        if node != start && model.kind_of(&node) == wanted {
            found.insert(node.clone());
        }
        let neighbours = match direction {
            Direction::Backward => model.sequence_predecessors(&node),
            Direction::Forward => model.sequence_successors(&node),
        };
        for next in neighbours {
            if in_pool(&next) && visited.insert(next.clone()) {
                stack.push(next);
            }
        }
    }
    found
}
