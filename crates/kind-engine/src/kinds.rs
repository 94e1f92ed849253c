//! Task-kind state machine
//!
//! A task moves between the four [`TaskKind`] states only through
//! [`KindMachine`]. Each transition is one atomic metadata update that
//!
//! 1. writes the new kind,
//! 2. drops every attribute outside the new kind's allow-list,
//! 3. seeds kind-specific defaults (Movement destination, Binding placeholder),
//!
//! after which the transition hooks run and subscribers get an
//! `ElementsChanged` event. Assignment rows are edited through the same
//! machine so the notification contract holds for them too.

use crate::diagram::DiagramModel;
use crate::error::{KindEngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::metadata::{Assignment, AssignmentId, Attribute, AttributeKind, MetadataUpdate};
use crate::types::{ElementId, TaskKind};

/// Attributes a task of the given kind may carry
pub fn allowed_attributes(kind: TaskKind) -> &'static [AttributeKind] {
    match kind {
        TaskKind::None => &[AttributeKind::Assignment],
        TaskKind::Movement => &[
            AttributeKind::TaskType,
            AttributeKind::Destination,
            AttributeKind::Assignment,
        ],
        TaskKind::Binding => &[
            AttributeKind::TaskType,
            AttributeKind::Binding,
            AttributeKind::Assignment,
        ],
        TaskKind::Unbinding => &[AttributeKind::TaskType, AttributeKind::Assignment],
    }
}

/// A completed kind change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub task: ElementId,
    pub from: TaskKind,
    pub to: TaskKind,
}

impl Transition {
    /// Whether the task was not `kind` before and is now
    pub fn enters(&self, kind: TaskKind) -> bool {
        self.from != kind && self.to == kind
    }

    /// Whether the task was `kind` before and no longer is
    pub fn leaves(&self, kind: TaskKind) -> bool {
        self.from == kind && self.to != kind
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Side effects attached to kind transitions
///
/// The four callbacks are checked independently: a Binding → Movement
/// change fires both `on_leave_binding` and `on_enter_movement`.
pub trait TransitionHook: Send + Sync {
    fn on_enter_binding(&self, _transition: &Transition) {}
    fn on_leave_binding(&self, _transition: &Transition) {}
    fn on_enter_movement(&self, _transition: &Transition) {}
    fn on_leave_movement(&self, _transition: &Transition) {}
}

/// Hook that records transitions in the log
pub struct LoggingHook;

impl TransitionHook for LoggingHook {
    fn on_enter_binding(&self, t: &Transition) {
        log::debug!("Task '{}' entered Binding (was {})", t.task, t.from);
    }

    fn on_leave_binding(&self, t: &Transition) {
        log::debug!("Task '{}' left Binding (now {})", t.task, t.to);
    }

    fn on_enter_movement(&self, t: &Transition) {
        log::debug!("Task '{}' entered Movement (was {})", t.task, t.from);
    }

    fn on_leave_movement(&self, t: &Transition) {
        log::debug!("Task '{}' left Movement (now {})", t.task, t.to);
    }
}

/// Run every hook whose condition holds for the transition
fn dispatch(hooks: &[Box<dyn TransitionHook>], transition: &Transition) {
    for hook in hooks {
        if transition.leaves(TaskKind::Binding) {
            hook.on_leave_binding(transition);
        }
        if transition.enters(TaskKind::Binding) {
            hook.on_enter_binding(transition);
        }
        if transition.enters(TaskKind::Movement) {
            hook.on_enter_movement(transition);
        }
        if transition.leaves(TaskKind::Movement) {
            hook.on_leave_movement(transition);
        }
    }
}

fn notify(sink: &dyn EventSink, task: &str) {
    if let Err(e) = sink.send(EngineEvent::element_changed(task)) {
        log::warn!("Dropped change event for task '{}': {}", task, e);
    }
}

/// The task-kind state machine
pub struct KindMachine {
    default_destination: Option<String>,
    hooks: Vec<Box<dyn TransitionHook>>,
}

impl KindMachine {
    /// Create a machine with the logging hook installed
    pub fn new(default_destination: Option<String>) -> Self {
        Self {
            default_destination,
            hooks: vec![Box::new(LoggingHook)],
        }
    }

    /// Register an additional transition hook
    pub fn add_hook(&mut self, hook: Box<dyn TransitionHook>) {
        self.hooks.push(hook);
    }

    pub fn default_destination(&self) -> Option<&str> {
        self.default_destination.as_deref()
    }

    /// Current kind of a task
    pub fn kind<M: DiagramModel>(&self, model: &M, task: &str) -> Result<TaskKind> {
        Ok(model.task(task)?.metadata.task_kind())
    }

    /// Set a task's kind from its key
    ///
    /// Unknown keys fail with a configuration error before the model is
    /// touched.
    pub fn set_kind<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        kind: &str,
    ) -> Result<Transition> {
        let kind: TaskKind = kind.parse()?;
        self.apply(model, sink, task, kind)
    }

    /// Remove the kind and every kind-dependent attribute
    pub fn clear_kind<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
    ) -> Result<Transition> {
        self.apply(model, sink, task, TaskKind::None)
    }

    /// Move a task to `kind`
    pub fn apply<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        kind: TaskKind,
    ) -> Result<Transition> {
        let element = model.task(task)?;
        let metadata = &element.metadata;
        let from = metadata.task_kind();
        let allowed = allowed_attributes(kind);

        let stale = metadata
            .entries()
            .iter()
            .map(Attribute::kind)
            .filter(|k| !allowed.contains(k));
        let mut update = MetadataUpdate::new().remove_all(stale);

        if !kind.is_none() {
            update = update.set(Attribute::TaskType(kind));
        }
        match kind {
            TaskKind::Movement if metadata.destination().is_none() => {
                if let Some(place) = &self.default_destination {
                    update = update.set(Attribute::Destination(place.clone()));
                }
            }
            TaskKind::Binding if !metadata.contains(AttributeKind::Binding) => {
                update = update.set(Attribute::Binding {
                    reference: String::new(),
                });
            }
            _ => {}
        }

        model.update_metadata(task, update)?;

        let transition = Transition {
            task: task.to_string(),
            from,
            to: kind,
        };
        dispatch(&self.hooks, &transition);
        notify(sink, task);
        Ok(transition)
    }

    /// Set the destination of a Movement task
    pub fn set_destination<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        place: &str,
    ) -> Result<()> {
        self.write_kind_attribute(model, sink, task, Attribute::Destination(place.to_string()))
    }

    /// Set the binding reference of a Binding task
    pub fn set_binding_reference<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        reference: &str,
    ) -> Result<()> {
        let attribute = Attribute::Binding {
            reference: reference.to_string(),
        };
        self.write_kind_attribute(model, sink, task, attribute)
    }

    fn write_kind_attribute<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        attribute: Attribute,
    ) -> Result<()> {
        let kind = model.task(task)?.metadata.task_kind();
        if !allowed_attributes(kind).contains(&attribute.kind()) {
            return Err(KindEngineError::AttributeNotAllowed {
                task: task.to_string(),
                attribute: attribute.kind().key().to_string(),
                kind: kind.to_string(),
            });
        }
        if model.update_metadata(task, MetadataUpdate::new().set(attribute))? {
            notify(sink, task);
        }
        Ok(())
    }

    /// Assignments of a task in creation order
    pub fn assignments<M: DiagramModel>(&self, model: &M, task: &str) -> Result<Vec<Assignment>> {
        Ok(model.task(task)?.metadata.assignments().cloned().collect())
    }

    /// Append an assignment row; returns its stable id
    pub fn add_assignment<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        condition: &str,
        value: &str,
    ) -> Result<AssignmentId> {
        model.task(task)?;
        let assignment = Assignment::new(condition, value);
        let id = assignment.id.clone();
        model.update_metadata(task, MetadataUpdate::new().set(Attribute::Assignment(assignment)))?;
        notify(sink, task);
        Ok(id)
    }

    /// Rewrite the condition and/or value of one row
    pub fn update_assignment<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        id: &AssignmentId,
        condition: Option<&str>,
        value: Option<&str>,
    ) -> Result<()> {
        let mut assignment = self.find_assignment(model, task, id)?;
        if let Some(condition) = condition {
            assignment.condition = condition.to_string();
        }
        if let Some(value) = value {
            assignment.value = value.to_string();
        }
        if model.update_metadata(task, MetadataUpdate::new().set(Attribute::Assignment(assignment)))? {
            notify(sink, task);
        }
        Ok(())
    }

    /// Remove a row by id
    pub fn remove_assignment<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        id: &AssignmentId,
    ) -> Result<Assignment> {
        let assignment = self.find_assignment(model, task, id)?;
        model.update_metadata(task, MetadataUpdate::new().remove_assignment(id.clone()))?;
        notify(sink, task);
        Ok(assignment)
    }

    /// Remove the row currently displayed at `index`; later rows move up
    pub fn remove_assignment_at<M: DiagramModel>(
        &self,
        model: &mut M,
        sink: &dyn EventSink,
        task: &str,
        index: usize,
    ) -> Result<Assignment> {
        let id = model
            .task(task)?
            .metadata
            .assignments()
            .nth(index)
            .map(|a| a.id.clone())
            .ok_or_else(|| KindEngineError::UnknownAssignment {
                task: task.to_string(),
                assignment: format!("#{}", index),
            })?;
        self.remove_assignment(model, sink, task, &id)
    }

    fn find_assignment<M: DiagramModel>(
        &self,
        model: &M,
        task: &str,
        id: &AssignmentId,
    ) -> Result<Assignment> {
        model
            .task(task)?
            .metadata
            .assignments()
            .find(|a| &a.id == id)
            .cloned()
            .ok_or_else(|| KindEngineError::UnknownAssignment {
                task: task.to_string(),
                assignment: id.to_string(),
            })
    }
}

impl Default for KindMachine {
    fn default() -> Self {
        Self::new(None)
    }
}
