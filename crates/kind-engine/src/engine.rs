//! The kind engine
//!
//! [`KindEngine`] wires the state machine, the classifier, the validator
//! and the scheduler to one host diagram. The host (or the async driver)
//! feeds it notifications and calls [`KindEngine::tick`]; everything
//! else is plain synchronous calls.
//!
//! # Flow
//!
//! - a kind change writes task metadata, which the host reports back as
//!   `ElementChanged` for the task
//! - that schedules every message flow attached to the task
//! - once the debounce elapses, `tick` reconciles each flow; the echo of
//!   the flow's own write lands in its cooldown and is dropped
//! - a task change arriving during that cooldown is deferred, not dropped,
//!   and reconciled once the cooldown ends

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::classifier::{classify, Classifier, ReconcileOutcome};
use crate::config::EngineConfig;
use crate::diagram::DiagramModel;
use crate::error::{KindEngineError, Result};
use crate::events::{DiagramEvent, EngineEvent, EventSink, NullEventSink};
use crate::kinds::{KindMachine, Transition, TransitionHook};
use crate::metadata::{Assignment, AssignmentId};
use crate::scheduler::{ChangeScheduler, Clock, SystemClock, Trigger};
use crate::types::{Classification, ElementId, TaskKind};
use crate::validation::{GraphValidator, ValidationResult, ValidationWarning};

/// What one batch of reconciliations did
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Connections reconciled, with their outcome
    pub outcomes: Vec<(ElementId, ReconcileOutcome)>,
    /// Connections whose reconciliation failed; retried on the next
    /// relevant notification
    pub failures: Vec<(ElementId, KindEngineError)>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty() && self.failures.is_empty()
    }

    /// Outcome recorded for a connection, if it was reconciled
    pub fn outcome(&self, connection: &str) -> Option<ReconcileOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == connection)
            .map(|(_, outcome)| *outcome)
    }

    /// Number of reconciliations that rewrote metadata
    pub fn writes(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o != ReconcileOutcome::Unchanged)
            .count()
    }
}

/// Kind engine bound to one diagram
pub struct KindEngine<M> {
    model: M,
    config: EngineConfig,
    machine: KindMachine,
    classifier: Classifier,
    validator: GraphValidator,
    scheduler: ChangeScheduler,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl<M: DiagramModel> KindEngine<M> {
    /// Create an engine using the wall clock and discarding events
    pub fn new(model: M, config: EngineConfig) -> Self {
        Self {
            machine: KindMachine::new(config.default_destination.clone()),
            classifier: Classifier::new(config.max_parent_depth),
            validator: GraphValidator::new(config.orphan_preview_limit),
            scheduler: ChangeScheduler::new(config.timer_policy, config.debounce(), config.cooldown()),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullEventSink),
            model,
            config,
        }
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send engine events to `sink`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Register a transition hook
    pub fn add_hook(&mut self, hook: Box<dyn TransitionHook>) {
        self.machine.add_hook(hook);
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Host-side access to the diagram
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &ChangeScheduler {
        &self.scheduler
    }

    /// React to one host notification
    pub fn handle(&mut self, event: DiagramEvent) {
        let now = self.clock.now();
        match event {
            DiagramEvent::ConnectionCreated { connection } => {
                if self.is_message_flow(&connection) {
                    self.scheduler.schedule(&connection, Trigger::Change, now);
                }
            }
            DiagramEvent::ConnectionReconnected { connection } => {
                if self.is_message_flow(&connection) {
                    self.scheduler.schedule(&connection, Trigger::Forced, now);
                }
            }
            DiagramEvent::ImportDone => {
                let flows = self.model.message_flow_ids();
                log::info!("Import finished; scheduling {} message flows", flows.len());
                for flow in flows {
                    self.scheduler.schedule(&flow, Trigger::Change, now);
                }
            }
            DiagramEvent::ElementChanged { element } => {
                let Some(changed) = self.model.element(&element) else {
                    return;
                };
                if changed.is_task() {
                    for flow in self.model.attached_message_flows(&element) {
                        self.scheduler.schedule(&flow, Trigger::Change, now);
                    }
                } else if changed.is_message_flow() {
                    self.scheduler.schedule(&element, Trigger::Echo, now);
                }
            }
            DiagramEvent::ElementRemoved { element } => {
                self.scheduler.forget(&element);
            }
        }
    }

    /// Handle every notification the host model has queued
    pub fn drain_notifications(&mut self) {
        for event in self.model.take_notifications() {
            self.handle(event);
        }
    }

    /// Reconcile every connection whose debounce elapsed
    ///
    /// A failure on one connection is logged and reported; it never stops
    /// the others.
    pub fn run_due(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for due in self.scheduler.take_due(self.clock.now()) {
            let result = self
                .classifier
                .reconcile(&mut self.model, &due.connection, due.forced);
            let wrote = matches!(&result, Ok(o) if *o != ReconcileOutcome::Unchanged);
            self.scheduler.finish(&due.connection, wrote, self.clock.now());

            match result {
                Ok(outcome) => {
                    if outcome != ReconcileOutcome::Unchanged {
                        let classification = match outcome {
                            ReconcileOutcome::Classified(c) => c,
                            _ => Classification::None,
                        };
                        self.emit(EngineEvent::ConnectionReconciled {
                            connection: due.connection.clone(),
                            classification,
                        });
                        self.emit(EngineEvent::element_changed(&due.connection));
                    }
                    report.outcomes.push((due.connection, outcome));
                }
                Err(KindEngineError::UnknownElement(_)) => {
                    log::debug!("Connection '{}' vanished before reconciliation", due.connection);
                    self.scheduler.forget(&due.connection);
                }
                Err(e) => {
                    log::warn!("Failed to reconcile connection '{}': {}", due.connection, e);
                    self.emit(EngineEvent::ReconcileFailed {
                        connection: due.connection.clone(),
                        error: e.to_string(),
                    });
                    report.failures.push((due.connection, e));
                }
            }
        }
        report
    }

    /// Drain notifications, run due reconciliations, then drain again so
    /// the echoes of this batch's writes meet the loop guard
    pub fn tick(&mut self) -> ReconcileReport {
        self.drain_notifications();
        let report = self.run_due();
        self.drain_notifications();
        report
    }

    /// When `tick` next has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Current kind of a task
    pub fn kind(&self, task: &str) -> Result<TaskKind> {
        self.machine.kind(&self.model, task)
    }

    /// Change a task's kind from its key
    pub fn set_kind(&mut self, task: &str, kind: &str) -> Result<Transition> {
        self.machine.set_kind(&mut self.model, &*self.sink, task, kind)
    }

    /// Remove a task's kind
    pub fn clear_kind(&mut self, task: &str) -> Result<Transition> {
        self.machine.clear_kind(&mut self.model, &*self.sink, task)
    }

    pub fn set_destination(&mut self, task: &str, place: &str) -> Result<()> {
        self.machine
            .set_destination(&mut self.model, &*self.sink, task, place)
    }

    pub fn set_binding_reference(&mut self, task: &str, reference: &str) -> Result<()> {
        self.machine
            .set_binding_reference(&mut self.model, &*self.sink, task, reference)
    }

    pub fn assignments(&self, task: &str) -> Result<Vec<Assignment>> {
        self.machine.assignments(&self.model, task)
    }

    pub fn add_assignment(&mut self, task: &str, condition: &str, value: &str) -> Result<AssignmentId> {
        self.machine
            .add_assignment(&mut self.model, &*self.sink, task, condition, value)
    }

    pub fn update_assignment(
        &mut self,
        task: &str,
        id: &AssignmentId,
        condition: Option<&str>,
        value: Option<&str>,
    ) -> Result<()> {
        self.machine
            .update_assignment(&mut self.model, &*self.sink, task, id, condition, value)
    }

    pub fn remove_assignment(&mut self, task: &str, id: &AssignmentId) -> Result<Assignment> {
        self.machine
            .remove_assignment(&mut self.model, &*self.sink, task, id)
    }

    pub fn remove_assignment_at(&mut self, task: &str, index: usize) -> Result<Assignment> {
        self.machine
            .remove_assignment_at(&mut self.model, &*self.sink, task, index)
    }

    /// Advise on changing a task's kind; unknown kind keys are rejected
    pub fn validate_kind_change(&self, task: &str, kind: &str) -> Result<ValidationResult> {
        let kind: TaskKind = kind.parse()?;
        self.validator.validate_kind_change(&self.model, task, kind)
    }

    /// Informational list of Unbinding tasks fed by a Binding task
    pub fn dependents_note(&self, task: &str) -> Result<Option<ValidationWarning>> {
        self.validator.dependents_note(&self.model, task)
    }

    pub fn upstream_binding_tasks(&self, task: &str) -> BTreeSet<ElementId> {
        self.validator.find_upstream_binding_tasks(&self.model, task)
    }

    pub fn dependent_unbinding_tasks(&self, task: &str) -> BTreeSet<ElementId> {
        self.validator
            .find_dependent_unbinding_tasks(&self.model, task)
    }

    /// Classification a connection should have right now
    pub fn classify(&self, connection: &str) -> Result<Classification> {
        let element = self
            .model
            .element(connection)
            .ok_or_else(|| KindEngineError::UnknownElement(connection.to_string()))?;
        Ok(classify(&self.model, element))
    }

    fn is_message_flow(&self, id: &str) -> bool {
        self.model.element(id).is_some_and(|e| e.is_message_flow())
    }

    fn emit(&self, event: EngineEvent) {
        if let Err(e) = self.sink.send(event) {
            log::warn!("Dropped engine event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::builder::DiagramBuilder;
    use crate::diagram::Diagram;
    use crate::events::VecEventSink;
    use crate::scheduler::{ManualClock, MarkerState};

    fn engine_with(diagram: Diagram) -> (KindEngine<Diagram>, Arc<ManualClock>, Arc<VecEventSink>) {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(VecEventSink::new());
        let engine = KindEngine::new(diagram, EngineConfig::default())
            .with_clock(clock.clone())
            .with_event_sink(sink.clone());
        (engine, clock, sink)
    }

    fn settle(engine: &mut KindEngine<Diagram>, clock: &ManualClock) -> ReconcileReport {
        let mut report = engine.tick();
        clock.advance(engine.config().debounce());
        let later = engine.tick();
        report.outcomes.extend(later.outcomes);
        report.failures.extend(later.failures);
        report
    }

    fn two_tasks() -> Diagram {
        DiagramBuilder::new("d")
            .add_pool("px", "X")
            .add_task("x", "X")
            .add_pool("py", "Y")
            .add_task("y", "Y")
            .add_message_flow("mf", "x", "y")
            .build()
    }

    #[test]
    fn test_kind_change_reclassifies_attached_flow() {
        let (mut engine, clock, sink) = engine_with(two_tasks());
        engine.set_kind("x", "Binding").unwrap();
        engine.set_kind("y", "Binding").unwrap();

        let report = settle(&mut engine, &clock);
        assert_eq!(
            report.outcome("mf"),
            Some(ReconcileOutcome::Classified(Classification::Binding))
        );
        assert!(sink.events().contains(&EngineEvent::ConnectionReconciled {
            connection: "mf".to_string(),
            classification: Classification::Binding,
        }));
    }

    #[test]
    fn test_own_write_echo_is_absorbed() {
        let (mut engine, clock, _) = engine_with(two_tasks());
        engine.set_kind("x", "Binding").unwrap();
        engine.set_kind("y", "Binding").unwrap();
        settle(&mut engine, &clock);

        // the write's ElementChanged was drained inside the cooldown
        assert_eq!(engine.scheduler().state("mf"), MarkerState::Cooldown);
        assert_eq!(engine.scheduler().pending(), 0);
        assert_eq!(engine.scheduler().deferred(), 0);

        clock.advance(engine.config().cooldown());
        let report = engine.tick();
        assert!(report.is_empty());
        assert_eq!(engine.scheduler().state("mf"), MarkerState::Idle);
    }

    #[test]
    fn test_unchanged_reconcile_skips_cooldown() {
        let (mut engine, clock, _) = engine_with(two_tasks());
        engine.set_kind("x", "Binding").unwrap();

        let report = settle(&mut engine, &clock);
        assert_eq!(report.outcome("mf"), Some(ReconcileOutcome::Unchanged));
        assert_eq!(engine.scheduler().state("mf"), MarkerState::Idle);

        clock.advance(Duration::from_millis(20));
        engine.set_kind("y", "Binding").unwrap();
        let report = settle(&mut engine, &clock);
        assert_eq!(
            report.outcome("mf"),
            Some(ReconcileOutcome::Classified(Classification::Binding))
        );
    }

    #[test]
    fn test_task_change_during_cooldown_is_deferred() {
        let (mut engine, clock, _) = engine_with(two_tasks());
        engine.set_kind("x", "Binding").unwrap();
        engine.set_kind("y", "Binding").unwrap();
        settle(&mut engine, &clock);
        assert_eq!(engine.scheduler().state("mf"), MarkerState::Cooldown);

        clock.advance(Duration::from_millis(20));
        engine.clear_kind("y").unwrap();
        assert!(engine.tick().is_empty());
        assert_eq!(engine.scheduler().deferred(), 1);

        clock.advance(engine.config().cooldown());
        assert!(engine.tick().is_empty());
        assert_eq!(
            engine.scheduler().state("mf"),
            MarkerState::Scheduled { forced: false }
        );

        clock.advance(engine.config().debounce());
        let report = engine.tick();
        assert_eq!(report.outcome("mf"), Some(ReconcileOutcome::Cleared));
    }

    #[test]
    fn test_import_schedules_every_message_flow() {
        let diagram = DiagramBuilder::new("d")
            .add_pool("px", "X")
            .add_task("x", "X")
            .with_kind(TaskKind::Unbinding)
            .add_pool("py", "Y")
            .add_task("y", "Y")
            .with_kind(TaskKind::Unbinding)
            .add_task("z", "Z")
            .add_message_flow("mf1", "x", "y")
            .add_message_flow("mf2", "x", "z")
            .build();
        let (mut engine, clock, _) = engine_with(diagram);
        engine.handle(DiagramEvent::ImportDone);
        assert_eq!(engine.scheduler().pending(), 2);

        let report = settle(&mut engine, &clock);
        assert_eq!(
            report.outcome("mf1"),
            Some(ReconcileOutcome::Classified(Classification::Unbinding))
        );
        assert_eq!(report.outcome("mf2"), Some(ReconcileOutcome::Unchanged));
    }

    #[test]
    fn test_created_sequence_flow_is_ignored() {
        let diagram = DiagramBuilder::new("d")
            .add_pool("p", "P")
            .add_task("a", "A")
            .add_task("b", "B")
            .add_sequence_flow("a", "b")
            .build();
        let (mut engine, _, _) = engine_with(diagram);
        engine.handle(DiagramEvent::ConnectionCreated {
            connection: "flow-1".to_string(),
        });
        assert!(engine.scheduler().is_idle());
    }

    #[test]
    fn test_failure_is_reported_not_propagated() {
        let mut diagram = two_tasks();
        diagram.element_mut("y").unwrap().parent = None;
        let (mut engine, clock, sink) = engine_with(diagram);
        engine.set_kind("x", "Binding").unwrap();
        engine.set_kind("y", "Binding").unwrap();

        let report = settle(&mut engine, &clock);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].1, KindEngineError::Resolution { .. }));
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, EngineEvent::ReconcileFailed { .. })));
    }

    #[test]
    fn test_removed_connection_is_forgotten() {
        let (mut engine, _, _) = engine_with(two_tasks());
        engine.handle(DiagramEvent::ConnectionCreated {
            connection: "mf".to_string(),
        });
        engine.model_mut().remove("mf");
        engine.tick();
        assert!(engine.scheduler().is_idle());
    }

    #[test]
    fn test_validate_rejects_unknown_kind() {
        let (engine, _, _) = engine_with(two_tasks());
        assert!(engine
            .validate_kind_change("x", "teleport")
            .unwrap_err()
            .is_configuration());
    }
}
