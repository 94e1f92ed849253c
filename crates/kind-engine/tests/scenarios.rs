//! End-to-end behaviour of the kind engine against an in-memory diagram

use std::sync::Arc;
use std::time::Duration;

use kind_engine::{
    Classification, Diagram, DiagramBuilder, DiagramElement, DiagramEvent, DiagramModel,
    EngineConfig, KindEngine, KindEngineError, ManualClock, MarkerState, MetadataUpdate,
    ReconcileOutcome, ReconcileReport, TaskKind, WarningKind,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine_for<M: DiagramModel>(model: M) -> (KindEngine<M>, Arc<ManualClock>) {
    init_logging();
    let clock = Arc::new(ManualClock::new());
    let engine = KindEngine::new(model, EngineConfig::default()).with_clock(clock.clone());
    (engine, clock)
}

/// Run ticks until every connection is idle again, advancing one debounce
/// at a time
fn settle<M: DiagramModel>(engine: &mut KindEngine<M>, clock: &ManualClock) -> ReconcileReport {
    let mut report = engine.tick();
    while !engine.scheduler().is_idle() {
        clock.advance(engine.config().debounce());
        let next = engine.tick();
        report.outcomes.extend(next.outcomes);
        report.failures.extend(next.failures);
    }
    report
}

/// Tick every 10ms for `span`, the way a host timer would
fn run_for<M: DiagramModel>(
    engine: &mut KindEngine<M>,
    clock: &ManualClock,
    span: Duration,
) -> ReconcileReport {
    let step = Duration::from_millis(10);
    let mut report = ReconcileReport::default();
    let mut elapsed = Duration::ZERO;
    while elapsed < span {
        clock.advance(step);
        elapsed += step;
        let next = engine.tick();
        report.outcomes.extend(next.outcomes);
        report.failures.extend(next.failures);
    }
    report
}

fn reconciliations_of(report: &ReconcileReport, connection: &str) -> usize {
    report
        .outcomes
        .iter()
        .filter(|(id, _)| id == connection)
        .count()
}

fn pools_with_unkinded_tasks() -> Diagram {
    DiagramBuilder::new("cell")
        .add_pool("robot", "Robot")
        .add_task("x", "Grip part")
        .add_pool("station", "Station")
        .add_lane("fixture", "Fixture")
        .add_task("y", "Clamp part")
        .build()
}

/// Pool P with A -> B -> C; A binds, C unbinds
fn binding_chain() -> Diagram {
    DiagramBuilder::new("line")
        .add_pool("p", "P")
        .add_task("a", "Pick")
        .with_kind(TaskKind::Binding)
        .add_task("b", "Move")
        .add_task("c", "Place")
        .with_kind(TaskKind::Unbinding)
        .add_sequence_flow("a", "b")
        .add_sequence_flow("b", "c")
        .build()
}

fn message_flow(id: &str, source: &str, target: &str) -> DiagramElement {
    let mut flow = DiagramElement::new(id, kind_engine::ElementType::MessageFlow);
    flow.source = Some(source.to_string());
    flow.target = Some(target.to_string());
    flow
}

#[test]
fn classify_then_unclassify() {
    let (mut engine, clock) = engine_for(pools_with_unkinded_tasks());
    engine.set_kind("x", "Binding").unwrap();
    engine.set_kind("y", "Binding").unwrap();
    engine.model_mut().connect(message_flow("mf", "x", "y"));

    let report = settle(&mut engine, &clock);
    assert_eq!(
        report.outcome("mf"),
        Some(ReconcileOutcome::Classified(Classification::Binding))
    );
    let flow = engine.model().element("mf").unwrap();
    assert_eq!(flow.metadata.classification(), Classification::Binding);
    assert_eq!(flow.metadata.source_participant(), Some("robot"));
    assert_eq!(flow.metadata.target_participant(), Some("station"));

    engine.clear_kind("y").unwrap();
    let report = settle(&mut engine, &clock);
    assert_eq!(report.outcome("mf"), Some(ReconcileOutcome::Cleared));
    assert!(engine.model().element("mf").unwrap().metadata.is_empty());
}

#[test]
fn classification_follows_both_endpoints() {
    let (mut engine, clock) = engine_for(pools_with_unkinded_tasks());
    engine.model_mut().connect(message_flow("mf", "x", "y"));
    settle(&mut engine, &clock);

    let cases = [
        ("Binding", "Binding", Classification::Binding),
        ("Unbinding", "Unbinding", Classification::Unbinding),
        ("Binding", "Unbinding", Classification::None),
        ("Movement", "Movement", Classification::None),
        ("Unbinding", "Binding", Classification::None),
    ];
    for (source, target, expected) in cases {
        engine.set_kind("x", source).unwrap();
        engine.set_kind("y", target).unwrap();
        settle(&mut engine, &clock);

        let stored = engine.model().element("mf").unwrap().metadata.classification();
        assert_eq!(stored, expected, "{} -> {}", source, target);
        assert_eq!(engine.classify("mf").unwrap(), expected);
    }
}

#[test]
fn assignment_rows_shift_up_on_removal() {
    let (mut engine, _) = engine_for(binding_chain());
    let first = engine.add_assignment("b", "p.x>5", "p.y=0").unwrap();
    let second = engine.add_assignment("b", "p.x<0", "p.y=1").unwrap();
    assert_ne!(first, second);

    let removed = engine.remove_assignment_at("b", 0).unwrap();
    assert_eq!(removed.condition, "p.x>5");

    let rows = engine.assignments("b").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, second);
    assert_eq!(rows[0].condition, "p.x<0");
    assert_eq!(rows[0].value, "p.y=1");
}

/// Behaviour change from index-paired condition/value lists: rows are
/// addressed by stable id, so removing one row never redirects an edit
/// aimed at another.
#[test]
fn assignment_ids_survive_edits_to_other_rows() {
    let (mut engine, _) = engine_for(binding_chain());
    let first = engine.add_assignment("b", "p.x>5", "p.y=0").unwrap();
    let second = engine.add_assignment("b", "p.x<0", "p.y=1").unwrap();

    engine
        .update_assignment("b", &second, None, Some("p.y=2"))
        .unwrap();
    engine.remove_assignment("b", &first).unwrap();

    // updating by id still hits the row that moved to index 0
    engine
        .update_assignment("b", &second, Some("p.x<1"), None)
        .unwrap();
    let rows = engine.assignments("b").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].condition, "p.x<1");
    assert_eq!(rows[0].value, "p.y=2");

    let err = engine.remove_assignment("b", &first).unwrap_err();
    assert!(matches!(err, KindEngineError::UnknownAssignment { .. }));
}

#[test]
fn unknown_kind_leaves_task_untouched() {
    let (mut engine, _) = engine_for(binding_chain());
    let updates_before = engine.model().updates_applied();

    let err = engine.set_kind("a", "teleport").unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(engine.kind("a").unwrap(), TaskKind::Binding);
    assert_eq!(engine.model().updates_applied(), updates_before);
}

#[test]
fn upstream_search_finds_binding_task() {
    let (engine, _) = engine_for(binding_chain());
    let upstream = engine.upstream_binding_tasks("c");
    assert_eq!(upstream.into_iter().collect::<Vec<_>>(), vec!["a"]);

    let dependents = engine.dependent_unbinding_tasks("a");
    assert_eq!(dependents.into_iter().collect::<Vec<_>>(), vec!["c"]);
}

#[test]
fn orphaned_unbinding_is_reported() {
    let (engine, _) = engine_for(binding_chain());
    let result = engine.validate_kind_change("a", "Movement").unwrap();
    assert!(result.valid);

    let warning = result
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::OrphanedUnbinding)
        .unwrap();
    assert!(warning.affected_tasks.contains(&"c".to_string()));
    assert!(warning.message.contains("Place"));
}

#[test]
fn unbinding_without_upstream_binding_is_reported() {
    let (engine, _) = engine_for(binding_chain());
    // b sits after a, so it is covered
    assert!(!engine
        .validate_kind_change("b", "Unbinding")
        .unwrap()
        .has_warnings());
    // a has nothing before it
    let result = engine.validate_kind_change("a", "Unbinding").unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::MissingUpstreamBinding));
}

#[test]
fn reconciling_consistent_connection_writes_nothing() {
    let (mut engine, clock) = engine_for(pools_with_unkinded_tasks());
    engine.set_kind("x", "Unbinding").unwrap();
    engine.set_kind("y", "Unbinding").unwrap();
    engine.model_mut().connect(message_flow("mf", "x", "y"));
    settle(&mut engine, &clock);

    let writes_before = engine.model().updates_applied();
    engine.handle(DiagramEvent::ImportDone);
    let report = settle(&mut engine, &clock);

    assert_eq!(report.outcome("mf"), Some(ReconcileOutcome::Unchanged));
    assert_eq!(report.writes(), 0);
    assert_eq!(engine.model().updates_applied(), writes_before);
}

#[test]
fn own_write_does_not_trigger_second_reconciliation() {
    let (mut engine, clock) = engine_for(pools_with_unkinded_tasks());
    engine.set_kind("x", "Binding").unwrap();
    engine.set_kind("y", "Binding").unwrap();
    engine.model_mut().connect(message_flow("mf", "x", "y"));

    let mut report = engine.tick();
    clock.advance(engine.config().debounce());
    report.outcomes.extend(engine.tick().outcomes);
    assert_eq!(engine.scheduler().state("mf"), MarkerState::Cooldown);
    assert_eq!(engine.scheduler().deferred(), 0);

    let rest = run_for(&mut engine, &clock, Duration::from_millis(500));
    assert!(rest.is_empty());
    assert_eq!(reconciliations_of(&report, "mf"), 1);
    assert!(engine.scheduler().is_idle());
}

#[test]
fn change_after_unchanged_reconcile_is_applied() {
    let (mut engine, clock) = engine_for(pools_with_unkinded_tasks());
    engine.set_kind("x", "Binding").unwrap();
    engine.model_mut().connect(message_flow("mf", "x", "y"));
    engine.tick();
    clock.advance(engine.config().debounce());
    let report = engine.tick();
    assert_eq!(report.outcome("mf"), Some(ReconcileOutcome::Unchanged));
    // nothing was written, so nothing can echo back
    assert_eq!(engine.scheduler().state("mf"), MarkerState::Idle);

    clock.advance(Duration::from_millis(20));
    engine.set_kind("y", "Binding").unwrap();
    run_for(&mut engine, &clock, Duration::from_millis(200));

    let stored = engine.model().element("mf").unwrap().metadata.classification();
    assert_eq!(stored, Classification::Binding);
    assert_eq!(stored, engine.classify("mf").unwrap());
}

#[test]
fn kind_change_during_cooldown_is_deferred() {
    let (mut engine, clock) = engine_for(pools_with_unkinded_tasks());
    engine.set_kind("x", "Binding").unwrap();
    engine.set_kind("y", "Binding").unwrap();
    engine.model_mut().connect(message_flow("mf", "x", "y"));
    let mut report = engine.tick();
    clock.advance(engine.config().debounce());
    report.outcomes.extend(engine.tick().outcomes);
    assert_eq!(
        report.outcome("mf"),
        Some(ReconcileOutcome::Classified(Classification::Binding))
    );
    assert_eq!(engine.scheduler().state("mf"), MarkerState::Cooldown);

    clock.advance(Duration::from_millis(20));
    engine.clear_kind("y").unwrap();
    report.outcomes.extend(engine.tick().outcomes);
    assert_eq!(engine.scheduler().state("mf"), MarkerState::Cooldown);
    assert_eq!(engine.scheduler().deferred(), 1);

    report
        .outcomes
        .extend(run_for(&mut engine, &clock, Duration::from_millis(500)).outcomes);
    assert!(engine.model().element("mf").unwrap().metadata.is_empty());
    assert_eq!(engine.classify("mf").unwrap(), Classification::None);
    // classified, then cleared; neither write's echo ran again
    assert_eq!(reconciliations_of(&report, "mf"), 2);
    assert_eq!(report.outcomes.last().map(|(_, o)| *o), Some(ReconcileOutcome::Cleared));
    assert!(engine.scheduler().is_idle());
}

#[test]
fn reconnect_forces_reconciliation_during_cooldown() {
    let diagram = DiagramBuilder::new("cell")
        .add_pool("robot", "Robot")
        .add_task("x", "Grip")
        .with_kind(TaskKind::Binding)
        .add_pool("station", "Station")
        .add_task("y", "Hold")
        .with_kind(TaskKind::Binding)
        .add_task("z", "Inspect")
        .add_message_flow("mf", "x", "y")
        .build();
    let (mut engine, clock) = engine_for(diagram);
    engine.handle(DiagramEvent::ImportDone);
    engine.tick();
    clock.advance(engine.config().debounce());
    engine.tick();
    assert_eq!(engine.scheduler().state("mf"), MarkerState::Cooldown);

    engine.model_mut().reconnect("mf", "x", "z").unwrap();
    let report = settle(&mut engine, &clock);
    assert_eq!(report.outcome("mf"), Some(ReconcileOutcome::Cleared));
}

#[test]
fn kind_change_cleans_up_other_kind_attributes() {
    let config = EngineConfig {
        default_destination: Some("Dock".to_string()),
        ..EngineConfig::default()
    };
    let mut engine = KindEngine::new(binding_chain(), config);
    engine.set_binding_reference("a", "part-7").unwrap();

    engine.set_kind("a", "Movement").unwrap();
    let metadata = &engine.model().element("a").unwrap().metadata;
    assert!(metadata.binding_reference().is_none());
    assert_eq!(metadata.destination(), Some("Dock"));

    engine.set_destination("a", "Shelf").unwrap();
    engine.set_kind("a", "Binding").unwrap();
    let metadata = &engine.model().element("a").unwrap().metadata;
    assert!(metadata.destination().is_none());
    assert_eq!(metadata.binding_reference(), Some(""));

    let err = engine.set_destination("a", "Shelf").unwrap_err();
    assert!(matches!(err, KindEngineError::AttributeNotAllowed { .. }));
}

#[test]
fn clearing_kind_keeps_assignments() {
    let (mut engine, _) = engine_for(binding_chain());
    engine.add_assignment("a", "p.x>5", "p.y=0").unwrap();
    engine.clear_kind("a").unwrap();

    assert_eq!(engine.kind("a").unwrap(), TaskKind::None);
    assert_eq!(engine.assignments("a").unwrap().len(), 1);
}

/// Host model that refuses metadata writes to one element
struct LockedElement {
    inner: Diagram,
    locked: String,
}

impl DiagramModel for LockedElement {
    fn element(&self, id: &str) -> Option<&DiagramElement> {
        self.inner.element(id)
    }

    fn elements(&self) -> Box<dyn Iterator<Item = &DiagramElement> + '_> {
        self.inner.elements()
    }

    fn update_metadata(&mut self, id: &str, update: MetadataUpdate) -> kind_engine::Result<bool> {
        if id == self.locked {
            return Err(KindEngineError::rejected(format!("'{}' is read-only", id)));
        }
        self.inner.update_metadata(id, update)
    }

    fn take_notifications(&mut self) -> Vec<DiagramEvent> {
        self.inner.take_notifications()
    }
}

#[test]
fn rejected_write_does_not_block_other_connections() {
    let diagram = DiagramBuilder::new("cell")
        .add_pool("robot", "Robot")
        .add_task("x", "Grip")
        .with_kind(TaskKind::Binding)
        .add_pool("station", "Station")
        .add_task("y", "Hold")
        .with_kind(TaskKind::Binding)
        .add_task("z", "Clamp")
        .with_kind(TaskKind::Binding)
        .add_message_flow("mf-a", "x", "y")
        .add_message_flow("mf-b", "x", "z")
        .build();
    let model = LockedElement {
        inner: diagram,
        locked: "mf-a".to_string(),
    };
    let (mut engine, clock) = engine_for(model);
    engine.handle(DiagramEvent::ImportDone);

    let report = settle(&mut engine, &clock);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "mf-a");
    assert!(matches!(report.failures[0].1, KindEngineError::MutationRejected(_)));
    assert_eq!(
        report.outcome("mf-b"),
        Some(ReconcileOutcome::Classified(Classification::Binding))
    );
    assert_eq!(
        engine.model().element("mf-a").unwrap().metadata.classification(),
        Classification::None
    );
}
