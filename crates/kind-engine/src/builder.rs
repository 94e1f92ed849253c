//! Fluent builder for diagrams
//!
//! Provides a compact API for constructing pools, tasks and flows
//! programmatically, mainly for embedders' fixtures and tests.

use crate::diagram::Diagram;
use crate::metadata::Attribute;
use crate::types::{DiagramElement, ElementId, ElementType, TaskKind};

/// Fluent builder for constructing diagrams
///
/// Tasks and lanes are placed into the most recently added pool (and lane,
/// if one was added after that pool).
///
/// # Example
///
/// ```ignore
/// let diagram = DiagramBuilder::new("d1")
///     .add_pool("robot", "Robot")
///     .add_task("grip", "Grip part")
///     .with_kind(TaskKind::Binding)
///     .add_pool("station", "Station")
///     .add_task("hold", "Hold part")
///     .with_kind(TaskKind::Binding)
///     .add_message_flow("mf1", "grip", "hold")
///     .build();
/// ```
pub struct DiagramBuilder {
    id: String,
    elements: Vec<DiagramElement>,
    current_pool: Option<(ElementId, ElementId)>,
    current_lane: Option<ElementId>,
    flow_counter: usize,
}

impl DiagramBuilder {
    /// Create a new diagram builder
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            elements: Vec::new(),
            current_pool: None,
            current_lane: None,
            flow_counter: 0,
        }
    }

    /// Add a pool together with the process it displays
    pub fn add_pool(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let process_id = format!("{}_process", id);

        self.elements
            .push(DiagramElement::new(process_id.clone(), ElementType::Process));
        let mut pool = DiagramElement::new(id.clone(), ElementType::Participant).named(name);
        pool.process_ref = Some(process_id.clone());
        self.elements.push(pool);

        self.current_pool = Some((id, process_id));
        self.current_lane = None;
        self
    }

    /// Add a lane to the current pool
    pub fn add_lane(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let mut lane = DiagramElement::new(id.clone(), ElementType::Lane).named(name);
        lane.parent = self.current_pool.as_ref().map(|(pool, _)| pool.clone());
        self.elements.push(lane);
        self.current_lane = Some(id);
        self
    }

    /// Add a task to the current pool (or lane)
    pub fn add_task(self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.add_flow_node(id, name, ElementType::Task)
    }

    /// Add a gateway to the current pool (or lane)
    pub fn add_gateway(self, id: impl Into<String>) -> Self {
        self.add_flow_node(id, "", ElementType::Gateway)
    }

    /// Add an event to the current pool (or lane)
    pub fn add_event(self, id: impl Into<String>) -> Self {
        self.add_flow_node(id, "", ElementType::Event)
    }

    fn add_flow_node(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        element_type: ElementType,
    ) -> Self {
        let mut node = DiagramElement::new(id, element_type).named(name);
        node.parent = self
            .current_lane
            .clone()
            .or_else(|| self.current_pool.as_ref().map(|(pool, _)| pool.clone()));
        node.process = self.current_pool.as_ref().map(|(_, process)| process.clone());
        self.elements.push(node);
        self
    }

    /// Set the kind of the most recently added element
    ///
    /// Must be called immediately after `add_task`.
    pub fn with_kind(self, kind: TaskKind) -> Self {
        if kind.is_none() {
            return self;
        }
        self.with_attribute(Attribute::TaskType(kind))
    }

    /// Store an attribute on the most recently added element
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        if let Some(element) = self.elements.last_mut() {
            element.metadata.set(attribute);
        }
        self
    }

    /// Add a sequence flow inside the current pool (auto-generates its ID)
    pub fn add_sequence_flow(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.flow_counter += 1;
        let mut flow = DiagramElement::new(
            format!("flow-{}", self.flow_counter),
            ElementType::SequenceFlow,
        );
        flow.source = Some(source.into());
        flow.target = Some(target.into());
        flow.process = self.current_pool.as_ref().map(|(_, process)| process.clone());
        self.elements.push(flow);
        self
    }

    /// Add a message flow with an explicit ID
    pub fn add_message_flow(
        mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let mut flow = DiagramElement::new(id, ElementType::MessageFlow);
        flow.source = Some(source.into());
        flow.target = Some(target.into());
        self.elements.push(flow);
        self
    }

    /// Build the diagram; no notifications are queued
    pub fn build(self) -> Diagram {
        let mut diagram = Diagram::new(self.id);
        for element in self.elements {
            diagram.insert(element);
        }
        diagram
    }
}
