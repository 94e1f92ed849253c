//! Kind Engine - task-kind semantics for process diagrams
//!
//! This crate adds a semantic layer on top of a process-diagram editor.
//! Every task can carry a kind (Movement, Binding, Unbinding), and every
//! message flow between two tasks is classified from the kinds it joins.
//! It provides:
//!
//! - A task-kind state machine with attribute clean-up and defaults
//! - Message flow classification, reconciled without feedback loops
//! - Advisory validation over a pool's sequence flows
//! - Debounced, loop-guarded scheduling driven by host notifications
//!
//! # Architecture
//!
//! The engine never owns the diagram. It reads and writes it through the
//! [`DiagramModel`] trait:
//!
//! - `KindMachine`: transitions a task's kind in one atomic metadata update
//! - `Classifier`: derives and stores message flow classifications
//! - `GraphValidator`: relates Binding and Unbinding tasks, emits warnings
//! - `ChangeScheduler`: coalesces notifications per connection on an
//!   injected clock
//!
//! # Example
//!
//! ```ignore
//! use kind_engine::{DiagramBuilder, EngineConfig, KindEngine};
//!
//! let diagram = DiagramBuilder::new("d1")
//!     .add_pool("robot", "Robot")
//!     .add_task("grip", "Grip")
//!     .add_pool("station", "Station")
//!     .add_task("hold", "Hold")
//!     .add_message_flow("mf1", "grip", "hold")
//!     .build();
//!
//! let mut engine = KindEngine::new(diagram, EngineConfig::default());
//! engine.set_kind("grip", "Binding")?;
//! engine.set_kind("hold", "Binding")?;
//! engine.tick();
//! ```

pub mod builder;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod diagram;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod kinds;
pub mod metadata;
pub mod scheduler;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::DiagramBuilder;
pub use classifier::{classify, ClassificationState, Classifier, ReconcileOutcome};
pub use config::{ConfigError, EngineConfig, Environment, Place, TimerPolicy};
pub use diagram::{Diagram, DiagramModel};
pub use driver::{spawn_driver, DriverHandle, SharedEngine};
pub use engine::{KindEngine, ReconcileReport};
pub use error::{Endpoint, KindEngineError, Result};
pub use events::{DiagramEvent, EngineEvent, EventSink, NullEventSink, VecEventSink};
pub use kinds::{KindMachine, LoggingHook, Transition, TransitionHook};
pub use metadata::{Assignment, AssignmentId, Attribute, AttributeKind, Metadata, MetadataUpdate};
pub use scheduler::{
    ChangeScheduler, Clock, ManualClock, MarkerState, SystemClock, TokioClock, Trigger,
};
pub use types::{Classification, DiagramElement, ElementId, ElementType, TaskKind};
pub use validation::{GraphValidator, Severity, ValidationResult, ValidationWarning, WarningKind};
