//! Error types for the kind engine

use thiserror::Error;

/// Result type alias using KindEngineError
pub type Result<T> = std::result::Result<T, KindEngineError>;

/// Errors that can occur in the kind engine
#[derive(Debug, Error)]
pub enum KindEngineError {
    /// An unknown task kind was requested
    #[error("Unknown task kind '{kind}'")]
    Configuration { kind: String },

    /// Element not present in the diagram
    #[error("Unknown element: {0}")]
    UnknownElement(String),

    /// Element exists but is not a task
    #[error("Element '{0}' is not a task")]
    NotATask(String),

    /// Element exists but is not a message flow
    #[error("Element '{0}' is not a message flow")]
    NotAConnection(String),

    /// Assignment id not attached to the task
    #[error("Task '{task}' has no assignment '{assignment}'")]
    UnknownAssignment { task: String, assignment: String },

    /// Attribute not permitted for the task's current kind
    #[error("Attribute '{attribute}' is not allowed on {kind} task '{task}'")]
    AttributeNotAllowed {
        task: String,
        attribute: String,
        kind: String,
    },

    /// A raw metadata entry could not be mapped to a typed attribute
    #[error("Invalid attribute '{key}' = '{value}'")]
    InvalidAttribute { key: String, value: String },

    /// The pool of a connection endpoint could not be resolved
    #[error("Cannot resolve pool for {endpoint} of connection '{connection}'")]
    Resolution {
        connection: String,
        endpoint: Endpoint,
    },

    /// The host model refused a metadata update
    #[error("Model update rejected: {0}")]
    MutationRejected(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KindEngineError {
    /// Create a configuration error for an unknown kind key
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::Configuration { kind: kind.into() }
    }

    /// Create a rejected-update error with a message
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::MutationRejected(msg.into())
    }

    /// Whether this is a caller error rather than a transient model condition
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Which end of a connection an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Target,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}
