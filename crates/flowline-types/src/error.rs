use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Failure outcome of an asynchronous leaf action.
///
/// Carries a human-readable message plus an optional JSON payload that the
/// failure handler can inspect (status codes, partial results, ...).
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: Value::Null,
        }
    }

    /// Attach a JSON payload to the failure.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Errors caused by a badly built flow tree or a bad `start` call.
///
/// These never become flow-level failures: they are logged and the flow does
/// not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("flow has no root node")]
    MissingRoot,

    #[error("flow has no initial field seed")]
    MissingSeed,

    #[error("terminal node '{label}' can only be used as an abort target")]
    TerminalInTree { label: String },

    #[error("parallel node '{label}' has no children")]
    EmptyParallel { label: String },

    #[error("node '{label}' is nested {depth} levels deep, maximum is {max}")]
    DepthExceeded { label: String, depth: usize, max: usize },
}

/// Errors raised while parsing or resolving a declarative flow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// A node references a name the registry does not know.
    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Run not found (for cancel).
    #[error("flow run not found: {0}")]
    RunNotFound(Uuid),

    /// The task driving the flow panicked or was aborted.
    #[error("flow task failed: {0}")]
    Execution(String),

    /// Every in-flight branch finished without any terminal firing.
    #[error("flow run {0} finished without settling")]
    Unsettled(Uuid),
}
