//! Event types for the Flowline event bus.
//!
//! `FlowEvent` is the unified event type broadcast while a flow executes.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a flow execution settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowOutcome {
    /// The overall-success terminal fired.
    Succeeded,
    /// The overall-failure terminal fired.
    Failed,
    /// A node's own abort terminal fired instead of the overall ones.
    Aborted { terminal: String },
}

impl FlowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FlowOutcome::Succeeded)
    }
}

impl std::fmt::Display for FlowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowOutcome::Succeeded => write!(f, "succeeded"),
            FlowOutcome::Failed => write!(f, "failed"),
            FlowOutcome::Aborted { terminal } => write!(f, "aborted at '{terminal}'"),
        }
    }
}

/// The kind of a flow node, used in events and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Plain,
    Terminal,
    Singular,
    Sequence,
    Parallel,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeKind::Plain => "plain",
            NodeKind::Terminal => "terminal",
            NodeKind::Singular => "singular",
            NodeKind::Sequence => "sequence",
            NodeKind::Parallel => "parallel",
        };
        f.write_str(name)
    }
}

/// Events emitted during flow execution.
///
/// Used by the event bus to communicate flow lifecycle and leaf outcomes to
/// subscribers (UI, logging, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A flow execution has been launched.
    FlowStarted {
        run_id: Uuid,
        root: String,
        at: DateTime<Utc>,
    },

    /// A node's run began.
    NodeStarted {
        run_id: Uuid,
        node: String,
        kind: NodeKind,
    },

    /// A Singular action resolved positively and its success handler ran.
    ActionSucceeded { run_id: Uuid, node: String },

    /// A Singular action resolved negatively and its failure handler ran.
    ActionFailed {
        run_id: Uuid,
        node: String,
        error: String,
        /// Whether this failure aborted the whole flow.
        fatal: bool,
    },

    /// Cancellation was requested from outside the flow.
    FlowCancelled { run_id: Uuid, at: DateTime<Utc> },

    /// A terminal fired and settled the execution.
    FlowSettled {
        run_id: Uuid,
        outcome: FlowOutcome,
        duration_ms: u64,
    },
}

impl FlowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            FlowEvent::FlowStarted { run_id, .. }
            | FlowEvent::NodeStarted { run_id, .. }
            | FlowEvent::ActionSucceeded { run_id, .. }
            | FlowEvent::ActionFailed { run_id, .. }
            | FlowEvent::FlowCancelled { run_id, .. }
            | FlowEvent::FlowSettled { run_id, .. } => *run_id,
        }
    }
}
