//! Declarative flow definition types.
//!
//! `FlowDefinition` is the serializable form of a flow tree: every node refers
//! to its actions and handlers by name, and the engine resolves those names
//! against a registry before composing the tree.
//!
//! ```yaml
//! name: checkout
//! fields:
//!   attempts: 0
//! root:
//!   type: sequence
//!   children:
//!     - type: plain
//!       action: increment
//!       attributes: { field: attempts }
//!     - type: singular
//!       action: charge
//!       end_on_failure: true
//!       on_failure: record_error
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Flow Definition
// ---------------------------------------------------------------------------

/// A complete, named flow: initial fields plus a root node tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Human-readable flow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Caller fields seeded into the shared context before the root runs.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    /// The root of the node tree.
    pub root: NodeDefinition,
}

// ---------------------------------------------------------------------------
// Node Definitions
// ---------------------------------------------------------------------------

/// One node of a flow tree.
///
/// Internally tagged by `type` to match YAML structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDefinition {
    /// Run a synchronous action, then continue.
    Plain(PlainDefinition),
    /// Run an asynchronous action and route its outcome.
    Singular(SingularDefinition),
    /// Run children one at a time in order.
    Sequence(GroupDefinition),
    /// Run children concurrently and continue when all completed.
    Parallel(GroupDefinition),
}

impl NodeDefinition {
    /// The optional user-assigned node name.
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeDefinition::Plain(def) => def.name.as_deref(),
            NodeDefinition::Singular(def) => def.name.as_deref(),
            NodeDefinition::Sequence(def) | NodeDefinition::Parallel(def) => def.name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Registered synchronous action name.
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub attributes: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingularDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Registered asynchronous action name.
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub attributes: Value,
    /// Registered success handler name (no-op when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    /// Registered failure handler name (no-op when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    /// Whether a failure aborts the whole flow.
    #[serde(default)]
    pub end_on_failure: bool,
    /// Dedicated abort terminal for this node instead of the inherited one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<TerminalDefinition>,
}

/// Children of a sequence or parallel node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeDefinition>,
}

/// A terminal sink: runs its end action and never continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalDefinition {
    pub name: String,
    /// Registered synchronous action name (no-op when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub attributes: Value,
}
