//! Engine configuration types for Flowline.
//!
//! `EngineConfig` represents the `flowline.toml` file that tunes the engine.
//! Every field has a default so an empty file is valid.

use serde::{Deserialize, Serialize};

/// What `compose` does with a parallel node that has no children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyParallelPolicy {
    /// Treat it like an empty sequence: continue immediately.
    #[default]
    Complete,
    /// Refuse to start the flow.
    Reject,
}

/// Top-level configuration for the flow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the broadcast channel behind the event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Handling of childless parallel nodes.
    #[serde(default)]
    pub empty_parallel: EmptyParallelPolicy,

    /// Maximum nesting depth accepted when composing a tree (root = 0).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_depth() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            empty_parallel: EmptyParallelPolicy::default(),
            max_depth: default_max_depth(),
        }
    }
}
