//! Flow engine: node construction, composition, and execution.
//!
//! - `context` -- shared execution context, cancellation signal, environment handles
//! - `action` -- leaf action and handler contracts
//! - `node` -- the `FlowNode` tree callers build
//! - `graph` -- one-shot composition into a linked graph, and its run semantics
//! - `engine` -- entry point, run handles, active-run registry
//! - `registry` -- name-indexed actions for declarative definitions
//! - `definition` -- YAML parsing, validation, resolution into `FlowNode`s

pub mod action;
pub mod context;
pub mod definition;
pub mod engine;
mod graph;
pub mod node;
pub mod registry;

pub use action::{ActionOutcome, AsyncAction, BoxAsyncAction, SyncAction, action_fn};
pub use context::{Environment, SharedContext};
pub use engine::{FlowEngine, FlowHandle, FlowRun};
pub use node::{FlowNode, Parallel, Plain, Sequence, Singular, Terminal};
pub use registry::ActionRegistry;
