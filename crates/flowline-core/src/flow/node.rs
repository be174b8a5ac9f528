//! Flow node construction surface.
//!
//! A [`FlowNode`] is a description of work, not a running thing: building a
//! tree never wires continuations. Wiring happens once per execution when the
//! engine composes the tree, so the same tree can be started any number of
//! times and mutating it after `start` never affects a running flow.

use std::sync::Arc;

use flowline_types::error::ActionError;
use flowline_types::event::NodeKind;
use serde_json::Value;

use super::action::{
    AsyncAction, BoxAsyncAction, FailureHandler, SuccessHandler, SyncAction, noop_failure,
    noop_success, noop_sync,
};
use super::context::SharedContext;

// ---------------------------------------------------------------------------
// FlowNode
// ---------------------------------------------------------------------------

/// One unit of a flow tree.
#[derive(Clone)]
pub enum FlowNode {
    Plain(Plain),
    Terminal(Terminal),
    Singular(Singular),
    Sequence(Sequence),
    Parallel(Parallel),
}

impl FlowNode {
    /// Classify the node.
    pub fn kind(&self) -> NodeKind {
        match self {
            FlowNode::Plain(_) => NodeKind::Plain,
            FlowNode::Terminal(_) => NodeKind::Terminal,
            FlowNode::Singular(_) => NodeKind::Singular,
            FlowNode::Sequence(_) => NodeKind::Sequence,
            FlowNode::Parallel(_) => NodeKind::Parallel,
        }
    }

    /// The user-assigned name, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            FlowNode::Plain(node) => node.name.as_deref(),
            FlowNode::Terminal(node) => Some(node.name.as_str()),
            FlowNode::Singular(node) => node.name.as_deref(),
            FlowNode::Sequence(node) => node.name.as_deref(),
            FlowNode::Parallel(node) => node.name.as_deref(),
        }
    }
}

impl std::fmt::Debug for FlowNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowNode::Plain(node) => std::fmt::Debug::fmt(node, f),
            FlowNode::Terminal(node) => std::fmt::Debug::fmt(node, f),
            FlowNode::Singular(node) => std::fmt::Debug::fmt(node, f),
            FlowNode::Sequence(node) => std::fmt::Debug::fmt(node, f),
            FlowNode::Parallel(node) => std::fmt::Debug::fmt(node, f),
        }
    }
}

macro_rules! impl_into_flow_node {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for FlowNode {
                fn from(node: $variant) -> Self {
                    FlowNode::$variant(node)
                }
            }
        )*
    };
}

impl_into_flow_node!(Plain, Terminal, Singular, Sequence, Parallel);

// ---------------------------------------------------------------------------
// Plain
// ---------------------------------------------------------------------------

/// Runs a synchronous action once, then unconditionally continues.
#[derive(Clone)]
pub struct Plain {
    pub(crate) name: Option<String>,
    pub(crate) action: Arc<dyn SyncAction>,
    pub(crate) attributes: Value,
}

impl Plain {
    pub fn new<F>(action: F, attributes: Value) -> Self
    where
        F: Fn(&SharedContext, &Value) + Send + Sync + 'static,
    {
        Self::from_shared(Arc::new(action), attributes)
    }

    pub fn from_shared(action: Arc<dyn SyncAction>, attributes: Value) -> Self {
        Self {
            name: None,
            action,
            attributes,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl std::fmt::Debug for Plain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plain")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

/// A sink that runs its end action and never continues.
///
/// The engine builds the overall-success and overall-failure terminals
/// itself; callers build one only as a Singular's dedicated abort target.
#[derive(Clone)]
pub struct Terminal {
    pub(crate) name: String,
    pub(crate) end: Arc<dyn SyncAction>,
    pub(crate) attributes: Value,
}

impl Terminal {
    pub fn new<F>(name: impl Into<String>, end: F, attributes: Value) -> Self
    where
        F: Fn(&SharedContext, &Value) + Send + Sync + 'static,
    {
        let end: Arc<dyn SyncAction> = Arc::new(end);
        Self::from_shared(name, Some(end), attributes)
    }

    /// A missing end action is replaced by a no-op.
    pub fn from_shared(
        name: impl Into<String>,
        end: Option<Arc<dyn SyncAction>>,
        attributes: Value,
    ) -> Self {
        Self {
            name: name.into(),
            end: end.unwrap_or_else(noop_sync),
            attributes,
        }
    }

    pub fn noop(name: impl Into<String>) -> Self {
        Self::from_shared(name, None, Value::Null)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Singular
// ---------------------------------------------------------------------------

/// Runs one asynchronous action and routes its single outcome.
///
/// Handlers default to no-ops and failures are non-fatal unless
/// [`end_on_failure`](Singular::end_on_failure) is set.
#[derive(Clone)]
pub struct Singular {
    pub(crate) name: Option<String>,
    pub(crate) action: BoxAsyncAction,
    pub(crate) attributes: Value,
    pub(crate) on_success: SuccessHandler,
    pub(crate) on_failure: FailureHandler,
    pub(crate) end_on_failure: bool,
    pub(crate) stop: Option<Terminal>,
}

impl Singular {
    pub fn new<A: AsyncAction + 'static>(action: A, attributes: Value) -> Self {
        Self::from_shared(Arc::new(action), attributes)
    }

    pub fn from_shared(action: BoxAsyncAction, attributes: Value) -> Self {
        Self {
            name: None,
            action,
            attributes,
            on_success: noop_success(),
            on_failure: noop_failure(),
            end_on_failure: false,
            stop: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_success<F>(self, handler: F) -> Self
    where
        F: Fn(&SharedContext, &Value) + Send + Sync + 'static,
    {
        self.on_success_shared(Arc::new(handler))
    }

    pub fn on_success_shared(mut self, handler: SuccessHandler) -> Self {
        self.on_success = handler;
        self
    }

    pub fn on_failure<F>(self, handler: F) -> Self
    where
        F: Fn(&SharedContext, &ActionError) + Send + Sync + 'static,
    {
        self.on_failure_shared(Arc::new(handler))
    }

    pub fn on_failure_shared(mut self, handler: FailureHandler) -> Self {
        self.on_failure = handler;
        self
    }

    /// Make a failure fatal to the whole flow.
    pub fn end_on_failure(mut self, fatal: bool) -> Self {
        self.end_on_failure = fatal;
        self
    }

    /// Abort into `terminal` instead of the inherited abort continuation.
    ///
    /// Ignored when this node is the last child of a sequence or the root:
    /// those positions always take their parent's abort continuation.
    pub fn stop_with(mut self, terminal: Terminal) -> Self {
        self.stop = Some(terminal);
        self
    }
}

impl std::fmt::Debug for Singular {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Singular")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("end_on_failure", &self.end_on_failure)
            .field("stop", &self.stop)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Sequence / Parallel
// ---------------------------------------------------------------------------

/// Runs its children strictly one at a time, in order.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub(crate) name: Option<String>,
    pub(crate) children: Vec<FlowNode>,
}

/// Starts all children without waiting and continues once every child completed.
#[derive(Debug, Clone, Default)]
pub struct Parallel {
    pub(crate) name: Option<String>,
    pub(crate) children: Vec<FlowNode>,
}

macro_rules! impl_group {
    ($group:ident) => {
        impl $group {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn with_children(children: Vec<FlowNode>) -> Self {
                Self {
                    name: None,
                    children,
                }
            }

            pub fn named(mut self, name: impl Into<String>) -> Self {
                self.name = Some(name.into());
                self
            }

            /// Append a child.
            pub fn add(&mut self, child: impl Into<FlowNode>) -> &mut Self {
                self.children.push(child.into());
                self
            }

            /// Builder-style [`add`](Self::add).
            pub fn then(mut self, child: impl Into<FlowNode>) -> Self {
                self.children.push(child.into());
                self
            }

            pub fn children(&self) -> &[FlowNode] {
                &self.children
            }

            pub fn len(&self) -> usize {
                self.children.len()
            }

            pub fn is_empty(&self) -> bool {
                self.children.is_empty()
            }
        }
    };
}

impl_group!(Sequence);
impl_group!(Parallel);
