//! Linked execution graph: composition and run semantics.
//!
//! [`compose`] walks a [`FlowNode`] tree once and produces a graph where every
//! node already knows its abort continuation (`stop`). A node's `next` is
//! whatever its parent does once the node hands control back:
//!
//! - Plain -- run the action, then hand back [`Handoff::Next`].
//! - Singular -- await the action; route the outcome to a handler, then hand
//!   back `Next` or fire `stop` depending on the outcome, `end_on_failure`, and
//!   the cancellation signal.
//! - Sequence -- run the children one after another; the first child that
//!   stops ends the sequence, and after the last one the sequence continues.
//! - Parallel -- spawn every child and count the ones that continue; the
//!   parallel continues once all of them did.
//!
//! Control never nests along a sequence, so neither a long sequence nor a long
//! chain of parallels grows the stack. Recursion only follows tree depth,
//! which `compose` bounds with `max_depth`.
//!
//! Abort continuations are always terminals. A terminal has no continuations
//! of its own, so it can never cascade.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use flowline_types::config::{EmptyParallelPolicy, EngineConfig};
use flowline_types::error::ConfigError;
use flowline_types::event::{FlowEvent, FlowOutcome, NodeKind};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::event::EventBus;

use super::action::{ActionOutcome, BoxAsyncAction, FailureHandler, SuccessHandler, SyncAction};
use super::context::SharedContext;
use super::node::{FlowNode, Terminal};

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

/// First-terminal-wins latch for one execution.
#[derive(Debug)]
pub(crate) struct Settlement {
    outcome: OnceLock<FlowOutcome>,
    started: Instant,
}

impl Settlement {
    pub(crate) fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            started: Instant::now(),
        }
    }

    pub(crate) fn outcome(&self) -> Option<&FlowOutcome> {
        self.outcome.get()
    }

    fn claim(&self, outcome: FlowOutcome) -> bool {
        self.outcome.set(outcome).is_ok()
    }
}

/// Everything a running node needs besides its own configuration.
#[derive(Debug, Clone)]
pub(crate) struct Execution {
    pub(crate) ctx: SharedContext,
    pub(crate) events: EventBus,
    pub(crate) settlement: Arc<Settlement>,
}

// ---------------------------------------------------------------------------
// Linked graph
// ---------------------------------------------------------------------------

/// A terminal sink bound to the outcome it settles the run with.
pub(crate) struct TerminalLink {
    label: String,
    end: Arc<dyn SyncAction>,
    attributes: Value,
    outcome: FlowOutcome,
}

impl TerminalLink {
    pub(crate) fn new(terminal: &Terminal, outcome: FlowOutcome) -> Arc<Self> {
        Arc::new(Self {
            label: terminal.name.clone(),
            end: Arc::clone(&terminal.end),
            attributes: terminal.attributes.clone(),
            outcome,
        })
    }

    fn fire(&self, exec: &Execution) {
        let run_id = exec.ctx.run_id();
        if !exec.settlement.claim(self.outcome.clone()) {
            tracing::debug!(
                run_id = %run_id,
                terminal = self.label.as_str(),
                "run already settled, terminal suppressed"
            );
            return;
        }

        self.end.call(&exec.ctx, &self.attributes);

        let duration_ms = exec.settlement.started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            terminal = self.label.as_str(),
            outcome = %self.outcome,
            duration_ms,
            "flow settled"
        );
        exec.events.publish(FlowEvent::FlowSettled {
            run_id,
            outcome: self.outcome.clone(),
            duration_ms,
        });
    }
}

/// How a node hands control back to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handoff {
    /// Continue with whatever follows the node.
    Next,
    /// An abort continuation was taken; nothing after the node runs.
    Stopped,
}

/// A composed tree together with the continuation that follows its root.
pub(crate) struct LinkedFlow {
    root: Arc<LinkedNode>,
    next: Arc<TerminalLink>,
}

impl LinkedFlow {
    pub(crate) fn label(&self) -> &str {
        self.root.label()
    }

    /// Run the root, then the overall-success terminal if the root continued.
    pub(crate) async fn run(&self, exec: Execution) {
        if Arc::clone(&self.root).run(exec.clone()).await == Handoff::Next {
            self.next.fire(&exec);
        }
    }
}

enum Step {
    Plain {
        action: Arc<dyn SyncAction>,
        attributes: Value,
    },
    Singular {
        action: BoxAsyncAction,
        attributes: Value,
        on_success: SuccessHandler,
        on_failure: FailureHandler,
        end_on_failure: bool,
    },
    Sequence {
        children: Vec<Arc<LinkedNode>>,
    },
    Parallel {
        children: Vec<Arc<LinkedNode>>,
    },
}

/// A fully wired node.
pub(crate) struct LinkedNode {
    label: String,
    kind: NodeKind,
    step: Step,
    stop: Arc<TerminalLink>,
}

/// Completion bookkeeping of one parallel run.
///
/// The parallel's own continuation is decided at most once.
struct JoinTally {
    expected: usize,
    completed: usize,
    decided: bool,
}

impl JoinTally {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            completed: 0,
            decided: false,
        }
    }

    /// Count one child that continued. Returns the parallel's handoff the
    /// first time one is due.
    fn complete(&mut self, continue_operation: bool) -> Option<Handoff> {
        self.completed += 1;
        if self.decided {
            return None;
        }
        if !continue_operation {
            self.decided = true;
            Some(Handoff::Stopped)
        } else if self.completed == self.expected {
            self.decided = true;
            Some(Handoff::Next)
        } else {
            None
        }
    }
}

impl LinkedNode {
    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn run(self: Arc<Self>, exec: Execution) -> BoxFuture<'static, Handoff> {
        async move {
            let run_id = exec.ctx.run_id();
            exec.events.publish(FlowEvent::NodeStarted {
                run_id,
                node: self.label.clone(),
                kind: self.kind,
            });

            match &self.step {
                Step::Plain { action, attributes } => {
                    tracing::debug!(run_id = %run_id, node = self.label.as_str(), "running plain action");
                    action.call(&exec.ctx, attributes);
                    Handoff::Next
                }
                Step::Singular {
                    action,
                    attributes,
                    on_success,
                    on_failure,
                    end_on_failure,
                } => {
                    let outcome = action.call_boxed(exec.ctx.clone(), attributes.clone()).await;
                    self.route_outcome(outcome, on_success, on_failure, *end_on_failure, &exec)
                }
                Step::Sequence { children } => self.run_sequence(children, exec).await,
                Step::Parallel { children } => self.run_parallel(children, exec).await,
            }
        }
        .boxed()
    }

    fn route_outcome(
        &self,
        outcome: ActionOutcome,
        on_success: &SuccessHandler,
        on_failure: &FailureHandler,
        end_on_failure: bool,
        exec: &Execution,
    ) -> Handoff {
        let run_id = exec.ctx.run_id();

        if !exec.ctx.continue_operation() {
            tracing::debug!(
                run_id = %run_id,
                node = self.label.as_str(),
                succeeded = outcome.is_ok(),
                "outcome ignored, flow cancelled"
            );
            self.stop.fire(exec);
            return Handoff::Stopped;
        }

        match outcome {
            Ok(value) => {
                on_success(&exec.ctx, &value);
                exec.events.publish(FlowEvent::ActionSucceeded {
                    run_id,
                    node: self.label.clone(),
                });
                Handoff::Next
            }
            Err(error) => {
                on_failure(&exec.ctx, &error);
                exec.events.publish(FlowEvent::ActionFailed {
                    run_id,
                    node: self.label.clone(),
                    error: error.message.clone(),
                    fatal: end_on_failure,
                });

                if end_on_failure {
                    tracing::warn!(
                        run_id = %run_id,
                        node = self.label.as_str(),
                        error = %error,
                        "fatal action failure, aborting flow"
                    );
                    exec.ctx.halt();
                    self.stop.fire(exec);
                    Handoff::Stopped
                } else {
                    tracing::debug!(
                        run_id = %run_id,
                        node = self.label.as_str(),
                        error = %error,
                        "non-fatal action failure, continuing"
                    );
                    Handoff::Next
                }
            }
        }
    }

    async fn run_sequence(&self, children: &[Arc<LinkedNode>], exec: Execution) -> Handoff {
        if children.is_empty() {
            return Handoff::Next;
        }

        if !exec.ctx.continue_operation() {
            tracing::debug!(
                run_id = %exec.ctx.run_id(),
                node = self.label.as_str(),
                "sequence not started, flow cancelled"
            );
            self.stop.fire(&exec);
            return Handoff::Stopped;
        }

        for child in children {
            if Arc::clone(child).run(exec.clone()).await == Handoff::Stopped {
                return Handoff::Stopped;
            }
        }
        Handoff::Next
    }

    async fn run_parallel(&self, children: &[Arc<LinkedNode>], exec: Execution) -> Handoff {
        let run_id = exec.ctx.run_id();

        if !exec.ctx.continue_operation() {
            tracing::debug!(
                run_id = %run_id,
                node = self.label.as_str(),
                "parallel not started, flow cancelled"
            );
            self.stop.fire(&exec);
            return Handoff::Stopped;
        }

        if children.is_empty() {
            return Handoff::Next;
        }

        let mut join_set = JoinSet::new();
        for child in children {
            join_set.spawn(Arc::clone(child).run(exec.clone()));
        }

        // In-flight branches always run to the end, even after the parallel
        // has decided.
        let mut tally = JoinTally::new(children.len());
        let mut handoff = Handoff::Stopped;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Handoff::Next) => match tally.complete(exec.ctx.continue_operation()) {
                    Some(Handoff::Stopped) => {
                        tracing::debug!(
                            run_id = %run_id,
                            node = self.label.as_str(),
                            completed = tally.completed,
                            "parallel aborted, flow cancelled"
                        );
                        self.stop.fire(&exec);
                    }
                    Some(Handoff::Next) => {
                        tracing::debug!(
                            run_id = %run_id,
                            node = self.label.as_str(),
                            completed = tally.completed,
                            "parallel completed"
                        );
                        handoff = Handoff::Next;
                    }
                    None => {}
                },
                Ok(Handoff::Stopped) => {}
                Err(e) => {
                    tracing::error!(
                        run_id = %run_id,
                        node = self.label.as_str(),
                        error = %e,
                        "parallel branch task failed"
                    );
                }
            }
        }
        handoff
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Link `root` so that it continues into `next` and aborts into `stop`.
///
/// The root always takes `stop`, even when it declares its own abort terminal.
pub(crate) fn compose(
    root: &FlowNode,
    next: Arc<TerminalLink>,
    stop: Arc<TerminalLink>,
    config: &EngineConfig,
) -> Result<LinkedFlow, ConfigError> {
    let root = Composer { config }.link(root, "root".to_string(), 0, stop, true)?;
    Ok(LinkedFlow { root, next })
}

struct Composer<'a> {
    config: &'a EngineConfig,
}

impl Composer<'_> {
    /// `force_stop` replaces a node's own abort terminal with the inherited one.
    fn link(
        &self,
        node: &FlowNode,
        position: String,
        depth: usize,
        inherited_stop: Arc<TerminalLink>,
        force_stop: bool,
    ) -> Result<Arc<LinkedNode>, ConfigError> {
        let label = node.name().map(str::to_string).unwrap_or(position);

        if depth > self.config.max_depth {
            return Err(ConfigError::DepthExceeded {
                label,
                depth,
                max: self.config.max_depth,
            });
        }

        let (step, stop) = match node {
            FlowNode::Terminal(_) => return Err(ConfigError::TerminalInTree { label }),
            FlowNode::Plain(plain) => (
                Step::Plain {
                    action: Arc::clone(&plain.action),
                    attributes: plain.attributes.clone(),
                },
                inherited_stop,
            ),
            FlowNode::Singular(singular) => {
                let stop = match (&singular.stop, force_stop) {
                    (Some(own), false) => TerminalLink::new(
                        own,
                        FlowOutcome::Aborted {
                            terminal: own.name.clone(),
                        },
                    ),
                    _ => inherited_stop,
                };
                (
                    Step::Singular {
                        action: Arc::clone(&singular.action),
                        attributes: singular.attributes.clone(),
                        on_success: Arc::clone(&singular.on_success),
                        on_failure: Arc::clone(&singular.on_failure),
                        end_on_failure: singular.end_on_failure,
                    },
                    stop,
                )
            }
            FlowNode::Sequence(sequence) => {
                let count = sequence.children.len();
                let children = sequence
                    .children
                    .iter()
                    .enumerate()
                    .map(|(index, child)| {
                        self.link(
                            child,
                            format!("{label}.{index}"),
                            depth + 1,
                            Arc::clone(&inherited_stop),
                            index + 1 == count,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                (Step::Sequence { children }, inherited_stop)
            }
            FlowNode::Parallel(parallel) => {
                if parallel.children.is_empty()
                    && self.config.empty_parallel == EmptyParallelPolicy::Reject
                {
                    return Err(ConfigError::EmptyParallel { label });
                }

                let children = parallel
                    .children
                    .iter()
                    .enumerate()
                    .map(|(index, child)| {
                        self.link(
                            child,
                            format!("{label}.{index}"),
                            depth + 1,
                            Arc::clone(&inherited_stop),
                            false,
                        )
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                (Step::Parallel { children }, inherited_stop)
            }
        };

        Ok(Arc::new(LinkedNode {
            label,
            kind: node.kind(),
            step,
            stop,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
