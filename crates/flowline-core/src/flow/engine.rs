//! Flow entry point.
//!
//! `FlowEngine::start` seeds a [`SharedContext`], wraps the caller's two
//! callbacks in the overall-success and overall-failure terminals, composes
//! the tree into a linked graph and spawns the root onto the tokio runtime.
//!
//! # Execution flow
//!
//! 1. Reject a missing root or seed (configuration error, nothing runs).
//! 2. Compose the tree; composition errors also prevent the start.
//! 3. Register the run's cancellation token and publish `FlowStarted`.
//! 4. Spawn the root. The task ends once every in-flight branch is done.
//! 5. The first terminal to fire settles the run; `FlowHandle::wait` reports it.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use flowline_types::config::EngineConfig;
use flowline_types::error::{ConfigError, FlowError};
use flowline_types::event::{FlowEvent, FlowOutcome};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;

use super::context::{Environment, SharedContext};
use super::graph::{Execution, Settlement, TerminalLink, compose};
use super::node::{FlowNode, Terminal};

/// Name of the terminal wrapping the caller's overall-success callback.
pub const SUCCESS_TERMINAL: &str = "success";

/// Name of the terminal wrapping the caller's overall-failure callback.
pub const FAILURE_TERMINAL: &str = "failure";

// ---------------------------------------------------------------------------
// FlowRun
// ---------------------------------------------------------------------------

/// Result of a finished flow execution.
#[derive(Debug, Clone)]
pub struct FlowRun {
    pub run_id: Uuid,
    /// Which terminal settled the run.
    pub outcome: FlowOutcome,
    /// Caller fields as they were once all work finished.
    pub fields: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// FlowHandle
// ---------------------------------------------------------------------------

/// Handle to a running flow.
#[derive(Debug)]
pub struct FlowHandle {
    run_id: Uuid,
    context: SharedContext,
    settlement: Arc<Settlement>,
    task: JoinHandle<()>,
    events: EventBus,
}

impl FlowHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Cooperatively cancel the run.
    ///
    /// In-flight actions finish; every later decision routes to an abort
    /// continuation.
    pub fn cancel(&self) {
        cancel_run(self.run_id, self.context.cancellation(), &self.events);
    }

    /// The settled outcome, if a terminal has fired yet.
    pub fn outcome(&self) -> Option<FlowOutcome> {
        self.settlement.outcome().cloned()
    }

    /// Wait for every in-flight branch to finish and report the outcome.
    pub async fn wait(self) -> Result<FlowRun, FlowError> {
        self.task
            .await
            .map_err(|e| FlowError::Execution(e.to_string()))?;

        let outcome = self
            .settlement
            .outcome()
            .cloned()
            .ok_or(FlowError::Unsettled(self.run_id))?;

        Ok(FlowRun {
            run_id: self.run_id,
            outcome,
            fields: self.context.snapshot(),
        })
    }
}

fn cancel_run(run_id: Uuid, token: &CancellationToken, events: &EventBus) {
    if token.is_cancelled() {
        return;
    }
    token.cancel();
    tracing::info!(run_id = %run_id, "flow cancelled");
    events.publish(FlowEvent::FlowCancelled {
        run_id,
        at: Utc::now(),
    });
}

/// Removes a run from the active registry when its task finishes.
struct ActiveRunGuard {
    run_id: Uuid,
    active_runs: Arc<DashMap<Uuid, CancellationToken>>,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.active_runs.remove(&self.run_id);
    }
}

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

/// Launches flow trees and tracks the runs still in flight.
///
/// Cloning is cheap; clones share the event bus and the run registry.
#[derive(Debug, Clone)]
pub struct FlowEngine {
    config: Arc<EngineConfig>,
    event_bus: EventBus,
    active_runs: Arc<DashMap<Uuid, CancellationToken>>,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl FlowEngine {
    pub fn new(config: EngineConfig) -> Self {
        let event_bus = EventBus::new(config.event_capacity);
        Self::with_event_bus(config, event_bus)
    }

    /// Create an engine publishing into an existing bus.
    pub fn with_event_bus(config: EngineConfig, event_bus: EventBus) -> Self {
        Self {
            config: Arc::new(config),
            event_bus,
            active_runs: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// IDs of runs whose task has not finished yet.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.active_runs.iter().map(|r| *r.key()).collect()
    }

    /// Cooperatively cancel a live run.
    pub fn cancel(&self, run_id: Uuid) -> Result<(), FlowError> {
        let token = self
            .active_runs
            .get(&run_id)
            .map(|r| r.value().clone())
            .ok_or(FlowError::RunNotFound(run_id))?;
        cancel_run(run_id, &token, &self.event_bus);
        Ok(())
    }

    /// Launch `root` and return immediately.
    ///
    /// Exactly one of `on_success` / `on_failure` fires per started run. A
    /// missing root or seed, or a tree that fails to compose, is logged and
    /// returned as an error; neither callback fires and nothing runs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S, F>(
        &self,
        environment: Environment,
        root: Option<&FlowNode>,
        fields: Option<Map<String, Value>>,
        on_success: S,
        on_failure: F,
    ) -> Result<FlowHandle, FlowError>
    where
        S: Fn(&SharedContext, &Value) + Send + Sync + 'static,
        F: Fn(&SharedContext, &Value) + Send + Sync + 'static,
    {
        let (root, fields) = match (root, fields) {
            (Some(root), Some(fields)) => (root, fields),
            (None, _) => return Err(config_error(ConfigError::MissingRoot)),
            (_, None) => return Err(config_error(ConfigError::MissingSeed)),
        };

        let success = TerminalLink::new(
            &Terminal::new(SUCCESS_TERMINAL, on_success, Value::Null),
            FlowOutcome::Succeeded,
        );
        let failure = TerminalLink::new(
            &Terminal::new(FAILURE_TERMINAL, on_failure, Value::Null),
            FlowOutcome::Failed,
        );

        let linked = compose(root, success, failure, &self.config)
            .map_err(config_error)?;

        let run_id = Uuid::now_v7();
        let context = SharedContext::new(run_id, fields, environment);
        let settlement = Arc::new(Settlement::new());

        self.active_runs
            .insert(run_id, context.cancellation().clone());
        let guard = ActiveRunGuard {
            run_id,
            active_runs: Arc::clone(&self.active_runs),
        };

        tracing::info!(
            run_id = %run_id,
            root = linked.label(),
            kind = %root.kind(),
            "flow started"
        );
        self.event_bus.publish(FlowEvent::FlowStarted {
            run_id,
            root: linked.label().to_string(),
            at: Utc::now(),
        });

        let exec = Execution {
            ctx: context.clone(),
            events: self.event_bus.clone(),
            settlement: Arc::clone(&settlement),
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            linked.run(exec).await;
        });

        Ok(FlowHandle {
            run_id,
            context,
            settlement,
            task,
            events: self.event_bus.clone(),
        })
    }

    /// [`start`](Self::start) and wait for the run to finish.
    pub async fn run<S, F>(
        &self,
        environment: Environment,
        root: &FlowNode,
        fields: Map<String, Value>,
        on_success: S,
        on_failure: F,
    ) -> Result<FlowRun, FlowError>
    where
        S: Fn(&SharedContext, &Value) + Send + Sync + 'static,
        F: Fn(&SharedContext, &Value) + Send + Sync + 'static,
    {
        self.start(environment, Some(root), Some(fields), on_success, on_failure)?
            .wait()
            .await
    }
}

fn config_error(err: ConfigError) -> FlowError {
    tracing::error!(error = %err, "flow not started");
    FlowError::Config(err)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::action::action_fn;
    use crate::flow::node::{Parallel, Plain, Sequence, Singular};
    use flowline_types::error::ActionError;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Counts how often each overall terminal fired.
    #[derive(Clone, Default)]
    struct Terminals {
        success: Arc<AtomicUsize>,
        failure: Arc<AtomicUsize>,
    }

    impl Terminals {
        fn callbacks(
            &self,
        ) -> (
            impl Fn(&SharedContext, &Value) + Send + Sync + 'static,
            impl Fn(&SharedContext, &Value) + Send + Sync + 'static,
        ) {
            let success = Arc::clone(&self.success);
            let failure = Arc::clone(&self.failure);
            (
                move |_: &SharedContext, _: &Value| {
                    success.fetch_add(1, Ordering::SeqCst);
                },
                move |_: &SharedContext, _: &Value| {
                    failure.fetch_add(1, Ordering::SeqCst);
                },
            )
        }

        fn counts(&self) -> (usize, usize) {
            (
                self.success.load(Ordering::SeqCst),
                self.failure.load(Ordering::SeqCst),
            )
        }
    }

    async fn run_tree(tree: impl Into<FlowNode>, fields: Map<String, Value>) -> (FlowRun, Terminals) {
        let terminals = Terminals::default();
        let (on_success, on_failure) = terminals.callbacks();
        let run = FlowEngine::default()
            .run(Environment::new(), &tree.into(), fields, on_success, on_failure)
            .await
            .unwrap();
        (run, terminals)
    }

    fn increment(field: &'static str) -> Plain {
        Plain::new(
            move |ctx: &SharedContext, _: &Value| {
                ctx.update(field, |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1));
            },
            Value::Null,
        )
    }

    fn count_handlers(node: Singular, hits: &Arc<AtomicUsize>) -> Singular {
        let ok = Arc::clone(hits);
        let err = Arc::clone(hits);
        node.on_success(move |_: &SharedContext, _: &Value| {
            ok.fetch_add(1, Ordering::SeqCst);
        })
        .on_failure(move |_: &SharedContext, _: &ActionError| {
            err.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn seed(count: i64) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("count".to_string(), json!(count));
        fields
    }

    // -- Scenarios ----------------------------------------------------------

    #[tokio::test]
    async fn empty_sequence_succeeds_immediately() {
        let (run, terminals) = run_tree(Sequence::new(), Map::new()).await;
        assert_eq!(run.outcome, FlowOutcome::Succeeded);
        assert_eq!(terminals.counts(), (1, 0));
    }

    #[tokio::test]
    async fn sequence_of_increments_adds_two() {
        let tree = Sequence::new().then(increment("count")).then(increment("count"));
        let (run, terminals) = run_tree(tree, seed(5)).await;
        assert_eq!(run.fields["count"], json!(7));
        assert_eq!(terminals.counts(), (1, 0));
    }

    #[tokio::test]
    async fn fatal_failure_skips_rest_of_sequence() {
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let tree = Sequence::new()
            .then(
                Singular::new(
                    action_fn(|_, _| async { Err(ActionError::new("declined")) }),
                    Value::Null,
                )
                .on_failure(move |_: &SharedContext, _: &ActionError| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })
                .end_on_failure(true),
            )
            .then(increment("count"));

        let (run, terminals) = run_tree(tree, seed(0)).await;
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(run.fields["count"], json!(0));
        assert_eq!(run.outcome, FlowOutcome::Failed);
        assert_eq!(terminals.counts(), (0, 1));
    }

    #[tokio::test]
    async fn non_fatal_failure_does_not_block_parallel() {
        let hits = Arc::new(AtomicUsize::new(0));
        let tree = Parallel::new()
            .then(count_handlers(
                Singular::new(
                    action_fn(|_, _| async { Err(ActionError::new("a failed")) }),
                    Value::Null,
                ),
                &hits,
            ))
            .then(count_handlers(
                Singular::new(action_fn(|_, _| async { Ok(json!("b")) }), Value::Null),
                &hits,
            ));

        let (run, terminals) = run_tree(tree, Map::new()).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(run.outcome, FlowOutcome::Succeeded);
        assert_eq!(terminals.counts(), (1, 0));
    }

    /// Branch A fails fatally; branch B finishes only after A's failure
    /// handler ran. Returns the parallel and B's success-handler count.
    fn fatal_branch_gating_sibling() -> (Parallel, Arc<AtomicUsize>) {
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let gate_tx = Arc::new(Mutex::new(Some(gate_tx)));
        let gate_rx = Arc::new(Mutex::new(Some(gate_rx)));
        let b_success = Arc::new(AtomicUsize::new(0));
        let b_seen = Arc::clone(&b_success);

        let a = Singular::new(
            action_fn(|_, _| async { Err(ActionError::new("a failed")) }),
            Value::Null,
        )
        .on_failure(move |_: &SharedContext, _: &ActionError| {
            if let Some(tx) = gate_tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        })
        .end_on_failure(true);

        let b = Singular::new(
            action_fn(move |ctx: SharedContext, _| {
                let rx = gate_rx.lock().unwrap().take();
                async move {
                    if let Some(rx) = rx {
                        let _ = rx.await;
                    }
                    ctx.set("b_done", json!(true));
                    Ok(json!("b"))
                }
            }),
            Value::Null,
        )
        .on_success(move |_: &SharedContext, _: &Value| {
            b_seen.fetch_add(1, Ordering::SeqCst);
        });

        (Parallel::new().then(a).then(b), b_success)
    }

    #[tokio::test]
    async fn fatal_failure_in_parallel_routes_sibling_to_stop() {
        let (tree, b_success) = fatal_branch_gating_sibling();
        let (run, terminals) = run_tree(tree, Map::new()).await;
        assert_eq!(run.fields["b_done"], json!(true));
        assert_eq!(b_success.load(Ordering::SeqCst), 0);
        assert_eq!(run.outcome, FlowOutcome::Failed);
        assert_eq!(terminals.counts(), (0, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fatal_failure_in_parallel_settles_once_on_worker_threads() {
        for _ in 0..50 {
            let (tree, _) = fatal_branch_gating_sibling();
            let (run, terminals) = run_tree(tree, Map::new()).await;
            assert_eq!(run.fields["b_done"], json!(true));
            assert_eq!(run.outcome, FlowOutcome::Failed);
            assert_eq!(terminals.counts(), (0, 1));
        }
    }

    // -- Laws ---------------------------------------------------------------

    #[tokio::test]
    async fn sequence_children_never_overlap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tree = Sequence::new();
        for i in 0..4u64 {
            let log = Arc::clone(&log);
            tree.add(Singular::new(
                action_fn(move |_, _| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().unwrap().push(format!("start {i}"));
                        tokio::time::sleep(Duration::from_millis(4 - i)).await;
                        log.lock().unwrap().push(format!("end {i}"));
                        Ok(Value::Null)
                    }
                }),
                Value::Null,
            ));
        }

        run_tree(tree, Map::new()).await;
        let expected: Vec<String> = (0..4)
            .flat_map(|i| [format!("start {i}"), format!("end {i}")])
            .collect();
        assert_eq!(*log.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn parallel_continues_once_regardless_of_completion_order() {
        for n in [1u64, 3, 8] {
            let mut tree = Parallel::new();
            for i in 0..n {
                tree.add(
                    Singular::new(
                        action_fn(move |_, _| async move {
                            tokio::time::sleep(Duration::from_millis((n - i) * 2)).await;
                            Ok(json!(i))
                        }),
                        Value::Null,
                    )
                    .on_success(|ctx: &SharedContext, _: &Value| {
                        ctx.update("done", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1));
                    }),
                );
            }
            let after = Sequence::new().then(tree).then(increment("after"));

            let (run, terminals) = run_tree(after, Map::new()).await;
            assert_eq!(run.fields["done"], json!(n));
            assert_eq!(run.fields["after"], json!(1));
            assert_eq!(terminals.counts(), (1, 0));
        }
    }

    #[tokio::test]
    async fn singular_fires_one_handler_and_one_terminal() {
        for (succeeds, fatal) in [(true, false), (true, true), (false, false), (false, true)] {
            let hits = Arc::new(AtomicUsize::new(0));
            let node = count_handlers(
                Singular::new(
                    action_fn(move |_, _| async move {
                        if succeeds {
                            Ok(Value::Null)
                        } else {
                            Err(ActionError::new("no"))
                        }
                    }),
                    Value::Null,
                ),
                &hits,
            )
            .end_on_failure(fatal);

            let (run, terminals) = run_tree(node, Map::new()).await;
            assert_eq!(hits.load(Ordering::SeqCst), 1);
            let (s, f) = terminals.counts();
            assert_eq!(s + f, 1);
            assert_eq!(run.outcome.is_success(), succeeds || !fatal);
        }
    }

    #[tokio::test]
    async fn cancellation_routes_every_later_decision_to_stop() {
        let tree = Sequence::new()
            .then(Plain::new(|ctx: &SharedContext, _: &Value| ctx.halt(), Value::Null))
            .then(Sequence::new().then(increment("count")))
            .then(Parallel::new().then(increment("count")));

        let (run, terminals) = run_tree(tree, seed(0)).await;
        assert_eq!(run.fields["count"], json!(0));
        assert_eq!(run.outcome, FlowOutcome::Failed);
        assert_eq!(terminals.counts(), (0, 1));
    }

    // -- Scale --------------------------------------------------------------

    #[tokio::test]
    async fn long_sequence_of_singulars_succeeds() {
        let mut tree = Sequence::new();
        for _ in 0..10_000 {
            tree.add(
                Singular::new(action_fn(|_, _| async { Ok(Value::Null) }), Value::Null)
                    .on_success(|ctx: &SharedContext, _: &Value| {
                        ctx.update("count", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1));
                    }),
            );
        }

        let (run, terminals) = run_tree(tree, seed(0)).await;
        assert_eq!(run.fields["count"], json!(10_000));
        assert_eq!(run.outcome, FlowOutcome::Succeeded);
        assert_eq!(terminals.counts(), (1, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn long_sequence_keeps_children_strictly_ordered() {
        let busy = Arc::new(AtomicBool::new(false));
        let order = Arc::new(Mutex::new(Vec::new()));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let mut tree = Sequence::new();
        for i in 0..1_000usize {
            let busy = Arc::clone(&busy);
            let order = Arc::clone(&order);
            let overlaps = Arc::clone(&overlaps);
            tree.add(Singular::new(
                action_fn(move |_, _| {
                    let busy = Arc::clone(&busy);
                    let order = Arc::clone(&order);
                    let overlaps = Arc::clone(&overlaps);
                    async move {
                        if busy.swap(true, Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::task::yield_now().await;
                        order.lock().unwrap().push(i);
                        busy.store(false, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                }),
                Value::Null,
            ));
        }

        let (run, terminals) = run_tree(tree, Map::new()).await;
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(*order.lock().unwrap(), (0..1_000).collect::<Vec<_>>());
        assert_eq!(run.outcome, FlowOutcome::Succeeded);
        assert_eq!(terminals.counts(), (1, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn wide_parallel_continues_once_after_every_child() {
        let mut tree = Parallel::new();
        for i in 0..1_000u64 {
            tree.add(
                Singular::new(
                    action_fn(move |_, _| async move {
                        tokio::time::sleep(Duration::from_millis(i % 7)).await;
                        Ok(json!(i))
                    }),
                    Value::Null,
                )
                .on_success(|ctx: &SharedContext, _: &Value| {
                    ctx.update("done", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1));
                }),
            );
        }
        let tree = Sequence::new().then(tree).then(increment("after"));

        let (run, terminals) = run_tree(tree, Map::new()).await;
        assert_eq!(run.fields["done"], json!(1_000));
        assert_eq!(run.fields["after"], json!(1));
        assert_eq!(run.outcome, FlowOutcome::Succeeded);
        assert_eq!(terminals.counts(), (1, 0));
    }

    // -- Entry point --------------------------------------------------------

    #[tokio::test]
    async fn missing_root_or_seed_starts_nothing() {
        let engine = FlowEngine::default();
        let terminals = Terminals::default();

        let (on_success, on_failure) = terminals.callbacks();
        let err = engine
            .start(Environment::new(), None, Some(Map::new()), on_success, on_failure)
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::Config(ConfigError::MissingRoot)));

        let root: FlowNode = Sequence::new().into();
        let (on_success, on_failure) = terminals.callbacks();
        let err = engine
            .start(Environment::new(), Some(&root), None, on_success, on_failure)
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::Config(ConfigError::MissingSeed)));

        assert_eq!(terminals.counts(), (0, 0));
        assert!(engine.active_runs().is_empty());
    }

    #[tokio::test]
    async fn compose_error_prevents_start() {
        let engine = FlowEngine::default();
        let terminals = Terminals::default();
        let (on_success, on_failure) = terminals.callbacks();
        let root: FlowNode = Sequence::new().then(Terminal::noop("end")).into();

        let err = engine
            .start(Environment::new(), Some(&root), Some(Map::new()), on_success, on_failure)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            FlowError::Config(ConfigError::TerminalInTree { .. })
        ));
        assert_eq!(terminals.counts(), (0, 0));
    }

    #[tokio::test]
    async fn same_tree_runs_twice_independently() {
        let tree: FlowNode = Sequence::new().then(increment("count")).into();
        let engine = FlowEngine::default();

        let first = engine
            .run(Environment::new(), &tree, seed(0), |_, _| {}, |_, _| {})
            .await
            .unwrap();
        let second = engine
            .run(Environment::new(), &tree, seed(10), |_, _| {}, |_, _| {})
            .await
            .unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.fields["count"], json!(1));
        assert_eq!(second.fields["count"], json!(11));
    }

    #[tokio::test]
    async fn environment_is_visible_to_actions() {
        let tree: FlowNode = Singular::new(
            action_fn(|ctx: SharedContext, _| async move {
                match ctx.environment().get::<String>("base_url") {
                    Some(base) => {
                        ctx.set("url", json!(format!("{base}/orders")));
                        Ok(Value::Null)
                    }
                    None => Err(ActionError::new("missing base_url")),
                }
            }),
            Value::Null,
        )
        .into();

        let env = Environment::new().with("base_url", "https://shop.test".to_string());
        let run = FlowEngine::default()
            .run(env, &tree, Map::new(), |_, _| {}, |_, _| {})
            .await
            .unwrap();
        assert_eq!(run.fields["url"], json!("https://shop.test/orders"));
    }

    #[tokio::test]
    async fn engine_cancel_aborts_waiting_run() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));
        let tree: FlowNode = Sequence::new()
            .then(Singular::new(
                action_fn(move |_, _| {
                    let rx = release_rx.lock().unwrap().take();
                    async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                        Ok(Value::Null)
                    }
                }),
                Value::Null,
            ))
            .then(increment("count"))
            .into();

        let engine = FlowEngine::default();
        let mut events = engine.event_bus().subscribe();
        let handle = engine
            .start(Environment::new(), Some(&tree), Some(seed(0)), |_, _| {}, |_, _| {})
            .unwrap();
        let run_id = handle.run_id();
        assert_eq!(engine.active_runs(), vec![run_id]);

        engine.cancel(run_id).unwrap();
        assert!(!handle.context().continue_operation());
        assert!(handle.outcome().is_none());
        release_tx.send(()).unwrap();

        let run = handle.wait().await.unwrap();
        assert_eq!(run.outcome, FlowOutcome::Failed);
        assert_eq!(run.fields["count"], json!(0));
        assert!(engine.active_runs().is_empty());
        assert!(matches!(engine.cancel(run_id), Err(FlowError::RunNotFound(id)) if id == run_id));

        let mut saw_cancel = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, FlowEvent::FlowCancelled { .. }) {
                saw_cancel = true;
            }
        }
        assert!(saw_cancel);
    }

    #[tokio::test]
    async fn handle_cancel_is_idempotent() {
        let tree: FlowNode = Sequence::new().into();
        let engine = FlowEngine::default();
        let mut events = engine.event_bus().subscribe();
        let handle = engine
            .start(Environment::new(), Some(&tree), Some(Map::new()), |_, _| {}, |_, _| {})
            .unwrap();
        handle.cancel();
        handle.cancel();
        handle.wait().await.unwrap();

        let cancels = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, FlowEvent::FlowCancelled { .. }))
            .count();
        assert_eq!(cancels, 1);
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let engine = FlowEngine::default();
        let mut events = engine.event_bus().subscribe();
        let tree: FlowNode = Sequence::new()
            .named("checkout")
            .then(
                Singular::new(action_fn(|_, _| async { Ok(Value::Null) }), Value::Null)
                    .named("reserve"),
            )
            .into();

        let run = engine
            .run(Environment::new(), &tree, Map::new(), |_, _| {}, |_, _| {})
            .await
            .unwrap();

        let collected: Vec<FlowEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(collected.iter().all(|e| e.run_id() == run.run_id));
        assert!(matches!(&collected[0], FlowEvent::FlowStarted { root, .. } if root == "checkout"));
        assert!(collected.iter().any(
            |e| matches!(e, FlowEvent::ActionSucceeded { node, .. } if node == "reserve")
        ));
        assert!(matches!(
            collected.last(),
            Some(FlowEvent::FlowSettled {
                outcome: FlowOutcome::Succeeded,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn panicking_branch_leaves_run_unsettled() {
        let tree: FlowNode = Parallel::new()
            .then(Plain::new(|_: &SharedContext, _: &Value| panic!("boom"), Value::Null))
            .then(increment("count"))
            .into();
        let err = FlowEngine::default()
            .run(Environment::new(), &tree, Map::new(), |_, _| {}, |_, _| {})
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::Unsettled(_)));
    }
}
