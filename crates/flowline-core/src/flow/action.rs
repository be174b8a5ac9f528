//! Leaf action contracts.
//!
//! The engine treats leaf work as opaque functions:
//! - [`SyncAction`] -- `(ctx, attributes)`, runs to completion without suspending
//!   (Plain nodes, terminal end functions).
//! - [`AsyncAction`] -- `(ctx, attributes) -> outcome`, resolves exactly once to
//!   a success value or an [`ActionError`] (Singular nodes).
//! - [`SuccessHandler`] / [`FailureHandler`] -- synchronous, run before the
//!   Singular's continuation fires.
//!
//! `AsyncAction` uses RPITIT, so it is not object-safe; [`AsyncActionDyn`] is the
//! boxed-future companion with a blanket impl, and [`BoxAsyncAction`] is the
//! shared handle nodes store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use flowline_types::error::ActionError;
use serde_json::Value;

use super::context::SharedContext;

/// What an asynchronous action resolves to.
pub type ActionOutcome = Result<Value, ActionError>;

// ---------------------------------------------------------------------------
// Synchronous actions and handlers
// ---------------------------------------------------------------------------

/// A synchronous leaf action. Implemented for every matching closure.
pub trait SyncAction: Send + Sync {
    fn call(&self, ctx: &SharedContext, attributes: &Value);
}

impl<F> SyncAction for F
where
    F: Fn(&SharedContext, &Value) + Send + Sync,
{
    fn call(&self, ctx: &SharedContext, attributes: &Value) {
        self(ctx, attributes)
    }
}

/// Runs with the success value of a Singular's action.
pub type SuccessHandler = Arc<dyn Fn(&SharedContext, &Value) + Send + Sync>;

/// Runs with the failure value of a Singular's action.
pub type FailureHandler = Arc<dyn Fn(&SharedContext, &ActionError) + Send + Sync>;

pub(crate) fn noop_sync() -> Arc<dyn SyncAction> {
    Arc::new(|_: &SharedContext, _: &Value| {})
}

pub(crate) fn noop_success() -> SuccessHandler {
    Arc::new(|_: &SharedContext, _: &Value| {})
}

pub(crate) fn noop_failure() -> FailureHandler {
    Arc::new(|_: &SharedContext, _: &ActionError| {})
}

// ---------------------------------------------------------------------------
// Asynchronous actions
// ---------------------------------------------------------------------------

/// An asynchronous leaf action.
///
/// The returned future must resolve exactly once; the engine awaits it and
/// routes the outcome. Any timeout or retry behaviour belongs inside the
/// action.
pub trait AsyncAction: Send + Sync {
    fn call(
        &self,
        ctx: SharedContext,
        attributes: Value,
    ) -> impl Future<Output = ActionOutcome> + Send;
}

/// Object-safe version of [`AsyncAction`] with a boxed future.
pub trait AsyncActionDyn: Send + Sync {
    fn call_boxed(
        &self,
        ctx: SharedContext,
        attributes: Value,
    ) -> Pin<Box<dyn Future<Output = ActionOutcome> + Send + '_>>;
}

impl<T: AsyncAction> AsyncActionDyn for T {
    fn call_boxed(
        &self,
        ctx: SharedContext,
        attributes: Value,
    ) -> Pin<Box<dyn Future<Output = ActionOutcome> + Send + '_>> {
        Box::pin(self.call(ctx, attributes))
    }
}

/// Shared, type-erased asynchronous action.
pub type BoxAsyncAction = Arc<dyn AsyncActionDyn>;

/// Adapter turning an async closure into an [`AsyncAction`].
///
/// ```ignore
/// let fetch = action_fn(|ctx, attrs| async move {
///     Ok(serde_json::json!({ "run": ctx.run_id().to_string(), "echo": attrs }))
/// });
/// ```
pub struct FnAction<F> {
    f: F,
}

pub fn action_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(SharedContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = ActionOutcome> + Send,
{
    FnAction { f }
}

impl<F, Fut> AsyncAction for FnAction<F>
where
    F: Fn(SharedContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = ActionOutcome> + Send,
{
    fn call(
        &self,
        ctx: SharedContext,
        attributes: Value,
    ) -> impl Future<Output = ActionOutcome> + Send {
        (self.f)(ctx, attributes)
    }
}
