//! Shared execution context threaded through every node of a flow run.
//!
//! `SharedContext` holds the cooperative cancellation signal, the caller's
//! free-form fields and the read-only environment handles leaf actions need.
//! Cloning produces a shared view of the same run (everything is `Arc`-backed),
//! so concurrent Parallel branches all observe one context.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Named, read-only capability handles made visible to leaf actions.
///
/// The engine never inspects these; it only carries them. Handles are looked
/// up by name and downcast to the type the action expects.
#[derive(Clone, Default)]
pub struct Environment {
    handles: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under `name`, replacing any previous one.
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, handle: T) -> Self {
        self.handles.insert(name.into(), Arc::new(handle));
        self
    }

    /// Fetch the handle registered under `name` if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.handles
            .get(name)
            .and_then(|handle| Arc::clone(handle).downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Registered handle names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("handles", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SharedContext
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ContextInner {
    run_id: Uuid,
    fields: DashMap<String, Value>,
    cancellation: CancellationToken,
    environment: Environment,
}

/// Mutable state shared by every node of one flow execution.
///
/// Field reads return cloned values so no `DashMap` guard outlives the call;
/// never hold one across an `.await`. The engine does not serialize access to
/// caller fields beyond single-key atomicity: actions that need a consistent
/// read-modify-write use [`SharedContext::update`].
#[derive(Debug, Clone)]
pub struct SharedContext {
    inner: Arc<ContextInner>,
}

impl SharedContext {
    /// Seed a context for a run. `continue_operation()` starts out true.
    pub fn new(run_id: Uuid, fields: Map<String, Value>, environment: Environment) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id,
                fields: fields.into_iter().collect(),
                cancellation: CancellationToken::new(),
                environment,
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// Whether the flow may still proceed along normal continuations.
    ///
    /// Monotone: once false it never becomes true again for this run.
    pub fn continue_operation(&self) -> bool {
        !self.inner.cancellation.is_cancelled()
    }

    /// Flip `continue_operation` to false for every node of this run.
    ///
    /// In-flight leaf work is not interrupted; each node observes the signal
    /// at its next decision point.
    pub fn halt(&self) {
        self.inner.cancellation.cancel();
    }

    /// The underlying token, for leaf actions that want to `select!` on it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    pub fn environment(&self) -> &Environment {
        &self.inner.environment
    }

    /// Get a cloned copy of the field at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.fields.get(key).map(|r| r.value().clone())
    }

    /// Insert or overwrite a field, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.fields.insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.fields.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.fields.contains_key(key)
    }

    /// Atomically replace a field with `f(current)` and return the new value.
    ///
    /// `current` is `None` only when the key is absent; a stored JSON `null`
    /// arrives as `Some(&Value::Null)`. The shard lock for `key` is held while `f` runs, so `f` must not touch
    /// the context itself.
    pub fn update<F>(&self, key: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        match self.inner.fields.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = f(Some(entry.get()));
                entry.insert(next.clone());
                next
            }
            Entry::Vacant(entry) => {
                let next = f(None);
                entry.insert(next.clone());
                next
            }
        }
    }

    /// Snapshot of all current keys.
    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.iter().map(|r| r.key().clone()).collect()
    }

    /// Copy of every field, for reporting once the run is over.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner
            .fields
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.fields.is_empty()
    }
}
