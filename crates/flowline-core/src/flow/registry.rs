//! Name-indexed registry of leaf actions and handlers.
//!
//! Declarative flow definitions refer to their work by name; the registry
//! maps those names to the functions the engine calls.

use std::collections::HashMap;
use std::sync::Arc;

use flowline_types::error::{ActionError, DefinitionError};
use serde_json::Value;

use super::action::{AsyncAction, BoxAsyncAction, FailureHandler, SuccessHandler, SyncAction};
use super::context::SharedContext;

/// Registry of actions, handlers and terminal end functions, indexed by name.
///
/// Registering a name twice within one category replaces the earlier entry.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    sync_actions: HashMap<String, Arc<dyn SyncAction>>,
    async_actions: HashMap<String, BoxAsyncAction>,
    success_handlers: HashMap<String, SuccessHandler>,
    failure_handlers: HashMap<String, FailureHandler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous action, usable by plain nodes and as a terminal end.
    pub fn register_sync<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(&SharedContext, &Value) + Send + Sync + 'static,
    {
        self.sync_actions.insert(name.into(), Arc::new(action));
        self
    }

    pub fn register_async<A: AsyncAction + 'static>(
        &mut self,
        name: impl Into<String>,
        action: A,
    ) -> &mut Self {
        self.async_actions.insert(name.into(), Arc::new(action));
        self
    }

    pub fn register_success<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&SharedContext, &Value) + Send + Sync + 'static,
    {
        self.success_handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn register_failure<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&SharedContext, &ActionError) + Send + Sync + 'static,
    {
        self.failure_handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn sync_action(&self, name: &str) -> Result<Arc<dyn SyncAction>, DefinitionError> {
        lookup(&self.sync_actions, "action", name)
    }

    pub fn async_action(&self, name: &str) -> Result<BoxAsyncAction, DefinitionError> {
        lookup(&self.async_actions, "async action", name)
    }

    pub fn success_handler(&self, name: &str) -> Result<SuccessHandler, DefinitionError> {
        lookup(&self.success_handlers, "success handler", name)
    }

    pub fn failure_handler(&self, name: &str) -> Result<FailureHandler, DefinitionError> {
        lookup(&self.failure_handlers, "failure handler", name)
    }

    /// All registered names per category, sorted.
    pub fn list_names(&self) -> RegistryListing {
        RegistryListing {
            actions: sorted_keys(&self.sync_actions),
            async_actions: sorted_keys(&self.async_actions),
            success_handlers: sorted_keys(&self.success_handlers),
            failure_handlers: sorted_keys(&self.failure_handlers),
        }
    }
}

/// Snapshot of the names known to an [`ActionRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryListing {
    pub actions: Vec<String>,
    pub async_actions: Vec<String>,
    pub success_handlers: Vec<String>,
    pub failure_handlers: Vec<String>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("names", &self.list_names())
            .finish()
    }
}

fn lookup<T: Clone>(
    map: &HashMap<String, T>,
    kind: &'static str,
    name: &str,
) -> Result<T, DefinitionError> {
    map.get(name).cloned().ok_or_else(|| DefinitionError::UnknownName {
        kind,
        name: name.to_string(),
    })
}

fn sorted_keys<T>(map: &HashMap<String, T>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}
