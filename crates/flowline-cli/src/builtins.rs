//! Built-in actions available to flow definitions run from the CLI.
//!
//! Synchronous actions (plain nodes and terminal ends):
//! - `set` -- copy every key of the attribute object into the context
//! - `increment` -- add `by` (default 1) to the integer field `field`,
//!   saturating at the `i64` bounds
//! - `log` -- log `message` at info level
//! - `halt` -- cancel the rest of the flow
//!
//! Asynchronous actions (singular nodes):
//! - `echo` -- succeed with the attributes
//! - `sleep` -- wait `ms` milliseconds, then succeed with `value`
//! - `fail` -- fail with `message`, carrying the attributes as detail
//!
//! Handlers: `record` appends success values to `results`, `record_error`
//! appends failure messages to `errors`.

use std::time::Duration;

use flowline_core::flow::{ActionRegistry, SharedContext, action_fn};
use flowline_types::error::ActionError;
use serde_json::{Value, json};

pub fn builtin_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register_sync("set", set)
        .register_sync("increment", increment)
        .register_sync("log", log)
        .register_sync("halt", |ctx: &SharedContext, _: &Value| ctx.halt())
        .register_async("echo", action_fn(|_, attributes| async move { Ok(attributes) }))
        .register_async(
            "sleep",
            action_fn(|_, attributes: Value| async move {
                let ms = attributes.get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(attributes.get("value").cloned().unwrap_or(Value::Null))
            }),
        )
        .register_async(
            "fail",
            action_fn(|_, attributes: Value| async move {
                let message = attributes
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("action failed")
                    .to_string();
                Err(ActionError::new(message).with_detail(attributes))
            }),
        )
        .register_success("record", |ctx: &SharedContext, value: &Value| {
            append(ctx, "results", value.clone());
        })
        .register_failure("record_error", |ctx: &SharedContext, err: &ActionError| {
            append(ctx, "errors", json!(err.message));
        });
    registry
}

fn set(ctx: &SharedContext, attributes: &Value) {
    if let Some(fields) = attributes.as_object() {
        for (key, value) in fields {
            ctx.set(key.clone(), value.clone());
        }
    }
}

fn increment(ctx: &SharedContext, attributes: &Value) {
    let Some(field) = attributes.get("field").and_then(Value::as_str) else {
        tracing::warn!(run_id = %ctx.run_id(), "increment without a 'field' attribute");
        return;
    };
    let by = attributes.get("by").and_then(Value::as_i64).unwrap_or(1);
    let run_id = ctx.run_id();
    ctx.update(field, |current| {
        let current = current.and_then(Value::as_i64).unwrap_or(0);
        let next = current.checked_add(by).unwrap_or_else(|| {
            tracing::warn!(run_id = %run_id, field, by, "increment overflows, value saturated");
            current.saturating_add(by)
        });
        json!(next)
    });
}

fn log(ctx: &SharedContext, attributes: &Value) {
    let message = attributes
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    tracing::info!(run_id = %ctx.run_id(), text = message, "flow log");
}

fn append(ctx: &SharedContext, field: &str, value: Value) {
    ctx.update(field, |current| {
        let mut items = current
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        items.push(value);
        Value::Array(items)
    });
}
