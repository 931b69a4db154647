//! Scoped, async-propagating key/value frames — the "async context" channel
//! definitions can declare and tasks/hooks can read without threading an
//! explicit parameter through every call.
//!
//! Built on `tokio::task_local!` rather than a thread-local: under a
//! multi-threaded Tokio runtime, a task may suspend on one OS thread and
//! resume on another, so a plain `thread_local!` would silently lose the
//! frame across an `.await` point. `tokio::task_local!` is pinned to the
//! logical task instead.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::{DefId, Schema};
use crate::error::{Error, Result};

tokio::task_local! {
    static FRAME: HashMap<DefId, serde_json::Value>;
}

/// A declared async-context channel: an id, plus an optional schema its
/// provided values must satisfy.
pub struct AsyncContextDef {
    /// The context's unique id.
    pub id: DefId,
    /// Optional schema provided values must satisfy.
    pub value_schema: Option<Arc<dyn Schema>>,
}

impl AsyncContextDef {
    /// Declare a context with no value schema.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value_schema: None,
        }
    }

    /// Attach a value schema.
    #[must_use]
    pub fn with_value_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.value_schema = Some(schema);
        self
    }

    fn validate(&self, value: &serde_json::Value) -> Result<()> {
        if let Some(schema) = &self.value_schema
            && let Err(reason) = schema.validate(value)
        {
            return Err(Error::Validation {
                violations: vec![crate::error::FieldViolation::new(
                    self.id.clone(),
                    reason,
                    value.to_string(),
                )],
            });
        }
        Ok(())
    }
}

/// Run `body` with `id` bound to `value` for the duration of the future,
/// nesting on top of (and shadowing) any outer frame for the same id.
pub async fn provide<F, Fut, T>(def: &AsyncContextDef, value: serde_json::Value, body: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    def.validate(&value)?;
    let mut frame = FRAME
        .try_with(Clone::clone)
        .unwrap_or_default();
    frame.insert(def.id.clone(), value);
    Ok(FRAME.scope(frame, body()).await)
}

/// Read `id` from the current frame, if bound.
#[must_use]
pub fn use_ctx(id: &str) -> Option<serde_json::Value> {
    FRAME.try_with(|frame| frame.get(id).cloned()).ok().flatten()
}

/// Read `id` from the current frame, erroring if it is not bound.
pub fn require(id: &str) -> Result<serde_json::Value> {
    use_ctx(id).ok_or_else(|| Error::MiddlewareContextRequired {
        context_id: id.to_string(),
    })
}
