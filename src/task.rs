//! The `Task` definition kind: an invocable unit of work with typed
//! input/output, bridged to a type-erased handler for storage in the
//! [`crate::store::Store`].
//!
//! Grounded on the `action` crate's `Action`/`InternalHandler` split: a
//! typed trait implementors write against, erased via `serde_json::Value`
//! at the registry boundary so `Arc<dyn TaskHandler>` can be stored
//! uniformly regardless of the concrete input/output types.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::definition::{DefId, DependencyMap, Schema, Tag};
use crate::error::{Error, Result};
use crate::resolved::ResolvedDeps;

/// Typed, user-facing task trait.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Input type, deserialized from the caller-supplied JSON value.
    type Input: serde::de::DeserializeOwned + Send + Sync + 'static;
    /// Output type, serialized back to JSON for the caller.
    type Output: Serialize + Send + Sync + 'static;

    /// The task's unique id.
    fn id(&self) -> &str;

    /// Dependency map, resolved before `run` is called.
    fn dependencies(&self) -> DependencyMap {
        Vec::new()
    }

    /// Tags attached to this task.
    fn tags(&self) -> Vec<Arc<Tag>> {
        Vec::new()
    }

    /// Optional schema the input must satisfy, checked before `run`.
    fn input_schema(&self) -> Option<Arc<dyn Schema>> {
        None
    }

    /// Optional schema the output must satisfy, checked after `run`.
    fn result_schema(&self) -> Option<Arc<dyn Schema>> {
        None
    }

    /// Run the task.
    async fn run(&self, input: Self::Input, deps: &ResolvedDeps) -> Result<Self::Output>;
}

/// A single entry in a task call's journal — one line per middleware layer
/// or the task body itself, in the order they ran.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JournalEntry {
    /// Which layer produced this entry (a middleware id, or `"task"`).
    pub layer: String,
    /// Free-form note recorded by the layer.
    pub note: String,
}

/// Append-only record of a single task call, shared across its whole
/// middleware chain.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    /// A fresh, empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, layer: impl Into<String>, note: impl Into<String>) {
        self.entries.lock().push(JournalEntry {
            layer: layer.into(),
            note: note.into(),
        });
    }

    /// A snapshot of every entry recorded so far, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }
}

/// Type-erased bridge from a typed [`Task`] to the runtime's
/// `serde_json::Value`-based registry and middleware chain.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task's unique id.
    fn id(&self) -> &str;

    /// Dependency map, as declared by the underlying task.
    fn dependencies(&self) -> &DependencyMap;

    /// Tags attached to the underlying task.
    fn tags(&self) -> &[Arc<Tag>];

    /// Validate a raw JSON input against the underlying task's input schema.
    fn validate_input(&self, input: &serde_json::Value) -> Result<()>;

    /// Validate a raw JSON result against the underlying task's result
    /// schema.
    fn validate_result(&self, result: &serde_json::Value) -> Result<()>;

    /// Run the task body against a raw JSON input, returning a raw JSON
    /// result. Schema checks are the caller's responsibility (the task
    /// runner calls `validate_input`/`validate_result` around this).
    async fn run_any(
        &self,
        input: serde_json::Value,
        deps: &ResolvedDeps,
    ) -> Result<serde_json::Value>;
}

/// Adapter from a typed `T: Task` to the erased [`TaskHandler`].
pub struct TaskWrapper<T: Task> {
    task: T,
    deps: DependencyMap,
    tags: Vec<Arc<Tag>>,
}

impl<T: Task> TaskWrapper<T> {
    /// Wrap a task, capturing its dependency map and tags up front.
    pub fn new(task: T) -> Self {
        let deps = task.dependencies();
        let tags = task.tags();
        Self { task, deps, tags }
    }
}

#[async_trait]
impl<T: Task> TaskHandler for TaskWrapper<T> {
    fn id(&self) -> &str {
        self.task.id()
    }

    fn dependencies(&self) -> &DependencyMap {
        &self.deps
    }

    fn tags(&self) -> &[Arc<Tag>] {
        &self.tags
    }

    fn validate_input(&self, input: &serde_json::Value) -> Result<()> {
        if let Some(schema) = self.task.input_schema()
            && let Err(reason) = schema.validate(input)
        {
            return Err(Error::InputValidation {
                task_id: self.id().to_string(),
                reason,
            });
        }
        Ok(())
    }

    fn validate_result(&self, result: &serde_json::Value) -> Result<()> {
        if let Some(schema) = self.task.result_schema()
            && let Err(reason) = schema.validate(result)
        {
            return Err(Error::ResultValidation {
                task_id: self.id().to_string(),
                reason,
            });
        }
        Ok(())
    }

    async fn run_any(
        &self,
        input: serde_json::Value,
        deps: &ResolvedDeps,
    ) -> Result<serde_json::Value> {
        let typed_input: T::Input =
            serde_json::from_value(input).map_err(|e| Error::InputValidation {
                task_id: self.id().to_string(),
                reason: e.to_string(),
            })?;
        let output = self.task.run(typed_input, deps).await?;
        serde_json::to_value(output).map_err(|e| Error::ResultValidation {
            task_id: self.id().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Describes a single tunnel declared by a task — a named pass-through
/// channel another task may override at call time (distilled "task
/// tunneling" behavior).
#[derive(Debug, Clone)]
pub struct TaskTunnel {
    /// The owning task's id.
    pub task_id: DefId,
    /// The tunnel's name, unique within the owning task.
    pub name: String,
    /// Whether a caller is permitted to override this tunnel's value.
    pub overridable: bool,
}
