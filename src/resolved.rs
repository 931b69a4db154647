//! The resolved dependency view (`deps` parameter) handed to tasks,
//! resources, hooks, and middleware after the scheduler has wired up a
//! definition's dependency map.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::{DefId, ErrorHelperDef};
use crate::error::{Error, Result};
use crate::event_def::EventDef;
use crate::resource_def::ResourceHandle;
use crate::tag_index::TagAccessor;

/// One resolved dependency slot, tagged by the kind of definition it points
/// at (mirrors [`crate::definition::DependencyRef`]).
#[derive(Clone)]
pub enum ResolvedDependency {
    /// A resolved task handler, callable via [`crate::runtime::Runtime::run_task`]
    /// conventions but exposed here mainly for introspection (id, tags).
    Task(Arc<dyn crate::task::TaskHandler>),
    /// A resolved resource handle — may still be uninitialized under lazy
    /// init mode; callers use [`ResourceHandle::value`] / `value_as`.
    Resource(Arc<ResourceHandle>),
    /// A resolved event definition, for introspection or re-emission.
    Event(Arc<EventDef>),
    /// A resolved tag accessor, exposing every definition carrying the tag.
    Tag(TagAccessor),
    /// A resolved error helper.
    ErrorHelper(Arc<ErrorHelperDef>),
    /// A resolved async-context handle (the context id; reads/writes go
    /// through [`crate::async_context`]).
    AsyncContext(DefId),
}

/// The resolved view of a definition's dependency map, keyed by the local
/// binding name declared in [`crate::definition::DependencySpec::name`].
#[derive(Clone, Default)]
pub struct ResolvedDeps {
    slots: HashMap<String, ResolvedDependency>,
}

impl ResolvedDeps {
    /// An empty resolved view (used for root-level definitions with no
    /// dependencies, and in tests).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a resolved dependency under `name`.
    pub fn insert(&mut self, name: impl Into<String>, dep: ResolvedDependency) {
        self.slots.insert(name.into(), dep);
    }

    /// Look up a slot by name regardless of kind.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
        self.slots.get(name)
    }

    /// Number of bound slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slots are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn missing(name: &str) -> Error {
        Error::MissingDependency {
            consumer_id: String::new(),
            dependency_id: name.to_string(),
        }
    }

    /// Fetch a resource handle bound under `name`.
    pub fn resource(&self, name: &str) -> Result<&Arc<ResourceHandle>> {
        match self.slots.get(name) {
            Some(ResolvedDependency::Resource(h)) => Ok(h),
            _ => Err(Self::missing(name)),
        }
    }

    /// Fetch a task handler bound under `name`.
    pub fn task(&self, name: &str) -> Result<&Arc<dyn crate::task::TaskHandler>> {
        match self.slots.get(name) {
            Some(ResolvedDependency::Task(t)) => Ok(t),
            _ => Err(Self::missing(name)),
        }
    }

    /// Fetch an event definition bound under `name`.
    pub fn event(&self, name: &str) -> Result<&Arc<EventDef>> {
        match self.slots.get(name) {
            Some(ResolvedDependency::Event(e)) => Ok(e),
            _ => Err(Self::missing(name)),
        }
    }

    /// Fetch a tag accessor bound under `name`.
    pub fn tag(&self, name: &str) -> Result<&TagAccessor> {
        match self.slots.get(name) {
            Some(ResolvedDependency::Tag(t)) => Ok(t),
            _ => Err(Self::missing(name)),
        }
    }

    /// Fetch an error helper bound under `name`.
    pub fn error_helper(&self, name: &str) -> Result<&Arc<ErrorHelperDef>> {
        match self.slots.get(name) {
            Some(ResolvedDependency::ErrorHelper(e)) => Ok(e),
            _ => Err(Self::missing(name)),
        }
    }
}
