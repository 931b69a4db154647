//! The `Hook` definition kind: an event listener with its own dependency
//! closure but no middleware.
//!
//! Grounded on `crates/resource/src/hooks.rs`'s `ResourceHook`/`HookFilter`,
//! generalized from the teacher's 4 fixed `HookEvent` variants and
//! string-prefix `HookFilter` to arbitrary event ids (`on: "*" | id | [ids]`).

use std::sync::Arc;

use async_trait::async_trait;

use crate::definition::{DefId, DependencyMap, Tag};
use crate::error::Result;
use crate::event_manager::Emission;
use crate::resolved::ResolvedDeps;

/// Which events a hook listens to.
#[derive(Debug, Clone)]
pub enum HookTarget {
    /// Global listener — attached to every event.
    All,
    /// Listens to a single event id.
    One(DefId),
    /// Listens to several event ids.
    Many(Vec<DefId>),
}

impl HookTarget {
    /// Whether this target covers `event_id`.
    #[must_use]
    pub fn matches(&self, event_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::One(id) => id == event_id,
            Self::Many(ids) => ids.iter().any(|id| id == event_id),
        }
    }
}

/// Dependency-resolution state of a hook, tracked between registration and
/// listener attachment (§4.3 "Hook dependency computation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDependencyState {
    /// Not yet resolved.
    Pending,
    /// Resolution in progress.
    Computing,
    /// Resolved; eligible for listener attachment.
    Ready,
    /// A non-optional dependency could not be resolved; boot aborts.
    Error,
}

/// Typed, user-facing hook trait. Already object-safe (no associated
/// types), so no erasure boundary is needed — definitions are stored
/// directly as `Arc<dyn Hook>`.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// The hook's unique id.
    fn id(&self) -> &str;

    /// Which event(s) this hook listens to.
    fn on(&self) -> HookTarget;

    /// Dispatch order (lower runs first; ties broken by registration order).
    fn order(&self) -> i64 {
        0
    }

    /// Dependency map, resolved before the hook is attached as a listener.
    fn dependencies(&self) -> DependencyMap {
        Vec::new()
    }

    /// Tags attached to this hook.
    fn tags(&self) -> Vec<Arc<Tag>> {
        Vec::new()
    }

    /// Run the hook against a single event emission.
    async fn run(&self, emission: &Emission, deps: &ResolvedDeps) -> Result<()>;

    /// Same call, but permitted to hand back a value for
    /// [`crate::event_manager::EventManager::emit_with_result`] (§4.5).
    /// Defaults to running [`Self::run`] and discarding its `()`; hooks that
    /// actually want to participate in `emit_with_result` override this
    /// instead of (or in addition to) `run`.
    async fn run_with_result(
        &self,
        emission: &Emission,
        deps: &ResolvedDeps,
    ) -> Result<Option<serde_json::Value>> {
        self.run(emission, deps).await?;
        Ok(None)
    }
}
