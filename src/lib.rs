#![allow(clippy::excessive_nesting)]

//! # forge-runtime
//!
//! Dependency-injection and execution runtime: tasks, resources, events,
//! hooks, and middleware wired together by one dependency graph, then
//! booted and disposed by a [`runtime::Runtime`].
//!
//! Definitions are registered through a [`store::RegistrationWriter`],
//! sealed into a [`store::Store`], and resolved once at boot — from then
//! on the store never changes, so every accessor is lock-free reads over
//! immutable maps plus a small set of `RwLock`-guarded resource values.

pub mod async_context;
pub mod definition;
pub mod dependency;
pub mod error;
pub mod event_def;
pub mod event_manager;
pub mod hook;
pub mod lifecycle;
pub mod middleware;
pub mod resolved;
pub mod resource_def;
pub mod runtime;
pub mod store;
pub mod tag_index;
pub mod task;
pub mod task_runner;

pub use definition::{
    DefId, DefKind, DependencyMap, DependencyRef, DependencySpec, ErrorHelperDef, Schema, Tag,
    TagContracts,
};
pub use dependency::{DependencyGraph, InitMode, Scheduler};
pub use error::{Error, FieldViolation, Result};
pub use event_def::EventDef;
pub use event_manager::{EmitReport, EventEmitOptions, EventManager, FailureMode};
pub use hook::{Hook, HookDependencyState, HookTarget};
pub use lifecycle::LifecycleState;
pub use middleware::{Everywhere, Next, ResourceMiddleware, TaskInterceptor, TaskMiddleware, TaskMiddlewareCall};
pub use resolved::{ResolvedDependency, ResolvedDeps};
pub use resource_def::{Resource, ResourceFactory, ResourceFactoryAdapter, ResourceGuard, ResourceHandle};
pub use runtime::{LogOptions, Runtime, RuntimeConfig, RunMode};
pub use store::{RegistrationWriter, Store};
pub use tag_index::{TagAccessor, TagIndex};
pub use task::{Journal, Task, TaskHandler, TaskWrapper};
pub use task_runner::TaskRunner;
