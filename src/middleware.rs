//! Task and resource middleware: `next`-based chain composition around a
//! task's `run` or a resource's `init`/`dispose`.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::definition::{DependencyMap, Tag};
use crate::error::Result;
use crate::resolved::ResolvedDeps;

/// A boxed, `'static` future — the common erasure shape used throughout the
/// middleware chain and the type-erased task/resource boundaries.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Predicate controlling whether a middleware is auto-attached to every
/// task or resource (`everywhere` in the distilled model).
#[derive(Clone)]
pub enum Everywhere {
    /// Never auto-attached; must be listed explicitly on the target.
    Never,
    /// Always auto-attached.
    Always,
    /// Auto-attached when the predicate returns `true` for a given target id.
    Matching(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Everywhere {
    /// Whether this middleware auto-attaches to `target_id`.
    #[must_use]
    pub fn applies_to(&self, target_id: &str) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Matching(predicate) => predicate(target_id),
        }
    }
}

impl std::fmt::Debug for Everywhere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => f.write_str("Everywhere::Never"),
            Self::Always => f.write_str("Everywhere::Always"),
            Self::Matching(_) => f.write_str("Everywhere::Matching(..)"),
        }
    }
}

/// The continuation passed to a task middleware's `run`. Calling it forwards
/// (optionally transformed) input to the next layer of the chain — either
/// another middleware or the task's own `run`.
pub struct Next {
    inner: Box<dyn FnOnce(serde_json::Value) -> BoxFuture<Result<serde_json::Value>> + Send>,
}

impl Next {
    /// Build a continuation from a closure.
    pub fn new(
        f: impl FnOnce(serde_json::Value) -> BoxFuture<Result<serde_json::Value>> + Send + 'static,
    ) -> Self {
        Self { inner: Box::new(f) }
    }

    /// Invoke the continuation, forwarding `input` to the next layer.
    pub async fn call(self, input: serde_json::Value) -> Result<serde_json::Value> {
        (self.inner)(input).await
    }
}

/// Context visible to a task middleware around a single call.
pub struct TaskMiddlewareCall<'a> {
    /// The id of the task being invoked.
    pub task_id: &'a str,
    /// The resolved dependency view for the task (middleware may read it,
    /// but dependency injection for the middleware's own deps happens via
    /// [`TaskMiddleware::dependencies`]).
    pub task_deps: &'a ResolvedDeps,
    /// Append-only call journal shared across the whole chain.
    pub journal: &'a crate::task::Journal,
}

/// Middleware wrapping task execution (C8).
#[async_trait]
pub trait TaskMiddleware: Send + Sync + 'static {
    /// The middleware's unique id.
    fn id(&self) -> &str;

    /// Whether this middleware auto-attaches to every task.
    fn everywhere(&self) -> Everywhere {
        Everywhere::Never
    }

    /// Dependency map, resolved once at boot.
    fn dependencies(&self) -> DependencyMap {
        Vec::new()
    }

    /// Tags attached to this middleware.
    fn tags(&self) -> Vec<Arc<Tag>> {
        Vec::new()
    }

    /// Run around the task call. Must call `next.call(input)` to continue
    /// the chain, or return without calling it to short-circuit.
    async fn run(
        &self,
        call: &TaskMiddlewareCall<'_>,
        deps: &ResolvedDeps,
        next: Next,
    ) -> Result<serde_json::Value>;
}

/// A per-resource, per-task interceptor (§4.4 "Interceptors"): installed
/// against a specific task id rather than auto-attached by predicate, and
/// run before any `everywhere` middleware, in the order it was attached.
/// Shares `TaskMiddleware`'s `next`-chain shape since it wraps the same
/// call.
#[async_trait]
pub trait TaskInterceptor: Send + Sync + 'static {
    /// Run around the task call, ahead of every `everywhere` middleware.
    async fn call(
        &self,
        call: &TaskMiddlewareCall<'_>,
        deps: &ResolvedDeps,
        next: Next,
    ) -> Result<serde_json::Value>;
}

/// Bridges an attached [`TaskInterceptor`] into the `TaskMiddleware` chain
/// the task runner already knows how to compose.
pub(crate) struct InterceptorMiddleware {
    pub id: String,
    pub interceptor: Arc<dyn TaskInterceptor>,
}

#[async_trait]
impl TaskMiddleware for InterceptorMiddleware {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        call: &TaskMiddlewareCall<'_>,
        deps: &ResolvedDeps,
        next: Next,
    ) -> Result<serde_json::Value> {
        self.interceptor.call(call, deps, next).await
    }
}

/// The continuation passed to a resource middleware's `around_init`.
pub struct ResourceNext {
    inner: Box<dyn FnOnce() -> BoxFuture<Result<Arc<dyn Any + Send + Sync>>> + Send>,
}

impl ResourceNext {
    /// Build a continuation from a closure.
    pub fn new(
        f: impl FnOnce() -> BoxFuture<Result<Arc<dyn Any + Send + Sync>>> + Send + 'static,
    ) -> Self {
        Self { inner: Box::new(f) }
    }

    /// Invoke the continuation.
    pub async fn call(self) -> Result<Arc<dyn Any + Send + Sync>> {
        (self.inner)().await
    }
}

/// Middleware wrapping resource `init` (C9).
#[async_trait]
pub trait ResourceMiddleware: Send + Sync + 'static {
    /// The middleware's unique id.
    fn id(&self) -> &str;

    /// Whether this middleware auto-attaches to every resource.
    fn everywhere(&self) -> Everywhere {
        Everywhere::Never
    }

    /// Dependency map, resolved once at boot.
    fn dependencies(&self) -> DependencyMap {
        Vec::new()
    }

    /// Tags attached to this middleware.
    fn tags(&self) -> Vec<Arc<Tag>> {
        Vec::new()
    }

    /// Run around resource initialization.
    async fn around_init(
        &self,
        resource_id: &str,
        next: ResourceNext,
    ) -> Result<Arc<dyn Any + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everywhere_never_applies_to_nothing() {
        assert!(!Everywhere::Never.applies_to("anything"));
    }

    #[test]
    fn everywhere_always_applies_to_everything() {
        assert!(Everywhere::Always.applies_to("anything"));
    }

    #[test]
    fn everywhere_matching_uses_predicate() {
        let e = Everywhere::Matching(Arc::new(|id: &str| id.starts_with("admin.")));
        assert!(e.applies_to("admin.delete_user"));
        assert!(!e.applies_to("user.get"));
    }

    #[tokio::test]
    async fn next_forwards_transformed_input() {
        let next = Next::new(|input| {
            Box::pin(async move {
                let n = input.as_i64().unwrap_or(0);
                Ok(serde_json::json!(n + 1))
            })
        });
        let out = next.call(serde_json::json!(41)).await.unwrap();
        assert_eq!(out, serde_json::json!(42));
    }
}
