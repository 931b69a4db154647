//! The singleton `Resource` kind: long-lived values created once per
//! `Runtime` and disposed in dependents-first order at shutdown.
//!
//! Unlike the teacher's bb8-style pooled `Resource` trait, a resource here is
//! initialized **at most once** (invariant I4) — there is no acquire/release
//! cycle, only `init` and `dispose`.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::definition::{DefId, DependencyMap, Schema, Tag};
use crate::error::Result;
use crate::resolved::ResolvedDeps;

/// Typed, user-facing resource trait.
///
/// `Config` is deserialized from the value passed to `.with(config)` at
/// registration time; `Value` is the resource's initialized value, shared
/// via `Arc` with every consumer.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Config type, deserialized from the registration-time config value.
    type Config: Send + Sync + 'static;
    /// The value produced by `init` and handed to dependents.
    type Value: Send + Sync + 'static;

    /// The resource's unique id.
    fn id(&self) -> &str;

    /// Dependency map, resolved before `init` runs.
    fn dependencies(&self) -> DependencyMap {
        Vec::new()
    }

    /// Tags attached to this resource.
    fn tags(&self) -> Vec<Arc<Tag>> {
        Vec::new()
    }

    /// Task ids this resource tunnels, each paired with the id of the
    /// transport task (also registered, typically by this same resource)
    /// that actually carries out the call. Registering two resources that
    /// both claim the same tunneled task id is fatal (invariant P8).
    fn tunnels(&self) -> Vec<(DefId, DefId)> {
        Vec::new()
    }

    /// Validate a config value before `init` is called. Defaults to success.
    fn validate_config(&self, _config: &Self::Config) -> Result<()> {
        Ok(())
    }

    /// A structural, JSON view of an `init`-produced value, used to check it
    /// against any I7 output contract carried by this resource's tags.
    /// Defaults to `None` (no view available) for resource values that
    /// aren't meaningfully JSON-representable (a database pool handle, a
    /// socket) — such resources simply opt out of output-contract checking.
    fn contract_view(&self, _value: &Self::Value) -> Option<serde_json::Value> {
        None
    }

    /// Initialize the resource's value.
    async fn init(&self, config: &Self::Config, deps: &ResolvedDeps) -> Result<Self::Value>;

    /// Dispose of the resource's value. Defaults to a no-op drop.
    async fn dispose(&self, _value: Self::Value) -> Result<()> {
        Ok(())
    }
}

/// Type-erased bridge from a typed [`Resource`] to the runtime's
/// `serde_json::Value`-based registry.
///
/// Grounded on `ResourceFactory` from the teacher's older `core/resource.rs`
/// generation: `create_instance` takes a JSON config and the resolved
/// dependency map and returns an `Arc<dyn Any + Send + Sync>`.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    /// The resource's unique id.
    fn id(&self) -> &str;

    /// Dependency map, as declared by the underlying resource.
    fn dependencies(&self) -> &DependencyMap;

    /// Tags attached to the underlying resource.
    fn tags(&self) -> &[Arc<Tag>];

    /// Tunneled task id -> transport task id pairs this resource claims.
    fn tunnels(&self) -> &[(DefId, DefId)];

    /// Initialize the resource, returning a type-erased value.
    async fn init_any(
        &self,
        config: serde_json::Value,
        deps: &ResolvedDeps,
    ) -> Result<Arc<dyn Any + Send + Sync>>;

    /// Dispose of a previously-initialized type-erased value.
    async fn dispose_any(&self, value: Arc<dyn Any + Send + Sync>) -> Result<()>;
}

/// Adapter from a typed `R: Resource` to the erased [`ResourceFactory`].
pub struct ResourceFactoryAdapter<R: Resource> {
    /// The wrapped typed resource.
    pub resource: R,
    /// Its config, captured at registration time (already validated).
    pub config: R::Config,
    deps: DependencyMap,
    tags: Vec<Arc<Tag>>,
    tunnels: Vec<(DefId, DefId)>,
}

impl<R: Resource> ResourceFactoryAdapter<R> {
    /// Wrap a resource with its registration-time config.
    pub fn new(resource: R, config: R::Config) -> Self {
        let deps = resource.dependencies();
        let tags = resource.tags();
        let tunnels = resource.tunnels();
        Self {
            resource,
            config,
            deps,
            tags,
            tunnels,
        }
    }
}

#[async_trait]
impl<R: Resource> ResourceFactory for ResourceFactoryAdapter<R> {
    fn id(&self) -> &str {
        self.resource.id()
    }

    fn dependencies(&self) -> &DependencyMap {
        &self.deps
    }

    fn tags(&self) -> &[Arc<Tag>] {
        &self.tags
    }

    fn tunnels(&self) -> &[(DefId, DefId)] {
        &self.tunnels
    }

    async fn init_any(
        &self,
        config: serde_json::Value,
        deps: &ResolvedDeps,
    ) -> Result<Arc<dyn Any + Send + Sync>> {
        validate_tag_contracts(&self.tags, &config, |c| c.input.as_ref())?;
        self.resource.validate_config(&self.config)?;
        let value = self.resource.init(&self.config, deps).await?;
        if let Some(view) = self.resource.contract_view(&value) {
            validate_tag_contracts(&self.tags, &view, |c| c.output.as_ref())?;
        }
        Ok(Arc::new(value) as Arc<dyn Any + Send + Sync>)
    }

    async fn dispose_any(&self, value: Arc<dyn Any + Send + Sync>) -> Result<()> {
        match Arc::try_unwrap(value) {
            Ok(boxed) => {
                let typed = *boxed
                    .downcast::<R::Value>()
                    .map_err(|_| crate::error::Error::Internal {
                        message: format!("resource '{}': value type mismatch on dispose", self.id()),
                        source: None,
                    })?;
                self.resource.dispose(typed).await
            }
            Err(_) => Err(crate::error::Error::Dispose {
                resource_id: self.id().to_string(),
                reason: "value still has outstanding references at dispose time".into(),
                source: None,
            }),
        }
    }
}

/// Validates `value` against every contract schema `pick` selects off
/// `tags`'s carried tags — invariant I7's "intersection of all contracts":
/// a resource carrying several contract-bearing tags must satisfy each one.
fn validate_tag_contracts(
    tags: &[Arc<Tag>],
    value: &serde_json::Value,
    pick: impl Fn(&crate::definition::TagContracts) -> Option<&Arc<dyn Schema>>,
) -> Result<()> {
    let violations: Vec<_> = tags
        .iter()
        .filter_map(|tag| {
            let schema = pick(&tag.contracts)?;
            schema
                .validate(value)
                .err()
                .map(|reason| crate::error::FieldViolation::new(tag.id.clone(), reason, value.to_string()))
        })
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(crate::error::Error::Validation { violations })
    }
}

/// A live handle to a resource's current state, held by the [`Store`] and
/// handed out through [`crate::resolved::ResolvedDependency::Resource`].
///
/// `value()` returns `None` until the resource has been initialized (lazy
/// mode, invariant/property P7), after which it is cheap to clone.
pub struct ResourceHandle {
    /// The resource's id.
    pub id: DefId,
    /// The factory used to (re-)initialize this resource.
    pub factory: Arc<dyn ResourceFactory>,
    value: Arc<parking_lot::RwLock<Option<Arc<dyn Any + Send + Sync>>>>,
    state: Arc<parking_lot::RwLock<crate::lifecycle::LifecycleState>>,
}

impl ResourceHandle {
    /// Create a new, uninitialized handle.
    #[must_use]
    pub fn new(id: DefId, factory: Arc<dyn ResourceFactory>) -> Self {
        Self {
            id,
            factory,
            value: Arc::new(parking_lot::RwLock::new(None)),
            state: Arc::new(parking_lot::RwLock::new(crate::lifecycle::LifecycleState::Created)),
        }
    }

    /// The resource's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> crate::lifecycle::LifecycleState {
        *self.state.read()
    }

    /// Whether `init` has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.value.read().is_some()
    }

    /// The type-erased current value, if initialized.
    #[must_use]
    pub fn value(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.value.read().clone()
    }

    /// Typed accessor over the current value. Returns `None` if not
    /// initialized or if `T` does not match the stored type.
    #[must_use]
    pub fn value_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.value()
            .and_then(|v| Arc::downcast::<T>(v).ok())
    }

    /// Initialize the resource, storing the resulting value.
    pub async fn init(&self, config: serde_json::Value, deps: &ResolvedDeps) -> Result<()> {
        *self.state.write() = crate::lifecycle::LifecycleState::Initializing;
        match self.factory.init_any(config, deps).await {
            Ok(value) => {
                *self.value.write() = Some(value);
                *self.state.write() = crate::lifecycle::LifecycleState::Ready;
                Ok(())
            }
            Err(err) => {
                *self.state.write() = crate::lifecycle::LifecycleState::Failed;
                Err(err)
            }
        }
    }

    /// Dispose of the resource's value, if initialized.
    pub async fn dispose(&self) -> Result<()> {
        let value = self.value.write().take();
        let Some(value) = value else {
            return Ok(());
        };
        *self.state.write() = crate::lifecycle::LifecycleState::Cleanup;
        let result = self.factory.dispose_any(value).await;
        *self.state.write() = crate::lifecycle::LifecycleState::Terminated;
        result
    }
}

/// RAII guard returned from `Runtime::get_resource_value`, preventing
/// accidental use of a released handle.
///
/// Grounded on `crates/resource/src/guard.rs`'s `Guard<T>`, trimmed to the
/// simpler "shared value, no drop-to-pool callback" shape singleton
/// resources need (there is nothing to return — only pooled resources, out
/// of scope here, recycle on drop).
pub struct ResourceGuard<T> {
    value: Arc<T>,
}

impl<T> ResourceGuard<T> {
    /// Wrap an already-resolved value.
    #[must_use]
    pub fn new(value: Arc<T>) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for ResourceGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}
