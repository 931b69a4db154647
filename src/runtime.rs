//! Boot and shutdown orchestration: seals the store, resolves every
//! definition's dependency map, drives resource initialization per
//! [`crate::dependency::InitMode`], and exposes the external accessor API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::definition::{DefId, DependencyRef};
use crate::dependency::{InitMode, Scheduler};
use crate::error::{Error, Result};
use crate::event_def::EventDef;
use crate::event_manager::{EmitReport, EventEmitOptions, EventManager};
use crate::resolved::{ResolvedDependency, ResolvedDeps};
use crate::resource_def::ResourceHandle;
use crate::store::{RegistrationWriter, Store};
use crate::task_runner::TaskRunner;

/// Which environment a [`Runtime`] is booting into (§6). Affects only the
/// defaults a caller is likely to want; every field of [`RuntimeConfig`]
/// can still be set explicitly regardless of `mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Local development: verbose logs, no signal handler by default.
    #[default]
    Dev,
    /// Production: quieter logs, shutdown hooks on by default.
    Prod,
    /// Test harnesses: debug logging off, signal handler never installed.
    Test,
}

/// Logging configuration (§6), consumed by callers that install their own
/// `tracing` subscriber — the runtime itself only emits `tracing` events at
/// `warn`/`debug` and never installs a global subscriber.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Minimum level a caller's subscriber should keep (`"warn"`, `"info"`,
    /// `"debug"`, ...), as an `EnvFilter`-compatible directive string.
    pub level: String,
    /// Whether structured (JSON) log formatting is requested.
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Boot-time configuration for a [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How resources are initialized at boot.
    pub init_mode: InitMode,
    /// Maximum time `dispose` waits for any single resource's `dispose` call.
    pub shutdown_timeout: Duration,
    /// Whether to install an OS signal handler that triggers `dispose` on
    /// `SIGINT`/`ctrl_c`. Named `shutdown_hooks` in §6; kept as
    /// `install_signal_handler` here since that is exactly what it does.
    pub install_signal_handler: bool,
    /// Verbose `tracing::debug!` output at boot/dispose boundaries.
    pub debug: bool,
    /// Logging configuration handed to callers that wire up their own
    /// subscriber.
    pub logs: LogOptions,
    /// Whether a failing resource's `init` aborts the whole boot (`false`,
    /// the default) or is caught and surfaced only as a `warn` log with the
    /// resource left uninitialized (`true`).
    pub error_boundary: bool,
    /// When set, `Runtime::boot` walks the init order and logs what it
    /// would initialize, in order, without calling any resource's `init`.
    /// The returned `Runtime` has every resource left uninitialized.
    pub dry_run: bool,
    /// Whether `EventManager` cycle detection (§4.5) is active. Disabling
    /// this is a deliberate escape hatch for callers with a known-safe
    /// re-entrant emission graph; defaults to `true`.
    pub runtime_event_cycle_detection: bool,
    /// The environment this runtime is booting into.
    pub mode: RunMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            init_mode: InitMode::Sequential,
            shutdown_timeout: Duration::from_secs(30),
            install_signal_handler: false,
            debug: false,
            logs: LogOptions::default(),
            error_boundary: false,
            dry_run: false,
            runtime_event_cycle_detection: true,
            mode: RunMode::Dev,
        }
    }
}

/// The booted runtime: a sealed store, a live event manager, and a task
/// runner, wired together by one resolved-dependency pass.
pub struct Runtime {
    root_id: DefId,
    store: Arc<Store>,
    events: Arc<EventManager>,
    runner: Arc<TaskRunner>,
    resolved: Arc<HashMap<DefId, ResolvedDeps>>,
    resource_configs: HashMap<DefId, serde_json::Value>,
    config: RuntimeConfig,
    hook_dependency_states: Arc<HashMap<DefId, crate::hook::HookDependencyState>>,
}

impl Runtime {
    /// Seal `writer`, resolve every dependency map, attach hooks as event
    /// listeners, and initialize resources per `config.init_mode`.
    ///
    /// # Errors
    /// Returns any error raised while sealing the store (duplicate id,
    /// missing dependency, cycle) or while initializing a resource under
    /// `Sequential`/`Parallel` modes.
    pub async fn boot(
        root_id: impl Into<String>,
        writer: RegistrationWriter,
        resource_configs: HashMap<DefId, serde_json::Value>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        #[cfg(feature = "tracing")]
        if config.debug {
            tracing::debug!(mode = ?config.mode, "booting runtime");
        }

        let store = Arc::new(writer.seal()?);
        let resolved = Arc::new(resolve_all(&store));

        let events = Arc::new(EventManager::with_cycle_detection(config.runtime_event_cycle_detection));
        let mut hook_dependency_states = HashMap::new();
        for hook in store.hooks() {
            let id = hook.id().to_string();
            hook_dependency_states.insert(id.clone(), crate::hook::HookDependencyState::Computing);
            let deps = resolved.get(&id).cloned().unwrap_or_default();

            // Resolution itself already ran in `resolve_all`; here we check
            // that every non-optional dependency the hook declared actually
            // came back, so a missing one fails this specific hook rather
            // than reporting a generic store-wide error.
            if let Some(missing) = hook
                .dependencies()
                .iter()
                .find(|dep| !dep.optional && deps.get(&dep.name).is_none())
            {
                hook_dependency_states.insert(id.clone(), crate::hook::HookDependencyState::Error);
                return Err(Error::MissingDependency {
                    consumer_id: id,
                    dependency_id: missing.reference.id().to_string(),
                });
            }

            hook_dependency_states.insert(id, crate::hook::HookDependencyState::Ready);
            events.register_hook(Arc::clone(hook), deps);
        }
        let hook_dependency_states = Arc::new(hook_dependency_states);

        let resource_ids = store.resource_ids();
        let ordered = store.graph().topological_sort().unwrap_or_default();
        let init_order: Vec<DefId> = ordered
            .into_iter()
            .filter(|id| resource_ids.contains(id))
            .collect();
        // Resources with no dependency edges never show up in the graph.
        let init_order = {
            let mut seen: std::collections::HashSet<DefId> = init_order.iter().cloned().collect();
            let mut out = init_order;
            for id in &resource_ids {
                if seen.insert(id.clone()) {
                    out.push(id.clone());
                }
            }
            out
        };

        if config.dry_run {
            #[cfg(feature = "tracing")]
            tracing::debug!(?init_order, "dry_run: skipping resource initialization");
            #[cfg(not(feature = "tracing"))]
            let _ = &init_order;
        } else {
            let scheduler = Scheduler::new(store.graph().clone());
            let error_boundary = config.error_boundary;
            let store = Arc::clone(&store);
            let resolved = Arc::clone(&resolved);
            let resource_configs = resource_configs.clone();
            scheduler
                .run_init(&init_order, config.init_mode, move |id| {
                    let store = Arc::clone(&store);
                    let resolved = Arc::clone(&resolved);
                    let value = resource_configs.get(&id).cloned().unwrap_or(serde_json::Value::Null);
                    async move {
                        let Some(handle) = store.resource(&id) else {
                            return Ok(());
                        };
                        let deps = resolved.get(&id).cloned().unwrap_or_default();
                        let result = handle.init(value, &deps).await;
                        if error_boundary {
                            if let Err(_err) = &result {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(resource_id = %id, error = %_err, "resource init failed, continuing (error_boundary)");
                                return Ok(());
                            }
                        }
                        result
                    }
                })
                .await?;
        }

        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&store),
            Arc::clone(&events),
            Arc::clone(&resolved),
            store.tunnels().clone(),
        ));

        let runtime = Self {
            root_id: root_id.into(),
            store,
            events,
            runner,
            resolved,
            resource_configs,
            config,
            hook_dependency_states,
        };

        if runtime.config.install_signal_handler {
            runtime.install_shutdown_hook();
        }

        Ok(runtime)
    }

    fn install_shutdown_hook(&self) {
        let store = Arc::clone(&self.store);
        let timeout = self.config.shutdown_timeout;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = dispose_store(&store, timeout).await;
            }
        });
    }

    /// Run a task by id.
    pub async fn run_task(&self, task_id: &str, input: serde_json::Value) -> Result<serde_json::Value> {
        self.runner.run(task_id, input).await
    }

    /// Emit an event by id.
    pub async fn emit_event(
        &self,
        event_id: &str,
        payload: serde_json::Value,
        options: &EventEmitOptions,
    ) -> Result<EmitReport> {
        let event = self
            .store
            .event(event_id)
            .ok_or_else(|| Error::NotFound {
                kind: "event".to_string(),
                id: event_id.to_string(),
            })?;
        self.events.emit(event, payload, options).await
    }

    /// The current value of a resource, initializing it first if
    /// `init_mode` is `Lazy` and it has not run yet.
    pub async fn get_resource_value<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>> {
        let handle = self.resource_handle(id)?;
        if !handle.is_initialized() {
            self.init_resource_now(id, &handle).await?;
        }
        handle
            .value_as::<T>()
            .ok_or_else(|| Error::NotFound {
                kind: "resource".to_string(),
                id: id.to_string(),
            })
    }

    /// Explicitly trigger lazy initialization of a resource, returning its
    /// value. Equivalent to `get_resource_value` but named for call sites
    /// that want to make the laziness visible.
    pub async fn get_lazy_resource_value<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>> {
        self.get_resource_value(id).await
    }

    /// The raw JSON config a resource was registered with.
    #[must_use]
    pub fn get_resource_config(&self, id: &str) -> Option<&serde_json::Value> {
        self.resource_configs.get(id)
    }

    /// A hook's dependency-resolution state as computed at boot (`Ready`
    /// once its dependency map resolved cleanly and it was attached as a
    /// listener). `None` if no hook with this id was ever registered.
    #[must_use]
    pub fn hook_dependency_state(&self, hook_id: &str) -> Option<crate::hook::HookDependencyState> {
        self.hook_dependency_states.get(hook_id).copied()
    }

    /// The root resource's id, as passed to [`Runtime::boot`].
    #[must_use]
    pub fn get_root_id(&self) -> &str {
        &self.root_id
    }

    /// The root resource's config, if it is itself a registered resource.
    #[must_use]
    pub fn get_root_config(&self) -> Option<&serde_json::Value> {
        self.get_resource_config(&self.root_id)
    }

    /// The root resource's current value.
    pub async fn get_root_value<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let root_id = self.root_id.clone();
        self.get_resource_value(&root_id).await
    }

    fn resource_handle(&self, id: &str) -> Result<Arc<ResourceHandle>> {
        self.store
            .resource(id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "resource".to_string(),
                id: id.to_string(),
            })
    }

    /// Initialize `id` and, first, any not-yet-initialized resource in its
    /// transitive dependency closure, dependencies before dependents.
    async fn init_resource_now(&self, id: &str, handle: &Arc<ResourceHandle>) -> Result<()> {
        let resource_ids = self.store.resource_ids();
        let closure = self.store.graph().get_init_order(id)?;

        for dep_id in closure.iter().filter(|dep_id| resource_ids.contains(*dep_id)) {
            let Some(dep_handle) = self.store.resource(dep_id) else {
                continue;
            };
            if dep_handle.is_initialized() {
                continue;
            }
            let deps = self.resolved.get(dep_id).cloned().unwrap_or_default();
            let config = self.resource_configs.get(dep_id).cloned().unwrap_or(serde_json::Value::Null);
            dep_handle.init(config, &deps).await?;
        }

        if handle.is_initialized() {
            return Ok(());
        }
        let deps = self.resolved.get(id).cloned().unwrap_or_default();
        let config = self.resource_configs.get(id).cloned().unwrap_or(serde_json::Value::Null);
        handle.init(config, &deps).await
    }

    /// Dispose every initialized resource, dependents before their
    /// dependencies.
    ///
    /// # Errors
    /// Returns the first disposal error encountered; every resource is
    /// still attempted.
    pub async fn dispose(&self) -> Result<()> {
        dispose_store(&self.store, self.config.shutdown_timeout).await
    }
}

async fn dispose_store(store: &Arc<Store>, timeout: Duration) -> Result<()> {
    let resource_ids = store.resource_ids();
    let mut order = store
        .graph()
        .topological_sort()
        .unwrap_or_default()
        .into_iter()
        .filter(|id| resource_ids.contains(id))
        .collect::<Vec<_>>();
    for id in &resource_ids {
        if !order.contains(id) {
            order.push(id.clone());
        }
    }
    // Dependents-first: reverse the dependencies-first init order.
    order.reverse();

    let mut first_err = None;
    for id in order {
        let Some(handle) = store.resource(&id) else {
            continue;
        };
        match tokio::time::timeout(timeout, handle.dispose()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => first_err.get_or_insert(err),
            Err(_) => first_err.get_or_insert(Error::Timeout {
                resource_id: id.clone(),
                timeout_ms: timeout.as_millis() as u64,
                operation: "dispose".to_string(),
            }),
        };
    }

    first_err.map_or(Ok(()), Err)
}

/// Build a `ResolvedDeps` for every task/resource/hook/middleware in the
/// store by walking its declared dependency map and looking each reference
/// up in the same (already-sealed) store.
fn resolve_all(store: &Store) -> HashMap<DefId, ResolvedDeps> {
    let mut out = HashMap::new();

    let defs: Vec<(DefId, crate::definition::DependencyMap)> = store
        .resource_ids()
        .into_iter()
        .filter_map(|id| {
            store
                .resource(&id)
                .map(|h| (id, h.factory.dependencies().clone()))
        })
        .chain(
            store
                .tasks()
                .map(|t| (t.id().to_string(), t.dependencies().clone())),
        )
        .chain(store.hooks().map(|h| (h.id().to_string(), h.dependencies())))
        .chain(
            store
                .task_middlewares()
                .map(|m| (m.id().to_string(), m.dependencies())),
        )
        .chain(
            store
                .resource_middlewares()
                .map(|m| (m.id().to_string(), m.dependencies())),
        )
        .collect();

    for (id, deps) in defs {
        let mut resolved = ResolvedDeps::new();
        for dep in &deps {
            if let Some(value) = resolve_one(store, &dep.reference) {
                resolved.insert(dep.name.clone(), value);
            }
        }
        out.insert(id, resolved);
    }

    out
}

fn resolve_one(store: &Store, reference: &DependencyRef) -> Option<ResolvedDependency> {
    match reference {
        DependencyRef::Task(id) => store.task(id).cloned().map(ResolvedDependency::Task),
        DependencyRef::Resource(id) => store.resource(id).cloned().map(ResolvedDependency::Resource),
        DependencyRef::Event(id) => store.event(id).cloned().map(ResolvedDependency::Event),
        DependencyRef::Tag(id) => {
            if store.tag_index().contains(id) {
                Some(ResolvedDependency::Tag(store.tag_index().accessor(id.clone())))
            } else {
                None
            }
        }
        DependencyRef::ErrorHelper(id) => store
            .error_helper(id)
            .cloned()
            .map(ResolvedDependency::ErrorHelper),
        DependencyRef::AsyncContext(id) => {
            store.async_context(id).map(|_| ResolvedDependency::AsyncContext(id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DependencyMap, DependencySpec, Schema};
    use crate::resource_def::{Resource, ResourceFactoryAdapter};
    use crate::store::RegistrationWriter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Db {
        init_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Resource for Db {
        type Config = ();
        type Value = String;
        fn id(&self) -> &str {
            "db"
        }
        async fn init(&self, _config: &(), _deps: &ResolvedDeps) -> Result<String> {
            self.init_count.fetch_add(1, Ordering::SeqCst);
            Ok("connected".to_string())
        }
    }

    struct App;

    #[async_trait]
    impl Resource for App {
        type Config = ();
        type Value = u64;
        fn id(&self) -> &str {
            "app"
        }
        fn dependencies(&self) -> DependencyMap {
            vec![DependencySpec::required(
                "db",
                DependencyRef::Resource("db".into()),
            )]
        }
        async fn init(&self, _config: &(), deps: &ResolvedDeps) -> Result<u64> {
            let db = deps.resource("db")?;
            assert!(db.is_initialized());
            Ok(1)
        }
    }

    #[allow(dead_code)]
    fn _schema_object_safe(_s: &dyn Schema) {}

    #[tokio::test]
    async fn boot_initializes_resources_in_dependency_order() {
        let mut writer = RegistrationWriter::new();
        let init_count = Arc::new(AtomicUsize::new(0));
        writer
            .add_resource(Arc::new(ResourceHandle::new(
                "db".into(),
                Arc::new(ResourceFactoryAdapter::new(
                    Db { init_count: Arc::clone(&init_count) },
                    (),
                )),
            )))
            .unwrap();
        writer
            .add_resource(Arc::new(ResourceHandle::new(
                "app".into(),
                Arc::new(ResourceFactoryAdapter::new(App, ())),
            )))
            .unwrap();

        let runtime = Runtime::boot(
            "app",
            writer,
            HashMap::new(),
            RuntimeConfig::default(),
        )
        .await
        .unwrap();

        let app_value = runtime.get_root_value::<u64>().await.unwrap();
        assert_eq!(*app_value, 1);
        assert_eq!(init_count.load(Ordering::SeqCst), 1);

        runtime.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn lazy_mode_defers_init_until_first_access() {
        let mut writer = RegistrationWriter::new();
        let init_count = Arc::new(AtomicUsize::new(0));
        writer
            .add_resource(Arc::new(ResourceHandle::new(
                "db".into(),
                Arc::new(ResourceFactoryAdapter::new(
                    Db { init_count: Arc::clone(&init_count) },
                    (),
                )),
            )))
            .unwrap();

        let config = RuntimeConfig {
            init_mode: InitMode::Lazy,
            ..RuntimeConfig::default()
        };
        let runtime = Runtime::boot("db", writer, HashMap::new(), config)
            .await
            .unwrap();
        assert_eq!(init_count.load(Ordering::SeqCst), 0);

        let value = runtime.get_resource_value::<String>("db").await.unwrap();
        assert_eq!(*value, "connected");
        assert_eq!(init_count.load(Ordering::SeqCst), 1);
    }

    struct NoopHook {
        id: &'static str,
        deps: DependencyMap,
    }

    #[async_trait]
    impl crate::hook::Hook for NoopHook {
        fn id(&self) -> &str {
            self.id
        }
        fn on(&self) -> crate::hook::HookTarget {
            crate::hook::HookTarget::All
        }
        fn dependencies(&self) -> DependencyMap {
            self.deps.clone()
        }
        async fn run(&self, _emission: &crate::event_manager::Emission, _deps: &ResolvedDeps) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn hook_with_satisfied_dependencies_reaches_ready() {
        let mut writer = RegistrationWriter::new();
        writer
            .add_resource(Arc::new(ResourceHandle::new(
                "db".into(),
                Arc::new(ResourceFactoryAdapter::new(
                    Db { init_count: Arc::new(AtomicUsize::new(0)) },
                    (),
                )),
            )))
            .unwrap();
        writer
            .add_hook(Arc::new(NoopHook {
                id: "on_any",
                deps: vec![DependencySpec::required("db", DependencyRef::Resource("db".into()))],
            }))
            .unwrap();

        let runtime = Runtime::boot("db", writer, HashMap::new(), RuntimeConfig::default())
            .await
            .unwrap();

        assert_eq!(
            runtime.hook_dependency_state("on_any"),
            Some(crate::hook::HookDependencyState::Ready)
        );
    }

    #[tokio::test]
    async fn hook_with_missing_required_dependency_aborts_boot() {
        let mut writer = RegistrationWriter::new();
        writer
            .add_hook(Arc::new(NoopHook {
                id: "on_any",
                deps: vec![DependencySpec::required(
                    "nonexistent",
                    DependencyRef::Resource("nonexistent".into()),
                )],
            }))
            .unwrap();

        let err = Runtime::boot("on_any", writer, HashMap::new(), RuntimeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingDependency { .. }));
    }

    /// A tag definition can exist while nothing carries it, so it passes
    /// the store's generic "id is registered" seal check yet still has no
    /// accessor to resolve to — only the hook-specific dependency check
    /// (driving `HookDependencyState`) catches this one.
    #[tokio::test]
    async fn hook_required_tag_with_no_carriers_aborts_boot() {
        let mut writer = RegistrationWriter::new();
        writer.add_tag(Arc::new(crate::definition::Tag::new("unused"))).unwrap();
        writer
            .add_hook(Arc::new(NoopHook {
                id: "on_any",
                deps: vec![DependencySpec::required("tagged", DependencyRef::Tag("unused".into()))],
            }))
            .unwrap();

        let err = Runtime::boot("on_any", writer, HashMap::new(), RuntimeConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingDependency { .. }));
    }
}
