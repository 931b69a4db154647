//! Registration and the sealed definition store.
//!
//! `RegistrationWriter` walks the root resource's `register` tree
//! depth-first, enforcing id uniqueness (I1) across all nine definition
//! kinds, then hands the accumulated maps to a [`Store`] that is sealed
//! (read-only) for the remainder of the runtime's life.
//!
//! Grounded on `manager.rs`'s `DashMap<String, Arc<dyn AnyPool>>`
//! registration pattern, generalized from one map (pools) to one map per
//! definition kind, and from "last write wins" to strict duplicate
//! rejection before anything is committed (the distilled model's
//! all-or-nothing registration).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::definition::{DefId, DefKind, DependencyMap, ErrorHelperDef, Tag, normalize_tags};
use crate::error::{Error, Result};
use crate::event_def::EventDef;
use crate::hook::Hook;
use crate::middleware::{ResourceMiddleware, TaskInterceptor, TaskMiddleware};
use crate::resource_def::ResourceHandle;
use crate::tag_index::TagIndex;
use crate::task::TaskHandler;

/// One entry pending registration: id, kind, and declared dependency map
/// (used to build the dependency graph before anything is sealed).
struct PendingDef {
    kind: DefKind,
    deps: DependencyMap,
}

/// Accumulates definitions before the store is sealed. Not `Send`-shared —
/// used single-threaded during boot, then consumed by `seal`.
#[derive(Default)]
pub struct RegistrationWriter {
    tasks: HashMap<DefId, Arc<dyn TaskHandler>>,
    resources: HashMap<DefId, Arc<ResourceHandle>>,
    events: HashMap<DefId, Arc<EventDef>>,
    hooks: IndexMap<DefId, Arc<dyn Hook>>,
    task_middlewares: IndexMap<DefId, Arc<dyn TaskMiddleware>>,
    resource_middlewares: IndexMap<DefId, Arc<dyn ResourceMiddleware>>,
    tags: HashMap<DefId, Arc<Tag>>,
    error_helpers: HashMap<DefId, Arc<ErrorHelperDef>>,
    async_contexts: HashMap<DefId, Arc<crate::async_context::AsyncContextDef>>,
    pending: HashMap<DefId, PendingDef>,
    /// Tunneled task id -> owning resource id, checked eagerly at
    /// registration time so the second conflicting claim fails immediately
    /// rather than waiting for `seal` (P8).
    tunnel_owners: HashMap<DefId, DefId>,
    /// Tunneled task id -> transport task id, assembled from every
    /// resource's declared tunnels.
    tunnels: HashMap<DefId, DefId>,
    /// Per-task interceptors (§4.4), keyed by the task id they wrap,
    /// preserving attachment order.
    interceptors: IndexMap<DefId, Vec<Arc<dyn TaskInterceptor>>>,
}

impl RegistrationWriter {
    /// A fresh, empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn claim_id(&mut self, id: &str, kind: DefKind, deps: DependencyMap) -> Result<()> {
        if self.pending.contains_key(id) {
            return Err(Error::DuplicateId {
                id: id.to_string(),
                kind: kind.to_string(),
            });
        }
        self.pending.insert(id.to_string(), PendingDef { kind, deps });
        Ok(())
    }

    /// Register a task handler.
    pub fn add_task(&mut self, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let id = handler.id().to_string();
        self.claim_id(&id, DefKind::Task, handler.dependencies().clone())?;
        self.tasks.insert(id, handler);
        Ok(())
    }

    /// Register a resource handle (already wrapping its factory).
    pub fn add_resource(&mut self, handle: Arc<ResourceHandle>) -> Result<()> {
        let id = handle.id.clone();
        let deps = handle.factory.dependencies().clone();
        self.claim_id(&id, DefKind::Resource, deps)?;

        for (tunneled_id, transport_id) in handle.factory.tunnels() {
            if let Some(existing) = self.tunnel_owners.get(tunneled_id)
                && existing != &id
            {
                return Err(Error::DuplicateTunnel {
                    task_id: tunneled_id.clone(),
                    existing_tunnel: existing.clone(),
                });
            }
            self.tunnel_owners.insert(tunneled_id.clone(), id.clone());
            self.tunnels.insert(tunneled_id.clone(), transport_id.clone());
        }

        self.resources.insert(id, handle);
        Ok(())
    }

    /// Register an event definition.
    pub fn add_event(&mut self, event: Arc<EventDef>) -> Result<()> {
        let id = event.id.clone();
        self.claim_id(&id, DefKind::Event, DependencyMap::new())?;
        self.events.insert(id, event);
        Ok(())
    }

    /// Register a hook.
    pub fn add_hook(&mut self, hook: Arc<dyn Hook>) -> Result<()> {
        let id = hook.id().to_string();
        self.claim_id(&id, DefKind::Hook, hook.dependencies())?;
        self.hooks.insert(id, hook);
        Ok(())
    }

    /// Register a task middleware.
    pub fn add_task_middleware(&mut self, mw: Arc<dyn TaskMiddleware>) -> Result<()> {
        let id = mw.id().to_string();
        self.claim_id(&id, DefKind::TaskMiddleware, mw.dependencies())?;
        self.task_middlewares.insert(id, mw);
        Ok(())
    }

    /// Register a resource middleware.
    pub fn add_resource_middleware(&mut self, mw: Arc<dyn ResourceMiddleware>) -> Result<()> {
        let id = mw.id().to_string();
        self.claim_id(&id, DefKind::ResourceMiddleware, mw.dependencies())?;
        self.resource_middlewares.insert(id, mw);
        Ok(())
    }

    /// Register a tag.
    pub fn add_tag(&mut self, tag: Arc<Tag>) -> Result<()> {
        let id = tag.id.clone();
        self.claim_id(&id, DefKind::Tag, DependencyMap::new())?;
        self.tags.insert(id, tag);
        Ok(())
    }

    /// Register an error helper.
    pub fn add_error_helper(&mut self, helper: Arc<ErrorHelperDef>) -> Result<()> {
        let id = helper.id.clone();
        self.claim_id(&id, DefKind::ErrorHelper, DependencyMap::new())?;
        self.error_helpers.insert(id, helper);
        Ok(())
    }

    /// Register an async context.
    pub fn add_async_context(&mut self, ctx: Arc<crate::async_context::AsyncContextDef>) -> Result<()> {
        let id = ctx.id.clone();
        self.claim_id(&id, DefKind::AsyncContext, DependencyMap::new())?;
        self.async_contexts.insert(id, ctx);
        Ok(())
    }

    /// Attach a per-task interceptor (§4.4), run before any `everywhere`
    /// middleware and before any other interceptor already attached to the
    /// same task id. Does not require `task_id` to already be registered —
    /// resources frequently attach interceptors before the task they target
    /// has been walked.
    pub fn add_interceptor(&mut self, task_id: impl Into<String>, interceptor: Arc<dyn TaskInterceptor>) {
        self.interceptors
            .entry(task_id.into())
            .or_default()
            .push(interceptor);
    }

    /// Confirm `id` is already claimed under `kind`, as required before an
    /// override may replace it (§4.1 "Overrides"). Unlike [`Self::claim_id`]
    /// this rejects a *missing* id rather than a duplicate one.
    fn expect_override_target(&self, id: &str, kind: DefKind) -> Result<()> {
        match self.pending.get(id) {
            Some(existing) if existing.kind == kind => Ok(()),
            Some(existing) => Err(Error::OverrideKindMismatch {
                id: id.to_string(),
                existing_kind: existing.kind.to_string(),
                override_kind: kind.to_string(),
            }),
            None => Err(Error::OverrideTargetMissing { id: id.to_string() }),
        }
    }

    /// Replace an already-registered task handler with an override.
    ///
    /// Overrides apply after the initial registration phase and before
    /// [`Self::seal`]: the replacement's dependency map supersedes the
    /// original's for graph-building purposes. Callers applying overrides
    /// from nested registration trees should apply the innermost owner's
    /// overrides first, so later (outer) calls win (§4.1).
    pub fn override_task(&mut self, handler: Arc<dyn TaskHandler>) -> Result<()> {
        let id = handler.id().to_string();
        self.expect_override_target(&id, DefKind::Task)?;
        self.pending.insert(
            id.clone(),
            PendingDef {
                kind: DefKind::Task,
                deps: handler.dependencies().clone(),
            },
        );
        self.tasks.insert(id, handler);
        Ok(())
    }

    /// Replace an already-registered resource handle with an override. Any
    /// tunnels declared by the override are folded in exactly like
    /// [`Self::add_resource`] (fatal only if a *different* resource already
    /// claimed the same tunneled task id — an override may freely replace
    /// its own prior tunnel claim or drop it, per the recorded Open
    /// Question decision in `DESIGN.md`).
    pub fn override_resource(&mut self, handle: Arc<ResourceHandle>) -> Result<()> {
        let id = handle.id.clone();
        self.expect_override_target(&id, DefKind::Resource)?;

        let previously_owned: Vec<DefId> = self
            .tunnel_owners
            .iter()
            .filter(|(_, owner)| **owner == id)
            .map(|(tunneled_id, _)| tunneled_id.clone())
            .collect();
        for tunneled_id in previously_owned {
            self.tunnel_owners.remove(&tunneled_id);
            self.tunnels.remove(&tunneled_id);
        }
        for (tunneled_id, transport_id) in handle.factory.tunnels() {
            if let Some(existing) = self.tunnel_owners.get(tunneled_id)
                && existing != &id
            {
                return Err(Error::DuplicateTunnel {
                    task_id: tunneled_id.clone(),
                    existing_tunnel: existing.clone(),
                });
            }
            self.tunnel_owners.insert(tunneled_id.clone(), id.clone());
            self.tunnels.insert(tunneled_id.clone(), transport_id.clone());
        }

        self.pending.insert(
            id.clone(),
            PendingDef {
                kind: DefKind::Resource,
                deps: handle.factory.dependencies().clone(),
            },
        );
        self.resources.insert(id, handle);
        Ok(())
    }

    /// Replace an already-registered hook with an override.
    pub fn override_hook(&mut self, hook: Arc<dyn Hook>) -> Result<()> {
        let id = hook.id().to_string();
        self.expect_override_target(&id, DefKind::Hook)?;
        self.pending.insert(
            id.clone(),
            PendingDef {
                kind: DefKind::Hook,
                deps: hook.dependencies(),
            },
        );
        self.hooks.insert(id, hook);
        Ok(())
    }

    /// Tag membership recorded so far, keyed by id with its kind.
    fn tag_memberships(&self) -> Vec<(DefId, DefKind, Vec<DefId>)> {
        let ids = |tags: Vec<Arc<Tag>>| normalize_tags(tags).iter().map(|t| t.id.clone()).collect::<Vec<_>>();
        let mut out = Vec::new();
        for handler in self.tasks.values() {
            out.push((handler.id().to_string(), DefKind::Task, ids(handler.tags().to_vec())));
        }
        for handle in self.resources.values() {
            out.push((handle.id.clone(), DefKind::Resource, ids(handle.factory.tags().to_vec())));
        }
        for event in self.events.values() {
            out.push((event.id.clone(), DefKind::Event, ids(event.tags.clone())));
        }
        for hook in self.hooks.values() {
            out.push((hook.id().to_string(), DefKind::Hook, ids(hook.tags())));
        }
        for mw in self.task_middlewares.values() {
            out.push((mw.id().to_string(), DefKind::TaskMiddleware, ids(mw.tags())));
        }
        for mw in self.resource_middlewares.values() {
            out.push((mw.id().to_string(), DefKind::ResourceMiddleware, ids(mw.tags())));
        }
        for helper in self.error_helpers.values() {
            out.push((helper.id.clone(), DefKind::ErrorHelper, ids(helper.tags.clone())));
        }
        out
    }

    fn check_tag_duplicates(&self) -> Result<()> {
        for (id, kind, tags) in self.tag_memberships() {
            let mut seen = HashSet::new();
            for tag_id in tags {
                if !seen.insert(tag_id.clone()) {
                    return Err(Error::DuplicateTag {
                        id,
                        kind: kind.to_string(),
                        tag_id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Every resource id currently carrying `tag_id` ("startup tag" gating,
    /// §4.3): a tag dependency depends on the tagged *resources*
    /// themselves, not on the tag definition.
    fn resources_tagged(&self, tag_id: &str) -> Vec<DefId> {
        self.resources
            .values()
            .filter(|handle| handle.factory.tags().iter().any(|tag| tag.id == tag_id))
            .map(|handle| handle.id.clone())
            .collect()
    }

    /// Validate on a throwaway clone of the dependency edges before
    /// committing anything to the graph — an invalid dependency map must
    /// never leave the real store half-registered.
    fn build_dependency_graph(&self) -> Result<crate::dependency::DependencyGraph> {
        let mut graph = crate::dependency::DependencyGraph::new();
        for (id, def) in &self.pending {
            for dep in &def.deps {
                if let crate::definition::DependencyRef::Tag(tag_id) = &dep.reference {
                    for resource_id in self.resources_tagged(tag_id) {
                        if resource_id != *id {
                            graph.add_dependency(id.clone(), resource_id)?;
                        }
                    }
                    continue;
                }
                graph.add_dependency(id.clone(), dep.reference.id().to_string())?;
            }
        }
        Ok(graph)
    }

    /// Seal the writer into a read-only [`Store`], building the dependency
    /// graph and tag index along the way.
    ///
    /// # Errors
    /// Returns an error if any dependency reference is missing, any
    /// dependency edge forms a cycle, or a definition lists a duplicate tag.
    pub fn seal(self) -> Result<Store> {
        self.check_tag_duplicates()?;
        let graph = self.build_dependency_graph()?;

        for (id, def) in &self.pending {
            for dep in &def.deps {
                if dep.optional {
                    continue;
                }
                let target = dep.reference.id();
                if !self.pending.contains_key(target) {
                    return Err(Error::MissingDependency {
                        consumer_id: id.clone(),
                        dependency_id: target.to_string(),
                    });
                }
            }
        }

        let tag_index = Arc::new(TagIndex::new());
        for (id, kind, tags) in self.tag_memberships() {
            for tag_id in tags {
                tag_index.insert(&tag_id, kind, id.clone());
            }
        }

        Ok(Store {
            tasks: self.tasks,
            resources: self.resources,
            events: self.events,
            hooks: self.hooks,
            task_middlewares: self.task_middlewares,
            resource_middlewares: self.resource_middlewares,
            tags: self.tags,
            error_helpers: self.error_helpers,
            async_contexts: self.async_contexts,
            graph,
            tag_index,
            tunnels: self.tunnels,
            interceptors: self.interceptors,
        })
    }
}

/// The sealed, read-only definition registry. Once built by
/// [`RegistrationWriter::seal`], a `Store` never changes — all writes
/// return [`Error::LockableMapLocked`].
pub struct Store {
    tasks: HashMap<DefId, Arc<dyn TaskHandler>>,
    resources: HashMap<DefId, Arc<ResourceHandle>>,
    events: HashMap<DefId, Arc<EventDef>>,
    hooks: IndexMap<DefId, Arc<dyn Hook>>,
    task_middlewares: IndexMap<DefId, Arc<dyn TaskMiddleware>>,
    resource_middlewares: IndexMap<DefId, Arc<dyn ResourceMiddleware>>,
    tags: HashMap<DefId, Arc<Tag>>,
    error_helpers: HashMap<DefId, Arc<ErrorHelperDef>>,
    async_contexts: HashMap<DefId, Arc<crate::async_context::AsyncContextDef>>,
    graph: crate::dependency::DependencyGraph,
    tag_index: Arc<TagIndex>,
    tunnels: HashMap<DefId, DefId>,
    interceptors: IndexMap<DefId, Vec<Arc<dyn TaskInterceptor>>>,
}

impl Store {
    /// The dependency graph computed at seal time.
    #[must_use]
    pub fn graph(&self) -> &crate::dependency::DependencyGraph {
        &self.graph
    }

    /// The tag index computed at seal time.
    #[must_use]
    pub fn tag_index(&self) -> &Arc<TagIndex> {
        &self.tag_index
    }

    /// Look up a task handler by id.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.tasks.get(id)
    }

    /// Every registered task handler.
    #[must_use]
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<dyn TaskHandler>> {
        self.tasks.values()
    }

    /// Look up a resource handle by id.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&Arc<ResourceHandle>> {
        self.resources.get(id)
    }

    /// Look up an event definition by id.
    #[must_use]
    pub fn event(&self, id: &str) -> Option<&Arc<EventDef>> {
        self.events.get(id)
    }

    /// Every registered hook.
    #[must_use]
    pub fn hooks(&self) -> impl Iterator<Item = &Arc<dyn Hook>> {
        self.hooks.values()
    }

    /// Every registered task middleware.
    #[must_use]
    pub fn task_middlewares(&self) -> impl Iterator<Item = &Arc<dyn TaskMiddleware>> {
        self.task_middlewares.values()
    }

    /// Every registered resource middleware.
    #[must_use]
    pub fn resource_middlewares(&self) -> impl Iterator<Item = &Arc<dyn ResourceMiddleware>> {
        self.resource_middlewares.values()
    }

    /// Look up a tag by id.
    #[must_use]
    pub fn tag(&self, id: &str) -> Option<&Arc<Tag>> {
        self.tags.get(id)
    }

    /// Look up an error helper by id.
    #[must_use]
    pub fn error_helper(&self, id: &str) -> Option<&Arc<ErrorHelperDef>> {
        self.error_helpers.get(id)
    }

    /// Look up an async context definition by id.
    #[must_use]
    pub fn async_context(&self, id: &str) -> Option<&Arc<crate::async_context::AsyncContextDef>> {
        self.async_contexts.get(id)
    }

    /// Every resource id, in no particular order (callers wanting init order
    /// should use [`Store::graph`]'s topological sort).
    #[must_use]
    pub fn resource_ids(&self) -> Vec<DefId> {
        self.resources.keys().cloned().collect()
    }

    /// Tunneled task id -> transport task id, assembled from every
    /// resource's declared tunnels (§4.4 "Tunneling").
    #[must_use]
    pub fn tunnels(&self) -> &HashMap<DefId, DefId> {
        &self.tunnels
    }

    /// Interceptors attached to `task_id`, in attachment order (§4.4).
    #[must_use]
    pub fn interceptors(&self, task_id: &str) -> &[Arc<dyn TaskInterceptor>] {
        self.interceptors.get(task_id).map_or(&[], Vec::as_slice)
    }
}
