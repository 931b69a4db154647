//! S1 (tag dependency cache) and P6 (tag accessor caching): a task, event,
//! hook, two middlewares, one error helper, and one resource all tagged
//! `featureTag`; every kind-specific sub-array of the accessor must show up,
//! and repeated reads of the same sub-array must return equal contents even
//! after the index could theoretically gain more members (impossible post-seal,
//! but the accessor's own cache must not re-query regardless).

use std::sync::Arc;

use async_trait::async_trait;
use forge_runtime::event_manager::Emission;
use forge_runtime::{
    DependencyMap, ErrorHelperDef, Everywhere, Hook, HookTarget, Next, RegistrationWriter,
    Resource, ResourceFactoryAdapter, ResourceHandle, ResolvedDeps, Result, Tag, Task,
    TaskMiddleware, TaskMiddlewareCall, TaskWrapper,
};

fn tag() -> Arc<Tag> {
    Arc::new(Tag::new("featureTag"))
}

struct FeatureTask;

#[async_trait]
impl Task for FeatureTask {
    type Input = ();
    type Output = ();
    fn id(&self) -> &str {
        "feature.task"
    }
    fn tags(&self) -> Vec<Arc<Tag>> {
        vec![tag()]
    }
    async fn run(&self, _input: (), _deps: &ResolvedDeps) -> Result<()> {
        Ok(())
    }
}

struct FeatureResource;

#[async_trait]
impl Resource for FeatureResource {
    type Config = ();
    type Value = ();
    fn id(&self) -> &str {
        "feature.resource"
    }
    fn tags(&self) -> Vec<Arc<Tag>> {
        vec![tag()]
    }
    async fn init(&self, _config: &(), _deps: &ResolvedDeps) -> Result<()> {
        Ok(())
    }
}

struct FeatureHook;

#[async_trait]
impl Hook for FeatureHook {
    fn id(&self) -> &str {
        "feature.hook"
    }
    fn on(&self) -> HookTarget {
        HookTarget::All
    }
    fn tags(&self) -> Vec<Arc<Tag>> {
        vec![tag()]
    }
    async fn run(&self, _emission: &Emission, _deps: &ResolvedDeps) -> Result<()> {
        Ok(())
    }
}

struct FeatureMiddlewareA;

#[async_trait]
impl TaskMiddleware for FeatureMiddlewareA {
    fn id(&self) -> &str {
        "feature.mw.a"
    }
    fn everywhere(&self) -> Everywhere {
        Everywhere::Never
    }
    fn tags(&self) -> Vec<Arc<Tag>> {
        vec![tag()]
    }
    async fn run(
        &self,
        _call: &TaskMiddlewareCall<'_>,
        _deps: &ResolvedDeps,
        next: Next,
    ) -> Result<serde_json::Value> {
        next.call(serde_json::Value::Null).await
    }
}

struct FeatureMiddlewareB;

#[async_trait]
impl TaskMiddleware for FeatureMiddlewareB {
    fn id(&self) -> &str {
        "feature.mw.b"
    }
    fn tags(&self) -> Vec<Arc<Tag>> {
        vec![tag()]
    }
    async fn run(
        &self,
        _call: &TaskMiddlewareCall<'_>,
        _deps: &ResolvedDeps,
        next: Next,
    ) -> Result<serde_json::Value> {
        next.call(serde_json::Value::Null).await
    }
}

fn build_store() -> Arc<forge_runtime::Store> {
    let mut writer = RegistrationWriter::new();
    writer.add_tag(tag()).unwrap();
    writer.add_task(Arc::new(TaskWrapper::new(FeatureTask))).unwrap();
    writer
        .add_resource(Arc::new(ResourceHandle::new(
            "feature.resource".into(),
            Arc::new(ResourceFactoryAdapter::new(FeatureResource, ())),
        )))
        .unwrap();
    writer
        .add_event(Arc::new(
            forge_runtime::EventDef::new("feature.event").with_tag(tag()),
        ))
        .unwrap();
    writer.add_hook(Arc::new(FeatureHook)).unwrap();
    writer
        .add_task_middleware(Arc::new(FeatureMiddlewareA))
        .unwrap();
    writer
        .add_task_middleware(Arc::new(FeatureMiddlewareB))
        .unwrap();
    writer
        .add_error_helper(Arc::new(
            ErrorHelperDef::new("feature.error", |_data| "boom".to_string()).with_tag(tag()),
        ))
        .unwrap();
    Arc::new(writer.seal().unwrap())
}

#[test]
fn every_taggable_kind_is_indexed_under_one_tag() {
    let store = build_store();
    let accessor = store.tag_index().accessor("featureTag");

    assert_eq!(accessor.tasks(), ["feature.task".to_string()]);
    assert_eq!(accessor.resources(), ["feature.resource".to_string()]);
    assert_eq!(accessor.events(), ["feature.event".to_string()]);
    assert_eq!(accessor.hooks(), ["feature.hook".to_string()]);
    assert_eq!(accessor.task_middlewares().len(), 2);
    assert!(accessor.task_middlewares().contains(&"feature.mw.a".to_string()));
    assert!(accessor.task_middlewares().contains(&"feature.mw.b".to_string()));
    assert_eq!(accessor.error_helpers(), ["feature.error".to_string()]);
}

#[test]
fn accessor_sub_arrays_are_stable_across_repeated_reads() {
    let store = build_store();
    let accessor = store.tag_index().accessor("featureTag");

    let first = accessor.tasks().to_vec();
    let second = accessor.tasks().to_vec();
    assert_eq!(first, second);

    // A fresh accessor over the same (immutable, post-seal) tag still agrees.
    let other = store.tag_index().accessor("featureTag");
    assert_eq!(other.resources(), accessor.resources());
}

#[test]
fn unused_dependency_map_placeholder_is_empty() {
    // Sanity check that a definition with no declared deps round-trips
    // through DependencyMap without needing special-casing in tag_memberships.
    let deps: DependencyMap = Vec::new();
    assert!(deps.is_empty());
}
