//! P2 (dependency-ordered init), P3 (dependents-first dispose), P7/S6 (lazy
//! mode defers until first access, then resolves the closure dependencies
//! first) and S2 (a startup-tag dependency gates a consumer the same way a
//! direct resource dependency would).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use forge_runtime::{
    DependencyMap, DependencyRef, DependencySpec, InitMode, RegistrationWriter, Resource,
    ResourceFactoryAdapter, ResourceHandle, ResolvedDeps, Result, Runtime, RuntimeConfig, Tag,
};

fn order_slot() -> Arc<AtomicU64> {
    Arc::new(AtomicU64::new(0))
}

struct Recorder {
    name: &'static str,
    counter: Arc<AtomicU64>,
    init_order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    dispose_order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    deps: DependencyMap,
}

#[async_trait]
impl Resource for Recorder {
    type Config = ();
    type Value = u64;
    fn id(&self) -> &str {
        self.name
    }
    fn dependencies(&self) -> DependencyMap {
        self.deps.clone()
    }
    async fn init(&self, _config: &(), _deps: &ResolvedDeps) -> Result<u64> {
        self.init_order.lock().unwrap().push(self.name);
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }
    async fn dispose(&self, _value: u64) -> Result<()> {
        self.dispose_order.lock().unwrap().push(self.name);
        Ok(())
    }
}

fn recorder(
    name: &'static str,
    counter: &Arc<AtomicU64>,
    init_order: &Arc<std::sync::Mutex<Vec<&'static str>>>,
    dispose_order: &Arc<std::sync::Mutex<Vec<&'static str>>>,
    deps: DependencyMap,
) -> Arc<ResourceHandle> {
    Arc::new(ResourceHandle::new(
        name.into(),
        Arc::new(ResourceFactoryAdapter::new(
            Recorder {
                name,
                counter: Arc::clone(counter),
                init_order: Arc::clone(init_order),
                dispose_order: Arc::clone(dispose_order),
                deps,
            },
            (),
        )),
    ))
}

#[tokio::test]
async fn sequential_boot_initializes_dependencies_before_dependents_and_disposes_in_reverse() {
    let counter = order_slot();
    let init_order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let dispose_order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut writer = RegistrationWriter::new();
    writer
        .add_resource(recorder("db", &counter, &init_order, &dispose_order, Vec::new()))
        .unwrap();
    writer
        .add_resource(recorder(
            "cache",
            &counter,
            &init_order,
            &dispose_order,
            vec![DependencySpec::required("db", DependencyRef::Resource("db".into()))],
        ))
        .unwrap();
    writer
        .add_resource(recorder(
            "app",
            &counter,
            &init_order,
            &dispose_order,
            vec![
                DependencySpec::required("db", DependencyRef::Resource("db".into())),
                DependencySpec::required("cache", DependencyRef::Resource("cache".into())),
            ],
        ))
        .unwrap();

    let runtime = Runtime::boot("app", writer, HashMap::new(), RuntimeConfig::default())
        .await
        .unwrap();

    {
        let order = init_order.lock().unwrap();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("db") < pos("cache"));
        assert!(pos("cache") < pos("app"));
    }

    runtime.dispose().await.unwrap();

    {
        let order = dispose_order.lock().unwrap();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("app") < pos("cache"));
        assert!(pos("cache") < pos("db"));
    }
}

struct OnceCounting {
    init_count: Arc<AtomicU64>,
}

#[async_trait]
impl Resource for OnceCounting {
    type Config = ();
    type Value = u64;
    fn id(&self) -> &str {
        "lazy.leaf"
    }
    async fn init(&self, _config: &(), _deps: &ResolvedDeps) -> Result<u64> {
        Ok(self.init_count.fetch_add(1, Ordering::SeqCst))
    }
}

struct LazyDependent;

#[async_trait]
impl Resource for LazyDependent {
    type Config = ();
    type Value = u64;
    fn id(&self) -> &str {
        "lazy.root"
    }
    fn dependencies(&self) -> DependencyMap {
        vec![DependencySpec::required(
            "leaf",
            DependencyRef::Resource("lazy.leaf".into()),
        )]
    }
    async fn init(&self, _config: &(), deps: &ResolvedDeps) -> Result<u64> {
        let leaf = deps.resource("leaf")?;
        assert!(leaf.is_initialized(), "leaf must init before its dependent under lazy mode");
        Ok(1)
    }
}

#[tokio::test]
async fn lazy_mode_inits_nothing_at_boot_then_resolves_closure_on_first_access() {
    let init_count = Arc::new(AtomicU64::new(0));

    let mut writer = RegistrationWriter::new();
    writer
        .add_resource(Arc::new(ResourceHandle::new(
            "lazy.leaf".into(),
            Arc::new(ResourceFactoryAdapter::new(
                OnceCounting { init_count: Arc::clone(&init_count) },
                (),
            )),
        )))
        .unwrap();
    writer
        .add_resource(Arc::new(ResourceHandle::new(
            "lazy.root".into(),
            Arc::new(ResourceFactoryAdapter::new(LazyDependent, ())),
        )))
        .unwrap();

    let mut config = RuntimeConfig::default();
    config.init_mode = InitMode::Lazy;
    let runtime = Runtime::boot("lazy.root", writer, HashMap::new(), config)
        .await
        .unwrap();

    assert_eq!(init_count.load(Ordering::SeqCst), 0, "lazy resources stay uninitialized at boot");

    let root_value = runtime.get_root_value::<u64>().await.unwrap();
    assert_eq!(*root_value, 1);
    assert_eq!(init_count.load(Ordering::SeqCst), 1, "leaf inits exactly once, on first lazy access");

    // Accessing it again must not re-run init.
    let _ = runtime.get_root_value::<u64>().await.unwrap();
    assert_eq!(init_count.load(Ordering::SeqCst), 1);

    runtime.dispose().await.unwrap();
}

struct TaggedStartupResource;

#[async_trait]
impl Resource for TaggedStartupResource {
    type Config = ();
    type Value = u64;
    fn id(&self) -> &str {
        "startup.r1"
    }
    fn tags(&self) -> Vec<Arc<Tag>> {
        vec![Arc::new(Tag::new("startup"))]
    }
    async fn init(&self, _config: &(), _deps: &ResolvedDeps) -> Result<u64> {
        Ok(42)
    }
}

struct TagGatedConsumer;

#[async_trait]
impl Resource for TagGatedConsumer {
    type Config = ();
    type Value = u64;
    fn id(&self) -> &str {
        "consumer"
    }
    fn dependencies(&self) -> DependencyMap {
        vec![DependencySpec::required(
            "startup",
            DependencyRef::Tag("startup".into()),
        )]
    }
    async fn init(&self, _config: &(), deps: &ResolvedDeps) -> Result<u64> {
        let tag = deps.tag("startup")?;
        let resources = tag.resources();
        assert_eq!(resources, ["startup.r1".to_string()]);
        Ok(1)
    }
}

#[tokio::test]
async fn tag_dependency_gates_init_against_every_tagged_resource() {
    let mut writer = RegistrationWriter::new();
    writer.add_tag(Arc::new(Tag::new("startup"))).unwrap();
    writer
        .add_resource(Arc::new(ResourceHandle::new(
            "startup.r1".into(),
            Arc::new(ResourceFactoryAdapter::new(TaggedStartupResource, ())),
        )))
        .unwrap();
    writer
        .add_resource(Arc::new(ResourceHandle::new(
            "consumer".into(),
            Arc::new(ResourceFactoryAdapter::new(TagGatedConsumer, ())),
        )))
        .unwrap();

    // Parallel mode makes the frontier ordering meaningful: if the tag edge
    // were missing, "consumer" could land in the same (or an earlier)
    // frontier as "startup.r1" and init before it.
    let mut config = RuntimeConfig::default();
    config.init_mode = InitMode::Parallel;
    let runtime = Runtime::boot("consumer", writer, HashMap::new(), config)
        .await
        .unwrap();

    runtime.dispose().await.unwrap();
}
