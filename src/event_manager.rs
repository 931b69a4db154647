//! Ordered, multi-listener event dispatch with snapshot isolation and cycle
//! detection.
//!
//! Grounded on `crates/resource/src/hooks.rs`'s `HookRegistry::run_before`/
//! `run_after`: listeners are snapshotted out from under a lock, the lock is
//! released, and only then are they awaited — so a listener registering (or
//! a concurrent emit attaching) more listeners mid-dispatch never changes
//! the batch already in flight. Generalized from the teacher's 4 fixed
//! `HookEvent` variants to arbitrary named events, and from boolean
//! "continue on error" to a full fail-fast/aggregate policy.
//!
//! Cycle detection's nesting path rides a `tokio::task_local!`, the same
//! mechanism `async_context` uses for its frames: a hook that re-emits from
//! within its own `run` is still executing inside the `EMIT_PATH` scope the
//! parent `emit` opened, so the nested call's `emit` picks the ambient path
//! up automatically. No caller threads a `path` by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::definition::DefId;
use crate::error::{Error, Result};
use crate::event_def::EventDef;
use crate::hook::Hook;
use crate::resolved::ResolvedDeps;

tokio::task_local! {
    static EMIT_PATH: Vec<DefId>;
}

/// A single event emission in flight, passed to every listener.
pub struct Emission {
    /// The event's id.
    pub event_id: DefId,
    /// The payload passed to `emit`.
    pub payload: serde_json::Value,
    /// When the emission started.
    pub emitted_at: DateTime<Utc>,
    /// The chain of event ids this emission is nested under (for cycle
    /// detection when a listener re-emits from within its own `run`).
    path: Vec<DefId>,
    propagation_stopped: AtomicBool,
}

impl Emission {
    fn new(event_id: DefId, payload: serde_json::Value, path: Vec<DefId>) -> Self {
        Self {
            event_id,
            payload,
            emitted_at: Utc::now(),
            path,
            propagation_stopped: AtomicBool::new(false),
        }
    }

    /// Prevent any listener batch after the current one from running.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.store(true, Ordering::SeqCst);
    }

    fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.load(Ordering::SeqCst)
    }

    /// The nesting path of this emission, for listeners that re-emit.
    #[must_use]
    pub fn path(&self) -> &[DefId] {
        &self.path
    }
}

/// How a batch of listener failures is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Stop dispatch at the first failing listener and return its error.
    FailFast,
    /// Run every listener regardless of individual failures, then return an
    /// aggregated error if any failed.
    Aggregate,
}

/// Options controlling a single `emit` call.
#[derive(Debug, Clone)]
pub struct EventEmitOptions {
    /// Failure handling policy for this emission's listeners.
    pub failure_mode: FailureMode,
    /// Whether listener failures should surface as an `Err` from `emit` at
    /// all, or be swallowed into the report only.
    pub throw_on_error: bool,
}

impl Default for EventEmitOptions {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::FailFast,
            throw_on_error: true,
        }
    }
}

/// Outcome of a single `emit` call.
#[derive(Debug, Default)]
pub struct EmitReport {
    /// Ids of listeners that ran without error.
    pub succeeded: Vec<DefId>,
    /// Ids of listeners that failed, paired with their error.
    pub failed: Vec<(DefId, Error)>,
}

impl EmitReport {
    fn record_success(&mut self, id: &str) {
        self.succeeded.push(id.to_string());
    }

    fn record_failure(&mut self, id: &str, err: Error) {
        self.failed.push((id.to_string(), err));
    }
}

struct ListenerEntry {
    hook: Arc<dyn Hook>,
    deps: ResolvedDeps,
    seq: u64,
}

/// Dispatches events to registered hooks in order, isolated from concurrent
/// registration via snapshot-then-release.
pub struct EventManager {
    listeners: RwLock<Vec<ListenerEntry>>,
    next_seq: AtomicU64,
    cycle_detection: bool,
}

impl Default for EventManager {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            cycle_detection: true,
        }
    }
}

impl EventManager {
    /// An empty event manager, with cycle detection enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty event manager with cycle detection toggled per
    /// `RuntimeConfig::runtime_event_cycle_detection` (§6). Disabling this
    /// is a deliberate escape hatch for a known-safe re-entrant emission
    /// graph; it is not recommended.
    #[must_use]
    pub fn with_cycle_detection(cycle_detection: bool) -> Self {
        Self {
            cycle_detection,
            ..Self::default()
        }
    }

    /// Attach a hook as a listener. Returns the hook's assigned sequence
    /// number (used to break order ties in registration order).
    pub fn register_hook(&self, hook: Arc<dyn Hook>, deps: ResolvedDeps) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push(ListenerEntry { hook, deps, seq });
        seq
    }

    /// Number of currently-registered listeners (of any target).
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Emit an event to every matching listener, in order. The
    /// cycle-detection path is picked up from the ambient `EMIT_PATH` task
    /// local if this call is nested inside another emission's dispatch
    /// (a listener re-emitting from within its own `run`); otherwise it
    /// starts empty, as a top-level emission.
    pub async fn emit(
        &self,
        event: &EventDef,
        payload: serde_json::Value,
        options: &EventEmitOptions,
    ) -> Result<EmitReport> {
        let path = EMIT_PATH.try_with(Clone::clone).unwrap_or_default();
        self.emit_with_path(event, payload, options, path).await
    }

    /// Emit an event against an explicit cycle-detection path, bypassing
    /// the ambient `EMIT_PATH` task local. Exposed for callers (and tests)
    /// that need to assert cycle detection without going through nested
    /// dispatch; production entry points should call [`Self::emit`].
    pub async fn emit_with_path(
        &self,
        event: &EventDef,
        payload: serde_json::Value,
        options: &EventEmitOptions,
        path: Vec<DefId>,
    ) -> Result<EmitReport> {
        if self.cycle_detection && path.iter().any(|id| id == &event.id) {
            let mut full = path.clone();
            full.push(event.id.clone());
            return Err(Error::EventCycle {
                event_id: event.id.clone(),
                path: full.join(" -> "),
            });
        }

        // Snapshot under lock, then release before awaiting anything.
        let mut matching = self.snapshot_for(&event.id);

        let mut child_path = path;
        child_path.push(event.id.clone());

        let emission = Emission::new(event.id.clone(), payload, child_path.clone());
        let mut report = EmitReport::default();

        // Scope EMIT_PATH to child_path for the duration of dispatch, so a
        // listener that calls `emit` again from within `run` inherits this
        // emission's path automatically.
        let dispatch = EMIT_PATH.scope(child_path, async move {
            if event.parallel {
                self.dispatch_parallel(&mut matching, &emission, options, &mut report)
                    .await?;
            } else {
                self.dispatch_sequential(&matching, &emission, options, &mut report)
                    .await?;
            }
            Ok::<_, Error>(report)
        });
        let mut report = dispatch.await?;

        if options.throw_on_error && !report.failed.is_empty() {
            let total = report.succeeded.len() + report.failed.len();
            let failed = report.failed.len();
            let (_, source) = report.failed.swap_remove(0);
            return Err(Error::AggregatedEventFailure {
                event_id: event.id.clone(),
                failed,
                total,
                source: Box::new(source),
            });
        }

        Ok(report)
    }

    /// Listener snapshot for `event_id`, sorted by `(order, registration
    /// sequence)`, taken under the read lock then released before anything
    /// is awaited (so in-flight mutation of `self.listeners` never changes
    /// a batch already captured).
    fn snapshot_for(&self, event_id: &str) -> Vec<(Arc<dyn Hook>, ResolvedDeps)> {
        let guard = self.listeners.read();
        let mut matching: Vec<(i64, u64, Arc<dyn Hook>, ResolvedDeps)> = guard
            .iter()
            .filter(|entry| entry.hook.on().matches(event_id))
            .map(|entry| {
                (
                    entry.hook.order(),
                    entry.seq,
                    Arc::clone(&entry.hook),
                    entry.deps.clone(),
                )
            })
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        matching
            .into_iter()
            .map(|(_, _, hook, deps)| (hook, deps))
            .collect()
    }

    /// Emit a non-parallel event and return the last listener's returned
    /// value, if any (§4.5 "emit_with_result"). Rejected outright for
    /// `parallel: true` events, where "last listener" is not well-defined.
    ///
    /// # Errors
    /// Returns [`Error::ParallelEventReturnUnsupported`] for a parallel
    /// event, or the first listener's error (fail-fast; there is no
    /// aggregate mode for this call).
    pub async fn emit_with_result(
        &self,
        event: &EventDef,
        payload: serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        if event.parallel {
            return Err(Error::ParallelEventReturnUnsupported {
                event_id: event.id.clone(),
            });
        }

        let matching = self.snapshot_for(&event.id);
        let emission = Emission::new(event.id.clone(), payload, vec![event.id.clone()]);

        let mut last = None;
        for (hook, deps) in &matching {
            if emission.is_propagation_stopped() {
                break;
            }
            last = hook.run_with_result(&emission, deps).await?;
        }
        Ok(last)
    }

    async fn dispatch_sequential(
        &self,
        listeners: &[(Arc<dyn Hook>, ResolvedDeps)],
        emission: &Emission,
        options: &EventEmitOptions,
        report: &mut EmitReport,
    ) -> Result<()> {
        for (hook, deps) in listeners {
            if emission.is_propagation_stopped() {
                break;
            }
            match hook.run(emission, deps).await {
                Ok(()) => report.record_success(hook.id()),
                Err(err) => {
                    report.record_failure(hook.id(), err);
                    if options.failure_mode == FailureMode::FailFast {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch_parallel(
        &self,
        listeners: &mut Vec<(Arc<dyn Hook>, ResolvedDeps)>,
        emission: &Emission,
        options: &EventEmitOptions,
        report: &mut EmitReport,
    ) -> Result<()> {
        // Batch by order: each batch's listeners run concurrently; batches
        // themselves run one after another so ordering is preserved.
        listeners.sort_by_key(|(hook, _)| hook.order());
        let mut idx = 0;
        while idx < listeners.len() {
            if emission.is_propagation_stopped() {
                break;
            }
            let order = listeners[idx].0.order();
            let end = listeners[idx..]
                .iter()
                .position(|(hook, _)| hook.order() != order)
                .map_or(listeners.len(), |offset| idx + offset);
            let batch = &listeners[idx..end];

            let results = futures::future::join_all(
                batch.iter().map(|(hook, deps)| hook.run(emission, deps)),
            )
            .await;

            for ((hook, _), result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => report.record_success(hook.id()),
                    Err(err) => {
                        report.record_failure(hook.id(), err);
                        if options.failure_mode == FailureMode::FailFast {
                            return Ok(());
                        }
                    }
                }
            }
            idx = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookTarget;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        hits: Arc<AtomicUsize>,
        order: i64,
    }

    #[async_trait]
    impl Hook for Counter {
        fn id(&self) -> &str {
            "counter"
        }
        fn on(&self) -> HookTarget {
            HookTarget::All
        }
        fn order(&self) -> i64 {
            self.order
        }
        async fn run(&self, _emission: &Emission, _deps: &ResolvedDeps) -> Result<()> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Hook for AlwaysFails {
        fn id(&self) -> &str {
            "fails"
        }
        fn on(&self) -> HookTarget {
            HookTarget::All
        }
        async fn run(&self, _emission: &Emission, _deps: &ResolvedDeps) -> Result<()> {
            Err(Error::Internal {
                message: "boom".into(),
                source: None,
            })
        }
    }

    #[tokio::test]
    async fn dispatches_to_matching_listeners() {
        let manager = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        manager.register_hook(
            Arc::new(Counter { hits: Arc::clone(&hits), order: 0 }),
            ResolvedDeps::new(),
        );
        let event = EventDef::new("user.created");
        manager
            .emit(&event, serde_json::json!({}), &EventEmitOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fail_fast_stops_after_first_error() {
        let manager = EventManager::new();
        manager.register_hook(Arc::new(AlwaysFails), ResolvedDeps::new());
        let hits = Arc::new(AtomicUsize::new(0));
        manager.register_hook(
            Arc::new(Counter { hits: Arc::clone(&hits), order: 1 }),
            ResolvedDeps::new(),
        );
        let event = EventDef::new("user.created");
        let options = EventEmitOptions {
            failure_mode: FailureMode::FailFast,
            throw_on_error: true,
        };
        let err = manager
            .emit(&event, serde_json::json!({}), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AggregatedEventFailure { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn aggregate_mode_runs_every_listener() {
        let manager = EventManager::new();
        manager.register_hook(Arc::new(AlwaysFails), ResolvedDeps::new());
        let hits = Arc::new(AtomicUsize::new(0));
        manager.register_hook(
            Arc::new(Counter { hits: Arc::clone(&hits), order: 1 }),
            ResolvedDeps::new(),
        );
        let event = EventDef::new("user.created");
        let options = EventEmitOptions {
            failure_mode: FailureMode::Aggregate,
            throw_on_error: false,
        };
        let report = manager
            .emit(&event, serde_json::json!({}), &options)
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded.len(), 1);
    }

    #[tokio::test]
    async fn self_referential_emit_is_a_cycle() {
        let manager = EventManager::new();
        let event = EventDef::new("loop");
        let path = vec!["loop".to_string()];
        let err = manager
            .emit_with_path(&event, serde_json::json!({}), &EventEmitOptions::default(), path)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EventCycle { .. }));
    }

    struct ReEmitter {
        manager: Arc<EventManager>,
        event_id: DefId,
    }

    #[async_trait]
    impl Hook for ReEmitter {
        fn id(&self) -> &str {
            "reemit"
        }
        fn on(&self) -> HookTarget {
            HookTarget::All
        }
        async fn run(&self, _emission: &Emission, _deps: &ResolvedDeps) -> Result<()> {
            let event = EventDef::new(self.event_id.clone());
            self.manager
                .emit(&event, serde_json::json!({}), &EventEmitOptions::default())
                .await
                .map(|_| ())
        }
    }

    /// A hook that re-emits the event it is handling through the public
    /// `emit` entry point (no hand-threaded path) must still be caught by
    /// cycle detection — the ambient `EMIT_PATH` task local carries the
    /// nesting across the `.await` into the nested `emit` call.
    #[tokio::test]
    async fn hook_reemitting_via_public_emit_is_caught_as_a_cycle() {
        let manager = Arc::new(EventManager::new());
        let event = EventDef::new("loop");
        manager.register_hook(
            Arc::new(ReEmitter {
                manager: Arc::clone(&manager),
                event_id: "loop".to_string(),
            }),
            ResolvedDeps::new(),
        );

        let err = manager
            .emit(&event, serde_json::json!({}), &EventEmitOptions::default())
            .await
            .unwrap_err();

        match err {
            Error::AggregatedEventFailure { source, .. } => {
                assert!(matches!(*source, Error::EventCycle { .. }));
            }
            other => panic!("expected AggregatedEventFailure wrapping EventCycle, got {other:?}"),
        }
    }
}
