//! Runs a task through its attached middleware chain, threading a journal
//! and enforcing input/result schema validation at the boundary.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::DefId;
use crate::error::{Error, Result};
use crate::event_def::EventDef;
use crate::event_manager::{EventEmitOptions, EventManager};
use crate::middleware::{BoxFuture, Everywhere, InterceptorMiddleware, Next, TaskMiddleware, TaskMiddlewareCall};
use crate::resolved::ResolvedDeps;
use crate::store::Store;
use crate::task::{Journal, TaskHandler};

/// Runs tasks against a sealed [`Store`], composing each task's attached
/// middleware into a `next`-chain before dispatching to the task body.
pub struct TaskRunner {
    store: Arc<Store>,
    events: Arc<EventManager>,
    resolved: Arc<HashMap<DefId, ResolvedDeps>>,
    /// Task ids explicitly tunneled by another task, keyed by tunneled id.
    tunnels: HashMap<DefId, DefId>,
}

impl TaskRunner {
    /// Build a runner over a sealed store, with every definition's resolved
    /// dependency view already computed (typically by
    /// [`crate::runtime::Runtime`] during boot).
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        events: Arc<EventManager>,
        resolved: Arc<HashMap<DefId, ResolvedDeps>>,
        tunnels: HashMap<DefId, DefId>,
    ) -> Self {
        Self {
            store,
            events,
            resolved,
            tunnels,
        }
    }

    fn resolved_for(&self, id: &str) -> ResolvedDeps {
        self.resolved.get(id).cloned().unwrap_or_default()
    }

    /// Interceptors run first, in attachment order, then `everywhere`
    /// middleware in declaration order (§4.4). `tunneled_source`, when
    /// present, is the id the caller actually asked for (before tunnel
    /// redirection) and gates `everywhere` middleware through that source
    /// task's `tunnel_policy` tag, per §4.4's tunneling middleware policy.
    fn chain_for(&self, effective_id: &str, tunneled_source: Option<&str>) -> Vec<Arc<dyn TaskMiddleware>> {
        let mut chain: Vec<Arc<dyn TaskMiddleware>> = self
            .store
            .interceptors(effective_id)
            .iter()
            .enumerate()
            .map(|(i, interceptor)| {
                Arc::new(InterceptorMiddleware {
                    id: format!("{effective_id}.interceptor.{i}"),
                    interceptor: Arc::clone(interceptor),
                }) as Arc<dyn TaskMiddleware>
            })
            .collect();

        let everywhere = self
            .store
            .task_middlewares()
            .filter(|mw| mw.everywhere().applies_to(effective_id));

        match tunneled_source {
            None => chain.extend(everywhere.cloned()),
            Some(source_id) => match self.tunnel_policy_allow_list(source_id) {
                None => {}
                Some(allow_list) => {
                    chain.extend(everywhere.filter(|mw| allow_list.contains(&mw.id().to_string())).cloned());
                }
            },
        }

        chain
    }

    /// Reads the `tunnel_policy` tag's `client.middleware_allow_list` off
    /// the tunneled task's own definition. No tag means no local middleware
    /// at all; an empty list means the same; a configured list restricts to
    /// exactly those middleware ids (§4.4 "Tunneling").
    fn tunnel_policy_allow_list(&self, tunneled_task_id: &str) -> Option<Vec<String>> {
        let handler = self.store.task(tunneled_task_id)?;
        let tag = handler.tags().iter().find(|t| t.id == "tunnel_policy")?;
        let config = tag.config.as_ref()?;
        let list = config.get("client")?.get("middleware_allow_list")?.as_array()?;
        Some(list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
    }

    /// Run a task by id against a raw JSON input.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no task is registered under `task_id`,
    /// or any error raised by schema validation, middleware, or the task
    /// body itself.
    pub async fn run(&self, task_id: &str, input: serde_json::Value) -> Result<serde_json::Value> {
        let effective_id = self.tunnels.get(task_id).map_or(task_id, String::as_str);
        let handler = Arc::clone(self.store.task(effective_id).ok_or_else(|| Error::NotFound {
            kind: "task".to_string(),
            id: effective_id.to_string(),
        })?);

        handler.validate_input(&input)?;

        let journal = Arc::new(Journal::new());
        let deps = self.resolved_for(effective_id);
        let tunneled_source = (effective_id != task_id).then_some(task_id);
        let chain = Arc::new(self.chain_for(effective_id, tunneled_source));
        let task_id_owned: Arc<str> = Arc::from(effective_id);

        let result = run_chain(
            Arc::clone(&task_id_owned),
            Arc::clone(&self.resolved),
            chain,
            0,
            input,
            deps,
            Arc::clone(&journal),
            Arc::clone(&handler),
        )
        .await;

        match &result {
            Ok(output) => {
                handler.validate_result(output)?;
                journal.record("task", "completed");
            }
            Err(err) => {
                journal.record("task", format!("failed: {err}"));
                self.emit_on_error(effective_id, err).await;
            }
        }

        result
    }

    async fn emit_on_error(&self, task_id: &str, err: &Error) {
        let event = EventDef::new(format!("{task_id}.onError"));
        let payload = serde_json::json!({
            "task_id": task_id,
            "error_id": err.id(),
            "message": err.to_string(),
        });
        let options = EventEmitOptions {
            throw_on_error: false,
            ..EventEmitOptions::default()
        };
        let _ = self.events.emit(&event, payload, &options).await;
    }
}

/// Recursively drives `chain[index..]` then the task body, entirely through
/// owned/`Arc`-cloned state so the `next` continuation handed to each
/// middleware is `'static` regardless of how deep the chain is.
fn run_chain(
    task_id: Arc<str>,
    resolved: Arc<HashMap<DefId, ResolvedDeps>>,
    chain: Arc<Vec<Arc<dyn TaskMiddleware>>>,
    index: usize,
    input: serde_json::Value,
    deps: ResolvedDeps,
    journal: Arc<Journal>,
    handler: Arc<dyn TaskHandler>,
) -> BoxFuture<Result<serde_json::Value>> {
    Box::pin(async move {
        if index >= chain.len() {
            journal.record("task", "invoking task body");
            return handler.run_any(input, &deps).await;
        }

        let mw = Arc::clone(&chain[index]);
        let mw_deps = resolved.get(mw.id()).cloned().unwrap_or_default();
        journal.record(mw.id(), "entered");

        let call = TaskMiddlewareCall {
            task_id: &task_id,
            task_deps: &deps,
            journal: &journal,
        };

        let next_task_id = Arc::clone(&task_id);
        let next_resolved = Arc::clone(&resolved);
        let next_chain = Arc::clone(&chain);
        let next_deps = deps.clone();
        let next_journal = Arc::clone(&journal);
        let next_handler = Arc::clone(&handler);

        let next = Next::new(move |forwarded| {
            run_chain(
                next_task_id,
                next_resolved,
                next_chain,
                index + 1,
                forwarded,
                next_deps,
                next_journal,
                next_handler,
            )
        });

        mw.run(&call, &mw_deps, next).await
    })
}
