//! P9 (input validation failure message shape), P10 (`everywhere`
//! middleware prepended exactly once, in declaration order), and the
//! `onError` event a failing task run emits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use forge_runtime::event_manager::Emission;
use forge_runtime::{
    Error, EventManager, Everywhere, Hook, HookTarget, Next, RegistrationWriter, ResolvedDeps,
    Result, Schema, Task, TaskMiddleware, TaskMiddlewareCall, TaskRunner, TaskWrapper,
};

#[derive(Debug)]
struct NonEmptyString;

impl Schema for NonEmptyString {
    fn validate(&self, value: &serde_json::Value) -> std::result::Result<(), String> {
        match value.as_str() {
            Some(s) if !s.is_empty() => Ok(()),
            _ => Err("expected a non-empty string".to_string()),
        }
    }
}

struct SendEmail;

#[async_trait]
impl Task for SendEmail {
    type Input = String;
    type Output = String;
    fn id(&self) -> &str {
        "send_email"
    }
    fn input_schema(&self) -> Option<Arc<dyn Schema>> {
        Some(Arc::new(NonEmptyString))
    }
    async fn run(&self, input: String, _deps: &ResolvedDeps) -> Result<String> {
        Ok(input)
    }
}

fn build_runner(middleware_ids: &[&'static str]) -> (TaskRunner, Arc<std::sync::Mutex<Vec<&'static str>>>) {
    let order_log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut writer = RegistrationWriter::new();
    writer.add_task(Arc::new(TaskWrapper::new(SendEmail))).unwrap();
    for name in middleware_ids {
        writer
            .add_task_middleware(Arc::new(Logging { name, log: Arc::clone(&order_log) }))
            .unwrap();
    }
    let store = Arc::new(writer.seal().unwrap());
    let events = Arc::new(EventManager::new());
    let runner = TaskRunner::new(store, events, Arc::new(HashMap::new()), HashMap::new());
    (runner, order_log)
}

struct Logging {
    name: &'static str,
    log: Arc<std::sync::Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl TaskMiddleware for Logging {
    fn id(&self) -> &str {
        self.name
    }
    fn everywhere(&self) -> Everywhere {
        Everywhere::Always
    }
    async fn run(
        &self,
        _call: &TaskMiddlewareCall<'_>,
        _deps: &ResolvedDeps,
        next: Next,
    ) -> Result<serde_json::Value> {
        self.log.lock().unwrap().push(self.name);
        next.call(serde_json::json!("ok")).await
    }
}

#[tokio::test]
async fn invalid_input_reports_the_expected_message_shape() {
    let (runner, _log) = build_runner(&[]);
    let err = runner
        .run("send_email", serde_json::json!(""))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InputValidation { .. }));
    assert_eq!(
        err.to_string(),
        "task input validation failed for send_email: expected a non-empty string"
    );
}

#[tokio::test]
async fn everywhere_middlewares_run_once_in_declaration_order() {
    let (runner, log) = build_runner(&["first", "second", "third"]);
    runner.run("send_email", serde_json::json!("hi")).await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

struct FailingTask;

#[async_trait]
impl Task for FailingTask {
    type Input = ();
    type Output = ();
    fn id(&self) -> &str {
        "failing_task"
    }
    async fn run(&self, _input: (), _deps: &ResolvedDeps) -> Result<()> {
        Err(Error::Internal {
            message: "deliberate failure".to_string(),
            source: None,
        })
    }
}

struct OnErrorListener {
    hits: Arc<AtomicUsize>,
}

#[async_trait]
impl Hook for OnErrorListener {
    fn id(&self) -> &str {
        "on_error_listener"
    }
    fn on(&self) -> HookTarget {
        HookTarget::One("failing_task.onError".into())
    }
    async fn run(&self, emission: &Emission, _deps: &ResolvedDeps) -> Result<()> {
        assert_eq!(emission.payload["task_id"], serde_json::json!("failing_task"));
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn a_failing_task_emits_its_on_error_event() {
    let mut writer = RegistrationWriter::new();
    writer.add_task(Arc::new(TaskWrapper::new(FailingTask))).unwrap();
    let store = Arc::new(writer.seal().unwrap());

    let events = Arc::new(EventManager::new());
    let hits = Arc::new(AtomicUsize::new(0));
    events.register_hook(
        Arc::new(OnErrorListener { hits: Arc::clone(&hits) }),
        ResolvedDeps::new(),
    );

    let runner = TaskRunner::new(store, Arc::clone(&events), Arc::new(HashMap::new()), HashMap::new());

    let err = runner.run("failing_task", serde_json::json!(null)).await.unwrap_err();
    assert!(matches!(err, Error::Internal { .. }));

    // emit_on_error uses throw_on_error: false and is fire-and-forget from
    // run()'s perspective, but the listener still executes synchronously
    // before `run` returns because emit().await is awaited internally.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
