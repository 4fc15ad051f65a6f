//! End-to-end executor behaviour against mock backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conflux_aggregator::{SharedNamespace, ToolNamespace, build};
use conflux_config::{AggregationConfig, BackendCatalog, CompositeToolDef, ToolSpec};
use conflux_executor::{
  BackendDispatcher, ChannelNotifier, DispatchError, ElicitationResponse, ExecutionError,
  ExecutionEvent, ExecutorConfig, Outcome, WorkflowExecutor, WorkflowResult,
};
use conflux_store::{InstanceStatus, SqliteCheckpointStore, StepStatus};
use conflux_validator::validate_composite_tool;
use conflux_workflow::Workflow;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Handler = Box<dyn Fn(&Value, u32) -> Result<Value, DispatchError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
struct Call {
  backend: String,
  tool: String,
  arguments: Value,
}

/// Backends keyed by `backend.tool`. Unhandled tools echo their arguments.
#[derive(Default)]
struct MockBackends {
  handlers: HashMap<String, Handler>,
  delays: HashMap<String, Duration>,
  calls: Mutex<Vec<Call>>,
  running: AtomicUsize,
  max_running: AtomicUsize,
}

impl MockBackends {
  fn new() -> Self {
    Self::default()
  }

  fn on(
    mut self,
    key: &str,
    handler: impl Fn(&Value, u32) -> Result<Value, DispatchError> + Send + Sync + 'static,
  ) -> Self {
    self.handlers.insert(key.to_string(), Box::new(handler));
    self
  }

  fn delay(mut self, key: &str, delay: Duration) -> Self {
    self.delays.insert(key.to_string(), delay);
    self
  }

  fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  fn call_count(&self, key: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|c| format!("{}.{}", c.backend, c.tool) == key)
      .count()
  }
}

#[async_trait]
impl BackendDispatcher for MockBackends {
  async fn call(&self, backend: &str, tool: &str, arguments: Value) -> Result<Value, DispatchError> {
    let key = format!("{}.{}", backend, tool);
    let attempt = {
      let mut calls = self.calls.lock().unwrap();
      calls.push(Call {
        backend: backend.to_string(),
        tool: tool.to_string(),
        arguments: arguments.clone(),
      });
      calls
        .iter()
        .filter(|c| c.backend == backend && c.tool == tool)
        .count() as u32
    };

    let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_running.fetch_max(running, Ordering::SeqCst);
    if let Some(delay) = self.delays.get(&key) {
      tokio::time::sleep(*delay).await;
    }
    self.running.fetch_sub(1, Ordering::SeqCst);

    match self.handlers.get(&key) {
      Some(handler) => handler(&arguments, attempt),
      None => Ok(json!({ "echo": arguments })),
    }
  }
}

fn namespace() -> ToolNamespace {
  let catalog = |backend: &str, tools: &[&str]| BackendCatalog {
    backend: backend.to_string(),
    tools: tools.iter().map(|t| ToolSpec::new(*t)).collect(),
  };
  let catalogs = vec![
    catalog(
      "github",
      &["search", "fetch", "create_issue", "flaky", "broken", "slow"],
    ),
    catalog("jira", &["search", "notify"]),
  ];
  build(&catalogs, &AggregationConfig::default())
    .unwrap()
    .namespace
}

fn workflow(mut def: Value) -> Workflow {
  if def.get("description").is_none() {
    def["description"] = json!(format!("{} composite tool", def["name"].as_str().unwrap_or("test")));
  }
  let def: CompositeToolDef = serde_json::from_value(def).unwrap();
  validate_composite_tool("spec.compositeTools[0]", &def, Some(&namespace())).unwrap()
}

fn config() -> ExecutorConfig {
  ExecutorConfig {
    cancel_grace_period: Duration::from_millis(100),
    transport_retry_delay: Duration::from_millis(1),
    ..Default::default()
  }
}

fn executor(backends: &Arc<MockBackends>) -> WorkflowExecutor {
  WorkflowExecutor::new(
    config(),
    SharedNamespace::new(namespace()),
    backends.clone(),
  )
}

fn executor_with_events(
  backends: &Arc<MockBackends>,
) -> (WorkflowExecutor, mpsc::UnboundedReceiver<ExecutionEvent>) {
  let (tx, rx) = mpsc::unbounded_channel();
  let executor = executor(backends).with_notifier(Arc::new(ChannelNotifier::new(tx)));
  (executor, rx)
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}

fn started_instance(events: &[ExecutionEvent]) -> String {
  events
    .iter()
    .find_map(|e| match e {
      ExecutionEvent::WorkflowStarted { instance_id, .. } => Some(instance_id.clone()),
      _ => None,
    })
    .expect("workflow started")
}

fn completed(outcome: Outcome) -> WorkflowResult {
  match outcome {
    Outcome::Completed(result) => result,
    Outcome::Suspended(s) => panic!("unexpected suspension at {}", s.step_id),
  }
}

fn skip_when_disabled() -> Workflow {
  workflow(json!({
    "name": "conditional",
    "steps": [
      {
        "id": "step1",
        "type": "tool",
        "tool": "fetch",
        "condition": "{{.params.run}}",
        "defaultResults": { "data": null }
      },
      {
        "id": "step2",
        "type": "tool",
        "tool": "create_issue",
        "arguments": { "x": "{{.steps.step1.output.data}}" }
      }
    ]
  }))
}

#[tokio::test]
async fn test_skipped_step_feeds_default_results_downstream() {
  let backends = Arc::new(MockBackends::new());
  let exec = executor(&backends);

  let result = completed(
    exec
      .invoke(&skip_when_disabled(), json!({ "run": false }), CancellationToken::new())
      .await
      .unwrap(),
  );

  assert_eq!(result.status, InstanceStatus::Completed);
  assert_eq!(result.steps["step1"].status, StepStatus::Skipped);
  assert_eq!(result.steps["step1"].output, Some(json!({ "data": null })));
  assert_eq!(backends.call_count("github.fetch"), 0);

  let calls = backends.calls();
  assert_eq!(calls.len(), 1);
  assert_eq!(calls[0].tool, "create_issue");
  assert_eq!(calls[0].arguments, json!({ "x": null }));

  // no output mapping: step outputs keyed by step ID
  assert_eq!(
    result.output,
    json!({
      "step1": { "data": null },
      "step2": { "echo": { "x": null } }
    })
  );
}

#[tokio::test]
async fn test_condition_true_runs_step() {
  let backends = Arc::new(MockBackends::new().on("github.fetch", |_, _| Ok(json!({ "data": 42 }))));
  let exec = executor(&backends);

  let result = completed(
    exec
      .invoke(&skip_when_disabled(), json!({ "run": true }), CancellationToken::new())
      .await
      .unwrap(),
  );

  assert_eq!(result.steps["step1"].status, StepStatus::Completed);
  let calls = backends.calls();
  assert_eq!(calls[1].arguments, json!({ "x": 42 }));
}

#[tokio::test]
async fn test_backward_declaration_runs_in_dependency_order() {
  let backends = Arc::new(MockBackends::new());
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "ordered",
    "steps": [
      { "id": "s1", "type": "tool", "tool": "create_issue", "dependsOn": ["s2"] },
      { "id": "s2", "type": "tool", "tool": "fetch" }
    ]
  }));

  completed(exec.invoke(&wf, json!({}), CancellationToken::new()).await.unwrap());

  let tools: Vec<String> = backends.calls().into_iter().map(|c| c.tool).collect();
  assert_eq!(tools, vec!["fetch", "create_issue"]);
}

#[tokio::test]
async fn test_retry_attempts_exactly_retry_count_times() {
  let backends = Arc::new(
    MockBackends::new().on("github.flaky", |_, n| Err(DispatchError::Tool(format!("boom {}", n)))),
  );
  let (exec, mut rx) = executor_with_events(&backends);
  let wf = workflow(json!({
    "name": "retrying",
    "steps": [{
      "id": "s1",
      "type": "tool",
      "tool": "flaky",
      "onError": { "action": "retry", "retryCount": 3, "retryDelay": "1ms" }
    }]
  }));

  let err = exec
    .invoke(&wf, json!({}), CancellationToken::new())
    .await
    .unwrap_err();

  match &err {
    ExecutionError::RetriesExhausted {
      step_id,
      attempts,
      message,
    } => {
      assert_eq!(step_id, "s1");
      assert_eq!(*attempts, 3);
      assert_eq!(message, "boom 3");
    }
    other => panic!("unexpected error: {:?}", other),
  }
  assert_eq!(err.step_id(), Some("s1"));
  assert_eq!(backends.call_count("github.flaky"), 3);

  let events = drain_events(&mut rx);
  let retries = events
    .iter()
    .filter(|e| matches!(e, ExecutionEvent::StepRetrying { .. }))
    .count();
  assert_eq!(retries, 2);

  let checkpoint = exec.status(&started_instance(&events)).await.unwrap();
  assert_eq!(checkpoint.status, InstanceStatus::Failed);
  assert_eq!(checkpoint.steps["s1"].status, StepStatus::Failed);
  assert_eq!(checkpoint.steps["s1"].attempts, 3);
  assert!(checkpoint.error.unwrap().contains("boom 3"));
}

#[tokio::test]
async fn test_retry_recovers_before_exhaustion() {
  let backends = Arc::new(MockBackends::new().on("github.flaky", |_, n| {
    if n < 3 {
      Err(DispatchError::Tool("not yet".to_string()))
    } else {
      Ok(json!({ "ok": true }))
    }
  }));
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "retrying",
    "steps": [{
      "id": "s1",
      "type": "tool",
      "tool": "flaky",
      "onError": { "action": "retry", "retryCount": 5, "retryDelay": "1ms" }
    }]
  }));

  let result = completed(exec.invoke(&wf, json!({}), CancellationToken::new()).await.unwrap());
  assert_eq!(result.steps["s1"].status, StepStatus::Completed);
  assert_eq!(result.steps["s1"].attempts, 3);
}

#[tokio::test]
async fn test_continue_substitutes_default_results() {
  let backends = Arc::new(
    MockBackends::new().on("github.broken", |_, _| Err(DispatchError::Tool("down".to_string()))),
  );
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "tolerant",
    "steps": [
      {
        "id": "s1",
        "type": "tool",
        "tool": "broken",
        "onError": { "action": "continue" },
        "defaultResults": { "count": 0 }
      },
      {
        "id": "s2",
        "type": "tool",
        "tool": "create_issue",
        "arguments": { "n": "{{ steps.s1.output.count }}" }
      }
    ]
  }));

  let result = completed(exec.invoke(&wf, json!({}), CancellationToken::new()).await.unwrap());

  assert_eq!(result.steps["s1"].status, StepStatus::Skipped);
  assert_eq!(result.steps["s1"].error.as_deref(), Some("down"));
  assert_eq!(result.steps["s1"].output, Some(json!({ "count": 0 })));
  assert_eq!(backends.calls()[1].arguments, json!({ "n": 0 }));
}

#[tokio::test]
async fn test_abort_stops_downstream_steps() {
  let backends = Arc::new(
    MockBackends::new().on("github.broken", |_, _| Err(DispatchError::Tool("down".to_string()))),
  );
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "strict",
    "steps": [
      { "id": "s1", "type": "tool", "tool": "broken" },
      { "id": "s2", "type": "tool", "tool": "create_issue", "dependsOn": ["s1"] }
    ]
  }));

  let err = exec
    .invoke(&wf, json!({}), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    ExecutionError::StepFailed { ref step_id, ref message } if step_id == "s1" && message == "down"
  ));
  assert_eq!(backends.call_count("github.create_issue"), 0);
}

#[tokio::test]
async fn test_transport_errors_are_retried_before_step_failure() {
  let backends = Arc::new(MockBackends::new().on("github.fetch", |_, n| {
    if n <= 2 {
      Err(DispatchError::Transport("connection reset".to_string()))
    } else {
      Ok(json!({ "data": 1 }))
    }
  }));
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "transport",
    "steps": [{ "id": "s1", "type": "tool", "tool": "fetch" }]
  }));

  let result = completed(exec.invoke(&wf, json!({}), CancellationToken::new()).await.unwrap());
  assert_eq!(result.steps["s1"].attempts, 1);
  assert_eq!(backends.call_count("github.fetch"), 3);
}

#[tokio::test]
async fn test_exhausted_transport_retries_fail_the_step() {
  let backends = Arc::new(
    MockBackends::new()
      .on("github.fetch", |_, _| Err(DispatchError::Transport("unreachable".to_string()))),
  );
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "transport",
    "steps": [{ "id": "s1", "type": "tool", "tool": "fetch" }]
  }));

  let err = exec
    .invoke(&wf, json!({}), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    ExecutionError::StepFailed { ref message, .. } if message.contains("transport error")
  ));
  // one call plus two transport retries
  assert_eq!(backends.call_count("github.fetch"), 3);
}

fn fan_out(width: usize) -> Workflow {
  let steps: Vec<Value> = (0..width)
    .map(|i| json!({ "id": format!("s{}", i), "type": "tool", "tool": "slow" }))
    .collect();
  workflow(json!({ "name": "fan_out", "steps": steps }))
}

#[tokio::test]
async fn test_independent_steps_run_concurrently() {
  let backends =
    Arc::new(MockBackends::new().delay("github.slow", Duration::from_millis(50)));
  let exec = executor(&backends);

  completed(exec.invoke(&fan_out(4), json!({}), CancellationToken::new()).await.unwrap());
  assert_eq!(backends.max_running.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
  let backends =
    Arc::new(MockBackends::new().delay("github.slow", Duration::from_millis(30)));
  let exec = WorkflowExecutor::new(
    ExecutorConfig {
      max_parallel_steps: 2,
      ..config()
    },
    SharedNamespace::new(namespace()),
    backends.clone(),
  );

  let result = completed(exec.invoke(&fan_out(5), json!({}), CancellationToken::new()).await.unwrap());
  assert_eq!(result.steps.len(), 5);
  assert_eq!(backends.max_running.load(Ordering::SeqCst), 2);
  assert_eq!(backends.call_count("github.slow"), 5);
}

#[tokio::test]
async fn test_step_timeout_fails_step() {
  let backends =
    Arc::new(MockBackends::new().delay("github.slow", Duration::from_millis(500)));
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "slow",
    "steps": [{ "id": "s1", "type": "tool", "tool": "slow", "timeout": "20ms" }]
  }));

  let err = exec
    .invoke(&wf, json!({}), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    ExecutionError::StepFailed { ref message, .. } if message.contains("timed out")
  ));
}

#[tokio::test]
async fn test_workflow_timeout() {
  let backends =
    Arc::new(MockBackends::new().delay("github.slow", Duration::from_millis(500)));
  let (exec, mut rx) = executor_with_events(&backends);
  let wf = workflow(json!({
    "name": "slow",
    "timeout": "30ms",
    "steps": [{ "id": "s1", "type": "tool", "tool": "slow" }]
  }));

  let err = exec
    .invoke(&wf, json!({}), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, ExecutionError::Timeout { timeout_ms: 30 }));

  let checkpoint = exec
    .status(&started_instance(&drain_events(&mut rx)))
    .await
    .unwrap();
  assert_eq!(checkpoint.status, InstanceStatus::Failed);
  assert_eq!(checkpoint.steps["s1"].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_external_cancellation_aborts() {
  let backends =
    Arc::new(MockBackends::new().delay("github.slow", Duration::from_millis(500)));
  let (exec, mut rx) = executor_with_events(&backends);
  let wf = workflow(json!({
    "name": "slow",
    "steps": [
      { "id": "s1", "type": "tool", "tool": "slow" },
      { "id": "s2", "type": "tool", "tool": "create_issue", "dependsOn": ["s1"] }
    ]
  }));

  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(20)).await;
    trigger.cancel();
  });

  let err = exec.invoke(&wf, json!({}), cancel).await.unwrap_err();
  assert!(matches!(err, ExecutionError::Cancelled));
  assert_eq!(backends.call_count("github.create_issue"), 0);

  let checkpoint = exec
    .status(&started_instance(&drain_events(&mut rx)))
    .await
    .unwrap();
  assert_eq!(checkpoint.status, InstanceStatus::Aborted);
}

#[tokio::test]
async fn test_tool_references_route_to_original_names() {
  let backends = Arc::new(MockBackends::new());
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "routing",
    "steps": [
      { "id": "a", "type": "tool", "tool": "github_search" },
      { "id": "b", "type": "tool", "tool": "jira.search" },
      { "id": "c", "type": "tool", "tool": "notify" }
    ]
  }));

  completed(exec.invoke(&wf, json!({}), CancellationToken::new()).await.unwrap());

  let mut routed: Vec<(String, String)> = backends
    .calls()
    .into_iter()
    .map(|c| (c.backend, c.tool))
    .collect();
  routed.sort();
  assert_eq!(
    routed,
    vec![
      ("github".to_string(), "search".to_string()),
      ("jira".to_string(), "notify".to_string()),
      ("jira".to_string(), "search".to_string()),
    ]
  );
}

#[tokio::test]
async fn test_unknown_tool_at_runtime() {
  let backends = Arc::new(MockBackends::new());
  let exec = executor(&backends);
  let def: CompositeToolDef = serde_json::from_value(json!({
    "name": "stale",
    "description": "Calls a tool that left the namespace",
    "steps": [{ "id": "s1", "type": "tool", "tool": "removed_tool" }]
  }))
  .unwrap();
  let wf = validate_composite_tool("spec.compositeTools[0]", &def, None).unwrap();

  let err = exec
    .invoke(&wf, json!({}), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    ExecutionError::ToolNotFound { ref tool, .. } if tool == "removed_tool"
  ));
}

#[tokio::test]
async fn test_parameter_defaults_and_output_mapping() {
  let backends = Arc::new(MockBackends::new().on("github.search", |args, _| {
    Ok(json!({ "total": args["limit"].to_string(), "query": args["q"] }))
  }));
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "search",
    "parameters": {
      "type": "object",
      "properties": {
        "q": { "type": "string" },
        "limit": { "type": "integer", "default": 10 }
      }
    },
    "steps": [{
      "id": "find",
      "type": "tool",
      "tool": "github.search",
      "arguments": { "q": "{{ params.q }}", "limit": "{{ params.limit }}" }
    }],
    "output": {
      "properties": {
        "total": { "type": "integer", "value": "{{ steps.find.output.total }}" },
        "summary": { "type": "string", "value": "{{ params.q }}: {{ steps.find.output.total }} hits" }
      },
      "required": ["total"]
    }
  }));

  let result = completed(
    exec
      .invoke(&wf, json!({ "q": "bug" }), CancellationToken::new())
      .await
      .unwrap(),
  );

  assert_eq!(backends.calls()[0].arguments, json!({ "q": "bug", "limit": 10 }));
  assert_eq!(result.output, json!({ "total": 10, "summary": "bug: 10 hits" }));
}

#[tokio::test]
async fn test_events_for_simple_run() {
  let backends = Arc::new(MockBackends::new());
  let (exec, mut rx) = executor_with_events(&backends);
  let wf = workflow(json!({
    "name": "single",
    "steps": [{ "id": "s1", "type": "tool", "tool": "fetch" }]
  }));

  let result = completed(exec.invoke(&wf, json!({}), CancellationToken::new()).await.unwrap());
  let events = drain_events(&mut rx);
  let id = result.instance_id.clone();

  assert_eq!(
    events,
    vec![
      ExecutionEvent::WorkflowStarted {
        instance_id: id.clone(),
        workflow: "single".to_string(),
      },
      ExecutionEvent::StepStarted {
        instance_id: id.clone(),
        step_id: "s1".to_string(),
      },
      ExecutionEvent::StepCompleted {
        instance_id: id.clone(),
        step_id: "s1".to_string(),
        output: json!({ "echo": {} }),
      },
      ExecutionEvent::WorkflowCompleted { instance_id: id },
    ]
  );
}

fn confirm_flow(on_decline: &str, on_cancel: &str, timeout: Option<&str>) -> Workflow {
  let mut confirm = json!({
    "id": "confirm",
    "type": "elicitation",
    "message": "Create issue for {{ steps.fetch.output.data }}?",
    "schema": { "type": "object", "properties": { "title": { "type": "string" } } },
    "onDecline": { "action": on_decline },
    "onCancel": { "action": on_cancel }
  });
  if let Some(timeout) = timeout {
    confirm["timeout"] = json!(timeout);
  }

  workflow(json!({
    "name": "confirm_flow",
    "steps": [
      { "id": "fetch", "type": "tool", "tool": "fetch" },
      confirm,
      {
        "id": "create",
        "type": "tool",
        "tool": "create_issue",
        "dependsOn": ["confirm"],
        "arguments": { "answer": "{{ steps.confirm.output.action }}" }
      }
    ],
    "output": {
      "properties": {
        "fetched": { "type": "integer", "value": "{{ steps.fetch.output.data }}" },
        "issue": { "type": "string", "value": "{{ steps.create.output.echo.answer }}" }
      }
    }
  }))
}

fn fetch_backends() -> Arc<MockBackends> {
  Arc::new(MockBackends::new().on("github.fetch", |_, _| Ok(json!({ "data": 42 }))))
}

async fn suspend(exec: &WorkflowExecutor, wf: &Workflow) -> String {
  match exec.invoke(wf, json!({}), CancellationToken::new()).await.unwrap() {
    Outcome::Suspended(suspension) => {
      assert_eq!(suspension.step_id, "confirm");
      assert_eq!(suspension.message, "Create issue for 42?");
      assert!(suspension.schema.is_some());
      suspension.instance_id
    }
    Outcome::Completed(_) => panic!("expected suspension"),
  }
}

#[tokio::test]
async fn test_elicitation_suspends_and_accept_resumes() {
  let backends = fetch_backends();
  let exec = executor(&backends);
  let wf = confirm_flow("abort", "abort", None);

  let id = suspend(&exec, &wf).await;
  assert_eq!(backends.call_count("github.create_issue"), 0);

  let checkpoint = exec.status(&id).await.unwrap();
  assert_eq!(checkpoint.status, InstanceStatus::AwaitingElicitation);
  assert_eq!(checkpoint.steps["fetch"].status, StepStatus::Completed);
  assert_eq!(checkpoint.steps["confirm"].status, StepStatus::AwaitingElicitation);
  assert_eq!(exec.active_instances().await.unwrap(), vec![id.clone()]);

  let result = completed(
    exec
      .resume(
        &wf,
        &id,
        ElicitationResponse::accept(json!({ "title": "t" })),
        CancellationToken::new(),
      )
      .await
      .unwrap(),
  );

  assert_eq!(
    result.steps["confirm"].output,
    Some(json!({ "action": "accept", "content": { "title": "t" } }))
  );
  assert_eq!(result.output, json!({ "fetched": 42, "issue": "accept" }));
  assert!(exec.active_instances().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_decline_with_skip_remaining_finishes_early() {
  let backends = fetch_backends();
  let exec = executor(&backends);
  let wf = confirm_flow("skip_remaining", "abort", None);

  let id = suspend(&exec, &wf).await;
  let result = completed(
    exec
      .resume(&wf, &id, ElicitationResponse::decline(), CancellationToken::new())
      .await
      .unwrap(),
  );

  assert_eq!(result.steps["confirm"].status, StepStatus::Completed);
  assert_eq!(
    result.steps["confirm"].output,
    Some(json!({ "action": "decline", "content": null, "skipped": true }))
  );
  assert_eq!(result.steps["create"].status, StepStatus::Skipped);
  assert_eq!(backends.call_count("github.create_issue"), 0);
  // the skipped branch contributes nothing
  assert_eq!(result.output, json!({ "fetched": 42 }));
}

#[tokio::test]
async fn test_decline_with_continue_runs_downstream() {
  let backends = fetch_backends();
  let exec = executor(&backends);
  let wf = confirm_flow("continue", "abort", None);

  let id = suspend(&exec, &wf).await;
  let result = completed(
    exec
      .resume(&wf, &id, ElicitationResponse::decline(), CancellationToken::new())
      .await
      .unwrap(),
  );

  assert_eq!(result.output, json!({ "fetched": 42, "issue": "decline" }));
}

#[tokio::test]
async fn test_cancel_with_abort_fails_workflow() {
  let backends = fetch_backends();
  let exec = executor(&backends);
  let wf = confirm_flow("continue", "abort", None);

  let id = suspend(&exec, &wf).await;
  let err = exec
    .resume(&wf, &id, ElicitationResponse::cancel(), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    ExecutionError::ElicitationCancelled { ref step_id } if step_id == "confirm"
  ));
  let checkpoint = exec.status(&id).await.unwrap();
  assert_eq!(checkpoint.status, InstanceStatus::Aborted);
  assert_eq!(checkpoint.steps["confirm"].status, StepStatus::Failed);
  assert_eq!(checkpoint.steps["create"].status, StepStatus::Waiting);
}

#[tokio::test]
async fn test_late_response_counts_as_cancel() {
  let backends = fetch_backends();
  let exec = executor(&backends);
  let wf = confirm_flow("abort", "continue", Some("1ms"));

  let id = suspend(&exec, &wf).await;
  tokio::time::sleep(Duration::from_millis(20)).await;

  let result = completed(
    exec
      .resume(
        &wf,
        &id,
        ElicitationResponse::accept(json!({ "title": "late" })),
        CancellationToken::new(),
      )
      .await
      .unwrap(),
  );
  assert_eq!(result.output, json!({ "fetched": 42, "issue": "cancel" }));
}

#[tokio::test]
async fn test_resume_rejects_wrong_instances() {
  let backends = fetch_backends();
  let exec = executor(&backends);
  let wf = confirm_flow("abort", "abort", None);

  let err = exec
    .resume(&wf, "missing", ElicitationResponse::decline(), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, ExecutionError::InstanceNotFound(_)));

  let id = suspend(&exec, &wf).await;
  let other = skip_when_disabled();
  let err = exec
    .resume(&other, &id, ElicitationResponse::decline(), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(err, ExecutionError::WorkflowMismatch { .. }));

  let cancelled = exec.cancel(&id).await.unwrap();
  assert_eq!(cancelled.status, InstanceStatus::Aborted);
  assert_eq!(cancelled.steps["confirm"].status, StepStatus::Failed);

  let err = exec
    .resume(&wf, &id, ElicitationResponse::decline(), CancellationToken::new())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    ExecutionError::NotSuspended { status: InstanceStatus::Aborted, .. }
  ));
}

#[tokio::test]
async fn test_resume_from_another_executor() {
  let store = Arc::new(SqliteCheckpointStore::in_memory().await.unwrap());
  let wf = confirm_flow("abort", "abort", None);

  let first_backends = fetch_backends();
  let first = executor(&first_backends).with_store(store.clone());
  let id = suspend(&first, &wf).await;
  drop(first);

  let second_backends = fetch_backends();
  let second = executor(&second_backends).with_store(store);
  let result = completed(
    second
      .resume(
        &wf,
        &id,
        ElicitationResponse::accept(json!({})),
        CancellationToken::new(),
      )
      .await
      .unwrap(),
  );

  assert_eq!(result.instance_id, id);
  assert_eq!(result.output, json!({ "fetched": 42, "issue": "accept" }));
  // fetch ran before the suspension and is not repeated
  assert_eq!(second_backends.call_count("github.fetch"), 0);
  assert_eq!(second_backends.call_count("github.create_issue"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resumes_have_one_owner() {
  let store = Arc::new(SqliteCheckpointStore::in_memory().await.unwrap());
  let backends = Arc::new(
    MockBackends::new()
      .on("github.fetch", |_, _| Ok(json!({ "data": 42 })))
      .delay("github.create_issue", Duration::from_millis(20)),
  );
  let exec = Arc::new(executor(&backends).with_store(store));
  let wf = confirm_flow("abort", "abort", None);
  let id = suspend(&exec, &wf).await;

  let resumes: Vec<_> = (0..4)
    .map(|_| {
      let exec = exec.clone();
      let wf = wf.clone();
      let id = id.clone();
      tokio::spawn(async move {
        exec
          .resume(
            &wf,
            &id,
            ElicitationResponse::accept(json!({})),
            CancellationToken::new(),
          )
          .await
      })
    })
    .collect();

  let mut completed_runs = 0;
  for resume in resumes {
    match resume.await.unwrap() {
      Ok(Outcome::Completed(result)) => {
        assert_eq!(result.status, InstanceStatus::Completed);
        completed_runs += 1;
      }
      Ok(Outcome::Suspended(s)) => panic!("unexpected suspension at {}", s.step_id),
      Err(ExecutionError::NotSuspended { status, .. }) => {
        assert_ne!(status, InstanceStatus::AwaitingElicitation);
      }
      Err(e) => panic!("unexpected error: {e}"),
    }
  }

  assert_eq!(completed_runs, 1);
  assert_eq!(backends.call_count("github.create_issue"), 1);
  assert_eq!(
    exec.status(&id).await.unwrap().status,
    InstanceStatus::Completed
  );
}

#[tokio::test]
async fn test_cancel_after_resume_leaves_result() {
  let backends = fetch_backends();
  let exec = executor(&backends);
  let wf = confirm_flow("abort", "abort", None);
  let id = suspend(&exec, &wf).await;

  completed(
    exec
      .resume(&wf, &id, ElicitationResponse::accept(json!({})), CancellationToken::new())
      .await
      .unwrap(),
  );

  let checkpoint = exec.cancel(&id).await.unwrap();
  assert_eq!(checkpoint.status, InstanceStatus::Completed);
  assert!(checkpoint.error.is_none());
}

#[tokio::test]
async fn test_every_skippable_step_skipped_still_renders() {
  let backends = Arc::new(
    MockBackends::new().on("github.broken", |_, _| Err(DispatchError::Tool("down".to_string()))),
  );
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "all_skipped",
    "steps": [
      {
        "id": "lookup",
        "type": "tool",
        "tool": "fetch",
        "condition": "{{ params.lookup }}",
        "defaultResults": { "data": { "id": 0 }, "found": false }
      },
      {
        "id": "enrich",
        "type": "tool",
        "tool": "broken",
        "onError": { "action": "continue" },
        "arguments": { "id": "{{ steps.lookup.output.data.id }}" },
        "defaultResults": { "labels": [] }
      },
      {
        "id": "confirm",
        "type": "elicitation",
        "message": "Found {{ steps.lookup.output.found }}, labels {{ steps.enrich.output.labels }}?",
        "condition": "{{ params.interactive }}",
        "defaultResults": { "action": "skipped" }
      },
      {
        "id": "report",
        "type": "tool",
        "tool": "create_issue",
        "arguments": {
          "found": "{{ steps.lookup.output.found }}",
          "labels": "{{ steps.enrich.output.labels }}",
          "answer": "{{ steps.confirm.output.action }}"
        }
      }
    ],
    "output": {
      "properties": {
        "found": { "type": "boolean", "value": "{{ steps.lookup.output.found }}" },
        "answer": { "type": "string", "value": "{{ steps.confirm.output.action }}" },
        "labels": { "type": "array", "value": "{{ steps.enrich.output.labels }}" }
      },
      "required": ["found", "answer", "labels"]
    }
  }));

  let result = completed(
    exec
      .invoke(
        &wf,
        json!({ "lookup": false, "interactive": false }),
        CancellationToken::new(),
      )
      .await
      .unwrap(),
  );

  assert_eq!(result.status, InstanceStatus::Completed);
  for id in ["lookup", "enrich", "confirm"] {
    assert_eq!(result.steps[id].status, StepStatus::Skipped, "step {id}");
  }
  assert_eq!(
    backends.calls().last().unwrap().arguments,
    json!({ "found": false, "labels": [], "answer": "skipped" })
  );
  assert_eq!(
    result.output,
    json!({ "found": false, "answer": "skipped", "labels": [] })
  );
}

#[tokio::test]
async fn test_elicitation_with_false_condition_is_skipped() {
  let backends = Arc::new(MockBackends::new());
  let exec = executor(&backends);
  let wf = workflow(json!({
    "name": "optional_confirm",
    "steps": [
      {
        "id": "confirm",
        "type": "elicitation",
        "message": "Proceed?",
        "condition": "{{ params.interactive }}"
      },
      { "id": "act", "type": "tool", "tool": "create_issue", "dependsOn": ["confirm"] }
    ]
  }));

  let result = completed(
    exec
      .invoke(&wf, json!({ "interactive": false }), CancellationToken::new())
      .await
      .unwrap(),
  );
  assert_eq!(result.steps["confirm"].status, StepStatus::Skipped);
  assert_eq!(result.steps["act"].status, StepStatus::Completed);
}
