//! A single tool step running in its own task.

use std::sync::Arc;
use std::time::Duration;

use conflux_config::format_duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::dispatch::BackendDispatcher;
use crate::error::DispatchError;
use crate::events::{ExecutionEvent, ExecutionNotifier};

/// Everything a spawned step needs; owned so it can cross into a task.
pub(crate) struct StepCall {
  pub instance_id: String,
  pub step_id: String,
  pub backend: String,
  /// Backend's own tool name.
  pub tool: String,
  pub arguments: serde_json::Value,
  /// Total attempts, at least one.
  pub attempts: u32,
  pub retry_delay: Duration,
  pub timeout: Duration,
  pub transport_retries: u32,
  pub transport_retry_delay: Duration,
  pub dispatcher: Arc<dyn BackendDispatcher>,
  pub notifier: Arc<dyn ExecutionNotifier>,
  pub cancel: CancellationToken,
}

/// What a finished step task reports back to the scheduler.
#[derive(Debug)]
pub(crate) struct CallOutcome {
  pub step_id: String,
  pub attempts: u32,
  pub result: Result<serde_json::Value, String>,
}

impl StepCall {
  /// Run the call, retrying failed attempts with a linearly growing delay.
  #[instrument(
    name = "step_execute",
    skip(self),
    fields(
      instance_id = %self.instance_id,
      step_id = %self.step_id,
      backend = %self.backend,
      tool = %self.tool,
    )
  )]
  pub async fn run(self) -> CallOutcome {
    let mut last_error = String::new();

    for attempt in 1..=self.attempts {
      let result = tokio::select! {
        result = self.call_once() => result,
        _ = self.cancel.cancelled() => return self.outcome(attempt, Err("cancelled".to_string())),
      };

      match result {
        Ok(output) => return self.outcome(attempt, Ok(output)),
        Err(e) => {
          last_error = e;
          if attempt == self.attempts {
            break;
          }

          let wait = self.retry_delay * attempt;
          warn!(
            attempt,
            max_attempts = self.attempts,
            delay_ms = wait.as_millis() as u64,
            error = %last_error,
            "step_retrying"
          );
          self.notifier.notify(ExecutionEvent::StepRetrying {
            instance_id: self.instance_id.clone(),
            step_id: self.step_id.clone(),
            attempt,
            error: last_error.clone(),
          });

          tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.cancel.cancelled() => return self.outcome(attempt, Err("cancelled".to_string())),
          }
        }
      }
    }

    self.outcome(self.attempts, Err(last_error))
  }

  /// One attempt: the dispatcher call under the step timeout, with transport
  /// errors retried in place.
  async fn call_once(&self) -> Result<serde_json::Value, String> {
    let mut transport_failures = 0;

    loop {
      let call = self
        .dispatcher
        .call(&self.backend, &self.tool, self.arguments.clone());

      match tokio::time::timeout(self.timeout, call).await {
        Err(_) => {
          return Err(format!("timed out after {}", format_duration(self.timeout)));
        }
        Ok(Ok(output)) => return Ok(output),
        Ok(Err(DispatchError::Tool(message))) => return Err(message),
        Ok(Err(err @ DispatchError::Transport(_))) => {
          if transport_failures >= self.transport_retries {
            return Err(err.to_string());
          }
          transport_failures += 1;
          debug!(error = %err, transport_failures, "transport error, retrying call");
          tokio::time::sleep(self.transport_retry_delay).await;
        }
      }
    }
  }

  fn outcome(&self, attempts: u32, result: Result<serde_json::Value, String>) -> CallOutcome {
    CallOutcome {
      step_id: self.step_id.clone(),
      attempts,
      result,
    }
  }
}
