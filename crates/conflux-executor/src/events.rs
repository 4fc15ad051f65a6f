//! Execution events and notifiers for observability.
//!
//! Events are emitted during composite tool execution to allow consumers to
//! observe progress, stream to clients, record audit trails, etc.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during composite tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A new invocation has started.
  WorkflowStarted {
    instance_id: String,
    workflow: String,
  },

  /// A suspended invocation has resumed.
  WorkflowResumed {
    instance_id: String,
    step_id: String,
  },

  /// A step has started executing.
  StepStarted {
    instance_id: String,
    step_id: String,
  },

  /// A step has completed successfully.
  StepCompleted {
    instance_id: String,
    step_id: String,
    output: serde_json::Value,
  },

  /// A step was skipped; `output` holds its default results.
  StepSkipped {
    instance_id: String,
    step_id: String,
    output: Option<serde_json::Value>,
  },

  /// A step attempt failed and will be retried.
  StepRetrying {
    instance_id: String,
    step_id: String,
    attempt: u32,
    error: String,
  },

  /// A step has failed.
  StepFailed {
    instance_id: String,
    step_id: String,
    error: String,
  },

  /// The invocation is suspended waiting for user input.
  ElicitationRequested {
    instance_id: String,
    step_id: String,
    message: String,
  },

  /// The invocation has completed successfully.
  WorkflowCompleted { instance_id: String },

  /// The invocation has failed or was aborted.
  WorkflowFailed { instance_id: String, error: String },
}

/// Trait for receiving execution events.
///
/// The executor calls `notify` for each event; implementations decide what
/// to do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
