use conflux_store::{InstanceStatus, StoreError};
use thiserror::Error;

/// Errors that end a composite tool invocation.
#[derive(Debug, Error)]
pub enum ExecutionError {
  /// A step failed under the abort policy.
  #[error("step '{step_id}' failed: {message}")]
  StepFailed { step_id: String, message: String },

  /// A step failed on every attempt of its retry policy.
  #[error("step '{step_id}' failed after {attempts} attempts: {message}")]
  RetriesExhausted {
    step_id: String,
    attempts: u32,
    message: String,
  },

  /// The step's tool is not in the current namespace.
  #[error("step '{step_id}' calls unknown tool '{tool}'")]
  ToolNotFound { step_id: String, tool: String },

  /// A step template (arguments, condition or message) failed to evaluate.
  #[error("step '{step_id}' template error: {message}")]
  Template { step_id: String, message: String },

  /// The output mapping could not be built.
  #[error("output property '{property}': {message}")]
  Output { property: String, message: String },

  #[error("elicitation '{step_id}' was declined")]
  ElicitationDeclined { step_id: String },

  #[error("elicitation '{step_id}' was cancelled")]
  ElicitationCancelled { step_id: String },

  /// The elicitation request could not be delivered.
  #[error("elicitation '{step_id}' failed: {message}")]
  Elicitation { step_id: String, message: String },

  #[error("workflow timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  #[error("workflow cancelled")]
  Cancelled,

  #[error("workflow instance not found: {0}")]
  InstanceNotFound(String),

  #[error("workflow instance '{instance_id}' is {status}, not awaiting elicitation")]
  NotSuspended {
    instance_id: String,
    status: InstanceStatus,
  },

  #[error("workflow instance '{instance_id}' belongs to '{actual}', not '{expected}'")]
  WorkflowMismatch {
    instance_id: String,
    expected: String,
    actual: String,
  },

  #[error("checkpoint error: {0}")]
  Store(#[source] StoreError),

  #[error("internal error: {message}")]
  Internal { message: String },
}

impl ExecutionError {
  /// The step the error is attributed to, if any.
  pub fn step_id(&self) -> Option<&str> {
    match self {
      ExecutionError::StepFailed { step_id, .. }
      | ExecutionError::RetriesExhausted { step_id, .. }
      | ExecutionError::ToolNotFound { step_id, .. }
      | ExecutionError::Template { step_id, .. }
      | ExecutionError::ElicitationDeclined { step_id }
      | ExecutionError::ElicitationCancelled { step_id }
      | ExecutionError::Elicitation { step_id, .. } => Some(step_id),
      _ => None,
    }
  }
}

impl From<StoreError> for ExecutionError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::NotFound(id) => ExecutionError::InstanceNotFound(id),
      StoreError::StatusMismatch {
        instance_id,
        status,
      } => ExecutionError::NotSuspended {
        instance_id,
        status,
      },
      other => ExecutionError::Store(other),
    }
  }
}

/// Errors reported by backend and elicitation transports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
  /// The tool ran and reported an error. Subject to the step's `onError`.
  #[error("{0}")]
  Tool(String),

  /// The backend could not be reached. Retried by the executor before it
  /// counts as a step failure.
  #[error("transport error: {0}")]
  Transport(String),
}
