//! Seams to the outside world: backend tool calls and user elicitation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DispatchError;

/// Calls a tool on a backend.
///
/// `tool` is the backend's own name for the tool, not the exposed name.
#[async_trait]
pub trait BackendDispatcher: Send + Sync {
  async fn call(
    &self,
    backend: &str,
    tool: &str,
    arguments: serde_json::Value,
  ) -> Result<serde_json::Value, DispatchError>;
}

/// An elicitation the user has to answer before the workflow continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitationRequest {
  pub instance_id: String,
  pub workflow: String,
  pub step_id: String,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
  Accept,
  Decline,
  Cancel,
}

impl ResponseAction {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseAction::Accept => "accept",
      ResponseAction::Decline => "decline",
      ResponseAction::Cancel => "cancel",
    }
  }
}

/// The user's answer to an elicitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElicitationResponse {
  pub action: ResponseAction,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<serde_json::Value>,
}

impl ElicitationResponse {
  pub fn accept(content: serde_json::Value) -> Self {
    Self {
      action: ResponseAction::Accept,
      content: Some(content),
    }
  }

  pub fn decline() -> Self {
    Self {
      action: ResponseAction::Decline,
      content: None,
    }
  }

  pub fn cancel() -> Self {
    Self {
      action: ResponseAction::Cancel,
      content: None,
    }
  }

  /// The step output recorded for this response.
  pub(crate) fn to_output(&self) -> serde_json::Value {
    let mut output = serde_json::Map::new();
    output.insert(
      "action".to_string(),
      serde_json::Value::String(self.action.as_str().to_string()),
    );
    output.insert(
      "content".to_string(),
      self.content.clone().unwrap_or(serde_json::Value::Null),
    );
    serde_json::Value::Object(output)
  }
}

/// Delivers elicitation requests to the user.
///
/// Delivery only; the answer arrives later through
/// [`WorkflowExecutor::resume`](crate::WorkflowExecutor::resume).
#[async_trait]
pub trait ElicitationTransport: Send + Sync {
  async fn request_input(&self, request: &ElicitationRequest) -> Result<(), DispatchError>;
}

/// Transport that only logs the request.
///
/// The caller relays the returned [`Suspension`](crate::Suspension) itself.
#[derive(Debug, Clone, Default)]
pub struct DeferredElicitation;

#[async_trait]
impl ElicitationTransport for DeferredElicitation {
  async fn request_input(&self, request: &ElicitationRequest) -> Result<(), DispatchError> {
    info!(
      instance_id = %request.instance_id,
      step_id = %request.step_id,
      "elicitation deferred to caller"
    );
    Ok(())
  }
}
