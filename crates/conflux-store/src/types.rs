use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a composite tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
  Pending,
  Running,
  /// Suspended until the user answers an elicitation.
  AwaitingElicitation,
  Completed,
  /// A step failed under an abort policy, or the workflow timed out.
  Failed,
  /// Stopped by an elicitation abort handler or an external cancellation.
  Aborted,
}

impl InstanceStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      InstanceStatus::Pending => "pending",
      InstanceStatus::Running => "running",
      InstanceStatus::AwaitingElicitation => "awaiting_elicitation",
      InstanceStatus::Completed => "completed",
      InstanceStatus::Failed => "failed",
      InstanceStatus::Aborted => "aborted",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      InstanceStatus::Completed | InstanceStatus::Failed | InstanceStatus::Aborted
    )
  }
}

impl std::fmt::Display for InstanceStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Status of a single step within an invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  #[default]
  Waiting,
  Running,
  Completed,
  Skipped,
  Failed,
  AwaitingElicitation,
}

impl StepStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      StepStatus::Waiting => "waiting",
      StepStatus::Running => "running",
      StepStatus::Completed => "completed",
      StepStatus::Skipped => "skipped",
      StepStatus::Failed => "failed",
      StepStatus::AwaitingElicitation => "awaiting_elicitation",
    }
  }

  /// Whether downstream steps may start.
  pub fn is_settled(&self) -> bool {
    matches!(self, StepStatus::Completed | StepStatus::Skipped)
  }
}

impl std::fmt::Display for StepStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Recorded state of one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
  pub status: StepStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default)]
  pub attempts: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

/// The elicitation an instance is suspended on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingElicitation {
  pub step_id: String,
  /// Rendered prompt shown to the user.
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema: Option<serde_json::Value>,
  pub requested_at: DateTime<Utc>,
  /// Responses after this instant count as cancellations.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deadline: Option<DateTime<Utc>>,
}

/// Persisted state of one composite tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub instance_id: String,
  /// Composite tool name.
  pub workflow: String,
  pub status: InstanceStatus,
  /// Parameters after defaults were applied.
  pub params: serde_json::Value,
  pub steps: BTreeMap<String, StepRecord>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub awaiting: Option<PendingElicitation>,
  /// Set once an elicitation handler chose `skip_remaining`.
  #[serde(default)]
  pub skip_remaining: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub started_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
  /// A fresh pending checkpoint with every step waiting.
  pub fn new(
    instance_id: impl Into<String>,
    workflow: impl Into<String>,
    params: serde_json::Value,
    step_ids: impl IntoIterator<Item = String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      instance_id: instance_id.into(),
      workflow: workflow.into(),
      status: InstanceStatus::Pending,
      params,
      steps: step_ids
        .into_iter()
        .map(|id| (id, StepRecord::default()))
        .collect(),
      awaiting: None,
      skip_remaining: false,
      output: None,
      error: None,
      started_at: now,
      updated_at: now,
    }
  }

  pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
    self.steps.get(step_id)
  }

  pub fn step_status(&self, step_id: &str) -> StepStatus {
    self
      .steps
      .get(step_id)
      .map(|r| r.status)
      .unwrap_or_default()
  }
}
