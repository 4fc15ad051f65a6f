use std::collections::BTreeMap;

use conflux_store::{Checkpoint, InstanceStatus, StepRecord};
use serde::{Deserialize, Serialize};

/// How an invocation (or a resumption) ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
  Completed(WorkflowResult),
  /// The workflow is waiting for the user; answer with `resume`.
  Suspended(Suspension),
}

impl Outcome {
  pub fn instance_id(&self) -> &str {
    match self {
      Outcome::Completed(result) => &result.instance_id,
      Outcome::Suspended(suspension) => &suspension.instance_id,
    }
  }
}

/// Result of a completed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
  pub instance_id: String,
  pub workflow: String,
  pub status: InstanceStatus,
  /// The output mapping, or step outputs keyed by step ID when the
  /// composite tool declares no mapping.
  pub output: serde_json::Value,
  pub steps: BTreeMap<String, StepRecord>,
  pub duration_ms: u64,
}

impl WorkflowResult {
  pub(crate) fn from_checkpoint(checkpoint: &Checkpoint, output: serde_json::Value) -> Self {
    Self {
      instance_id: checkpoint.instance_id.clone(),
      workflow: checkpoint.workflow.clone(),
      status: checkpoint.status,
      output,
      steps: checkpoint.steps.clone(),
      duration_ms: elapsed_ms(checkpoint),
    }
  }
}

/// An invocation suspended on an elicitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
  pub instance_id: String,
  pub step_id: String,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema: Option<serde_json::Value>,
}

pub(crate) fn elapsed_ms(checkpoint: &Checkpoint) -> u64 {
  (chrono::Utc::now() - checkpoint.started_at)
    .num_milliseconds()
    .max(0) as u64
}
