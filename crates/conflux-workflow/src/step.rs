use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A validated workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub id: String,
  pub kind: StepKind,
  /// Declared dependencies, in declaration order.
  pub depends_on: Vec<String>,
  pub condition: Option<String>,
  /// Output used when the step is skipped.
  pub default_results: BTreeMap<String, serde_json::Value>,
  pub on_error: ErrorPolicy,
  pub timeout_ms: Option<u64>,
}

impl Step {
  /// Whether the step can finish without producing real output.
  ///
  /// A step is skippable when it has a condition, or when its failures are
  /// tolerated with `continue`.
  pub fn is_skippable(&self) -> bool {
    self.condition.as_deref().is_some_and(|c| !c.trim().is_empty())
      || self.on_error == ErrorPolicy::Continue
  }

  /// Default output for a skipped step, as a JSON object.
  pub fn default_output(&self) -> serde_json::Value {
    serde_json::Value::Object(
      self
        .default_results
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    )
  }

  pub fn is_elicitation(&self) -> bool {
    matches!(self.kind, StepKind::Elicitation { .. })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StepKind {
  /// Call a backend tool through the aggregated namespace.
  ToolCall {
    tool: String,
    arguments: BTreeMap<String, serde_json::Value>,
  },
  /// Ask the user for input and suspend until they answer.
  Elicitation {
    message: String,
    schema: Option<serde_json::Value>,
    on_decline: ElicitationAction,
    on_cancel: ElicitationAction,
  },
}

/// What happens when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ErrorPolicy {
  /// Fail the whole workflow.
  #[default]
  Abort,
  /// Record the failure and substitute default results.
  Continue,
  /// Try `count` times in total, waiting `delay_ms × attempt` between tries.
  Retry { count: u32, delay_ms: u64 },
}

impl ErrorPolicy {
  pub const ACTIONS: &'static str = "abort, continue, retry";
}

/// Reaction to a declined or cancelled elicitation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElicitationAction {
  /// Complete the step and skip every step that has not started.
  SkipRemaining,
  /// Fail the workflow.
  #[default]
  Abort,
  /// Complete the step and carry on.
  Continue,
}

impl ElicitationAction {
  pub const ACTIONS: &'static str = "abort, continue, skip_remaining";

  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "skip_remaining" => Some(Self::SkipRemaining),
      "abort" => Some(Self::Abort),
      "continue" => Some(Self::Continue),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::SkipRemaining => "skip_remaining",
      Self::Abort => "abort",
      Self::Continue => "continue",
    }
  }
}
