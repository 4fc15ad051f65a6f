use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::OutputConfig;

/// A composite tool: a named workflow exposed as a single callable tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeToolDef {
  pub name: String,

  #[serde(default)]
  pub description: String,

  /// JSON Schema describing the tool's input parameters.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parameters: Option<serde_json::Value>,

  /// Overall workflow timeout, e.g. `"10m"`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<String>,

  #[serde(default)]
  pub steps: Vec<WorkflowStepDef>,

  /// Structured output built from step results.
  #[serde(
    default,
    alias = "outputMapping",
    skip_serializing_if = "Option::is_none"
  )]
  pub output: Option<OutputConfig>,
}

/// A single step of a composite tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepDef {
  pub id: String,

  /// `tool` (also `tool_call`) or `elicitation`. Inferred when omitted.
  #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
  pub step_type: Option<String>,

  /// Target tool name for tool steps.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tool: Option<String>,

  /// Prompt for elicitation steps. May be a template.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,

  /// JSON Schema for the requested elicitation content.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema: Option<serde_json::Value>,

  /// Tool arguments. String leaves are templates.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub arguments: BTreeMap<String, serde_json::Value>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,

  /// Template evaluated to a boolean; the step is skipped when false.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,

  /// Output fields used in place of real output when the step is skipped.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub default_results: BTreeMap<String, serde_json::Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_error: Option<ErrorHandlingDef>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_decline: Option<ElicitationResponseDef>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_cancel: Option<ElicitationResponseDef>,

  /// Step timeout; for elicitation steps, how long a response is awaited.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<String>,
}

/// Failure policy of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorHandlingDef {
  /// `abort` (default), `continue` or `retry`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action: Option<String>,

  /// Total number of attempts when `action` is `retry`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry_count: Option<u32>,

  /// Delay between attempts, e.g. `"2s"`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retry_delay: Option<String>,
}

/// What to do when an elicitation is declined or cancelled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElicitationResponseDef {
  /// `skip_remaining`, `abort` (default) or `continue`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_deserialize_composite_tool() {
    let def: CompositeToolDef = serde_json::from_value(serde_json::json!({
      "name": "deploy",
      "description": "Deploy and verify",
      "steps": [
        { "id": "build", "tool": "ci.build", "arguments": { "ref": "{{ params.ref }}" } },
        {
          "id": "verify",
          "tool": "ci.verify",
          "dependsOn": ["build"],
          "condition": "{{ params.verify }}",
          "defaultResults": { "ok": true },
          "onError": { "action": "retry", "retryCount": 3, "retryDelay": "1s" }
        },
        { "id": "confirm", "type": "elicitation", "message": "Ship it?", "onDecline": { "action": "skip_remaining" } }
      ]
    }))
    .unwrap();

    assert_eq!(def.steps.len(), 3);
    assert_eq!(def.steps[0].tool.as_deref(), Some("ci.build"));
    assert_eq!(def.steps[1].depends_on, vec!["build"]);
    let on_error = def.steps[1].on_error.as_ref().unwrap();
    assert_eq!(on_error.action.as_deref(), Some("retry"));
    assert_eq!(on_error.retry_count, Some(3));
    assert_eq!(def.steps[2].step_type.as_deref(), Some("elicitation"));
    assert_eq!(
      def.steps[2].on_decline.as_ref().unwrap().action.as_deref(),
      Some("skip_remaining")
    );
  }

  #[test]
  fn test_output_mapping_alias() {
    let def: CompositeToolDef = serde_json::from_value(serde_json::json!({
      "name": "t",
      "outputMapping": { "properties": { "x": { "type": "string", "value": "a" } } }
    }))
    .unwrap();

    assert!(def.output.unwrap().properties.contains_key("x"));
  }
}
