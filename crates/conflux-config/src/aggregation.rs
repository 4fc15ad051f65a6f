use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A tool as advertised by a single backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default = "empty_object_schema")]
  pub input_schema: serde_json::Value,
}

impl ToolSpec {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: String::new(),
      input_schema: empty_object_schema(),
    }
  }
}

fn empty_object_schema() -> serde_json::Value {
  serde_json::json!({ "type": "object" })
}

/// The tool catalog of one backend.
///
/// Catalogs are aggregated in the order they are declared; that order is the
/// tie-breaker for every conflict strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendCatalog {
  pub backend: String,
  #[serde(default)]
  pub tools: Vec<ToolSpec>,
}

/// How name collisions between backends are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
  /// Rename colliding tools with a backend-derived prefix.
  #[default]
  Prefix,
  /// The first backend in `priorityOrder` keeps the name.
  Priority,
  /// Collisions must be resolved by explicit overrides.
  Manual,
}

impl std::fmt::Display for ConflictStrategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConflictStrategy::Prefix => write!(f, "prefix"),
      ConflictStrategy::Priority => write!(f, "priority"),
      ConflictStrategy::Manual => write!(f, "manual"),
    }
  }
}

/// Aggregation settings for one virtual server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationConfig {
  #[serde(default)]
  pub conflict_resolution: ConflictStrategy,

  /// Prefix template used by the prefix strategy.
  ///
  /// Supports `{workload}`, `{backend}` and `{tool}`. When `{tool}` is absent
  /// the tool name is appended. Defaults to `{workload}_{tool}`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub prefix_format: Option<String>,

  /// Backend names, highest priority first.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub priority_order: Vec<String>,

  /// Per-workload filters and overrides.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tools: Vec<WorkloadToolConfig>,

  /// Hide every backend tool from advertising. Composite tools can still
  /// route to them.
  #[serde(default)]
  pub exclude_all_tools: bool,
}

impl AggregationConfig {
  /// Tool configuration for a workload, if any.
  pub fn workload(&self, workload: &str) -> Option<&WorkloadToolConfig> {
    self.tools.iter().find(|t| t.workload == workload)
  }
}

/// Tool filtering and overrides for a single workload (backend).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadToolConfig {
  pub workload: String,

  /// Name of a shared tool configuration this entry was expanded from.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tool_config_ref: Option<String>,

  /// Allow-list of original tool names to advertise. Empty advertises all.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub filter: Vec<String>,

  /// Renames and description overrides, keyed by original tool name.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub overrides: BTreeMap<String, ToolOverride>,

  #[serde(default)]
  pub exclude_all: bool,
}

/// Override for a single backend tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOverride {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}
