use conflux_config::OutputConfig;
use serde::{Deserialize, Serialize};

use crate::graph::Graph;
use crate::step::Step;

/// A locked composite tool workflow ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub name: String,
  pub description: String,
  /// JSON Schema of the composite tool's parameters.
  pub parameters: Option<serde_json::Value>,
  pub timeout_ms: Option<u64>,
  /// Steps in declaration order.
  pub steps: Vec<Step>,
  /// `(upstream, downstream)` ordering edges.
  pub edges: Vec<(String, String)>,
  pub output: Option<OutputConfig>,
}

impl Workflow {
  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    let ids: Vec<String> = self.steps.iter().map(|s| s.id.clone()).collect();
    Graph::new(&ids, &self.edges)
  }

  /// Get a step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.id == step_id)
  }

  /// Fill in parameters missing from `params` with the `default` values
  /// declared in the parameter schema's `properties`.
  pub fn apply_parameter_defaults(&self, params: serde_json::Value) -> serde_json::Value {
    let mut params = match params {
      serde_json::Value::Object(map) => map,
      serde_json::Value::Null => serde_json::Map::new(),
      other => return other,
    };

    let properties = self
      .parameters
      .as_ref()
      .and_then(|schema| schema.get("properties"))
      .and_then(|p| p.as_object());

    if let Some(properties) = properties {
      for (name, property) in properties {
        if let Some(default) = property.get("default") {
          params
            .entry(name.clone())
            .or_insert_with(|| default.clone());
        }
      }
    }

    serde_json::Value::Object(params)
  }
}
