use serde::{Deserialize, Serialize};

use crate::{AggregationConfig, BackendCatalog, CompositeToolDef};

/// Everything a virtual server needs: how backends are aggregated, which
/// backend catalogs exist, and the composite tools it exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
  #[serde(default)]
  pub name: String,

  #[serde(default)]
  pub aggregation: AggregationConfig,

  #[serde(default)]
  pub backends: Vec<BackendCatalog>,

  #[serde(default)]
  pub composite_tools: Vec<CompositeToolDef>,
}

impl ServerConfig {
  /// Look up a composite tool by name.
  pub fn composite_tool(&self, name: &str) -> Option<&CompositeToolDef> {
    self.composite_tools.iter().find(|t| t.name == name)
  }
}
