use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Structured output of a composite tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
  #[serde(default)]
  pub properties: BTreeMap<String, OutputProperty>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub required: Vec<String>,
}

/// One output field.
///
/// Either `value` (a template) or nested `properties` (for `object` fields)
/// produces the field; `default` is used when rendering fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputProperty {
  #[serde(rename = "type")]
  pub property_type: String,

  #[serde(default)]
  pub description: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub properties: BTreeMap<String, OutputProperty>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,
}

impl OutputProperty {
  /// A templated property of the given type.
  pub fn templated(property_type: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      property_type: property_type.into(),
      value: Some(value.into()),
      ..Default::default()
    }
  }
}
