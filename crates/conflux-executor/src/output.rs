//! Output mapping: render each declared property and coerce it to its type.

use std::collections::BTreeMap;

use conflux_config::{OutputConfig, OutputProperty};
use conflux_template::TemplateRenderer;
use serde_json::{Map, Number, Value};

use crate::error::ExecutionError;

/// Build the composite tool output from its mapping.
///
/// A property that fails to render or coerce takes its `default`. Without a
/// default it fails the invocation, unless `lenient` is set (the run was cut
/// short by `skip_remaining`), in which case it is left out.
pub(crate) fn build_output(
  renderer: &dyn TemplateRenderer,
  config: &OutputConfig,
  context: &Value,
  lenient: bool,
) -> Result<Value, ExecutionError> {
  let output = build_object(renderer, &config.properties, context, lenient, "")?;

  for name in &config.required {
    if !output.contains_key(name) {
      return Err(ExecutionError::Output {
        property: name.clone(),
        message: "required property is missing".to_string(),
      });
    }
  }

  Ok(Value::Object(output))
}

fn build_object(
  renderer: &dyn TemplateRenderer,
  properties: &BTreeMap<String, OutputProperty>,
  context: &Value,
  lenient: bool,
  prefix: &str,
) -> Result<Map<String, Value>, ExecutionError> {
  let mut object = Map::with_capacity(properties.len());

  for (name, property) in properties {
    let path = if prefix.is_empty() {
      name.clone()
    } else {
      format!("{}.{}", prefix, name)
    };

    let produced = match &property.value {
      Some(template) => renderer
        .render(template, context)
        .map_err(|e| e.to_string())
        .and_then(|v| coerce(&property.property_type, v)),
      None if !property.properties.is_empty() => {
        let nested = build_object(renderer, &property.properties, context, lenient, &path)?;
        Ok(Value::Object(nested))
      }
      None => Err("no value".to_string()),
    };

    match produced {
      Ok(value) => {
        object.insert(name.clone(), value);
      }
      Err(message) => {
        if let Some(default) = &property.default {
          object.insert(name.clone(), default.clone());
        } else if !lenient {
          return Err(ExecutionError::Output {
            property: path,
            message,
          });
        }
      }
    }
  }

  Ok(object)
}

/// Coerce a rendered value to a declared output type.
pub(crate) fn coerce(property_type: &str, value: Value) -> Result<Value, String> {
  let mismatch = |v: &Value| format!("cannot convert {} to {}", v, property_type);

  match property_type {
    "string" => Ok(match value {
      Value::String(s) => Value::String(s),
      Value::Null => Value::String(String::new()),
      other @ (Value::Bool(_) | Value::Number(_)) => Value::String(other.to_string()),
      other => Value::String(serde_json::to_string(&other).map_err(|e| e.to_string())?),
    }),
    "integer" => match &value {
      Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
      Value::Number(n) => match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
          Ok(Value::from(f as i64))
        }
        _ => Err(mismatch(&value)),
      },
      Value::String(s) => s
        .trim()
        .parse::<i64>()
        .map(Value::from)
        .map_err(|_| mismatch(&value)),
      _ => Err(mismatch(&value)),
    },
    "number" => match &value {
      Value::Number(_) => Ok(value.clone()),
      Value::String(s) => s
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| mismatch(&value)),
      _ => Err(mismatch(&value)),
    },
    "boolean" => match &value {
      Value::Bool(_) => Ok(value.clone()),
      Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Err(mismatch(&value)),
      },
      _ => Err(mismatch(&value)),
    },
    "object" => match value {
      Value::Object(_) => Ok(value),
      Value::String(s) => match serde_json::from_str::<Value>(&s) {
        Ok(parsed @ Value::Object(_)) => Ok(parsed),
        _ => Err(mismatch(&Value::String(s))),
      },
      other => Err(mismatch(&other)),
    },
    "array" => match value {
      Value::Array(_) => Ok(value),
      Value::String(s) => match serde_json::from_str::<Value>(&s) {
        Ok(parsed @ Value::Array(_)) => Ok(parsed),
        _ => Err(mismatch(&Value::String(s))),
      },
      other => Err(mismatch(&other)),
    },
    _ => Ok(value),
  }
}
