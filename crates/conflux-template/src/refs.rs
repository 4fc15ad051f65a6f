//! Static extraction of step references from templates.
//!
//! Extraction is purely textual and total: any string is accepted, and
//! anything that is not a recognisable step path is ignored.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `steps.<id>.(output|status|error)[.<field>]`, with or without a leading
/// dot. Each segment may also be a quoted subscript: `steps["a"].output['x']`.
static STEP_PATH: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(concat!(
    r#"(?:^|[^A-Za-z0-9_.])\.?steps"#,
    r#"(?:\.(?P<id>[A-Za-z0-9_-]+)|\[\s*["'](?P<qid>[A-Za-z0-9_-]+)["']\s*\])"#,
    r#"(?:\.(?P<sec>output|status|error)\b|\[\s*["'](?P<qsec>output|status|error)["']\s*\])"#,
    r#"(?:\.(?P<field>[A-Za-z0-9_]+)|\[\s*["'](?P<qfield>[^"'\]]+)["']\s*\])?"#,
  ))
  .expect("valid regex")
});

/// A subscript into `steps` or a step's output whose key is not a string
/// literal: `steps[name]`, `steps.a.output[key]`.
static DYNAMIC_STEP_READ: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(concat!(
    r#"(?:^|[^A-Za-z0-9_.])\.?steps"#,
    r#"(?:\[\s*[^"'\s]"#,
    r#"|(?:\.[A-Za-z0-9_-]+|\[\s*["'][A-Za-z0-9_-]+["']\s*\])"#,
    r#"(?:\.output\b|\[\s*["']output["']\s*\])\[\s*[^"'\s])"#,
  ))
  .expect("valid regex")
});

/// One matched step path: step ID, section and optional first field.
fn step_paths(template: &str) -> impl Iterator<Item = (String, String, Option<String>)> + '_ {
  STEP_PATH.captures_iter(template).filter_map(|caps| {
    let id = caps.name("id").or_else(|| caps.name("qid"))?;
    let section = caps.name("sec").or_else(|| caps.name("qsec"))?;
    let field = caps.name("field").or_else(|| caps.name("qfield"));
    Some((
      id.as_str().to_string(),
      section.as_str().to_string(),
      field.map(|f| f.as_str().to_string()),
    ))
  })
}

/// A read of one top-level output field of one step.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepFieldRef {
  pub step_id: String,
  pub field: String,
}

impl StepFieldRef {
  pub fn new(step_id: impl Into<String>, field: impl Into<String>) -> Self {
    Self {
      step_id: step_id.into(),
      field: field.into(),
    }
  }
}

impl std::fmt::Display for StepFieldRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "steps.{}.output.{}", self.step_id, self.field)
  }
}

/// Every `steps.<id>.output.<field>` read in a template.
///
/// Deeper paths collapse to their first segment
/// (`steps.a.output.x.y` yields `(a, x)`). Reads of `status` or `error`, and
/// reads of a bare `output` with no field, produce nothing.
pub fn extract_step_field_refs(template: &str) -> BTreeSet<StepFieldRef> {
  step_paths(template)
    .filter(|(_, section, _)| section == "output")
    .filter_map(|(step_id, _, field)| field.map(|field| StepFieldRef::new(step_id, field)))
    .collect()
}

/// Every step a template reads anything from (`output`, `status` or `error`).
pub fn extract_step_ids(template: &str) -> BTreeSet<String> {
  step_paths(template).map(|(step_id, _, _)| step_id).collect()
}

/// Whether a template reads from `steps` through a computed key, which
/// static extraction cannot see.
pub fn has_dynamic_step_read(template: &str) -> bool {
  DYNAMIC_STEP_READ.is_match(template)
}

/// [`extract_step_field_refs`] applied to every string leaf of a JSON value.
pub fn extract_refs_from_value(value: &serde_json::Value) -> BTreeSet<StepFieldRef> {
  let mut refs = BTreeSet::new();
  visit_strings(value, &mut |s| refs.extend(extract_step_field_refs(s)));
  refs
}

/// [`extract_step_ids`] applied to every string leaf of a JSON value.
pub fn extract_step_ids_from_value(value: &serde_json::Value) -> BTreeSet<String> {
  let mut ids = BTreeSet::new();
  visit_strings(value, &mut |s| ids.extend(extract_step_ids(s)));
  ids
}

fn visit_strings(value: &serde_json::Value, f: &mut impl FnMut(&str)) {
  match value {
    serde_json::Value::String(s) => f(s),
    serde_json::Value::Array(items) => items.iter().for_each(|v| visit_strings(v, f)),
    serde_json::Value::Object(map) => map.values().for_each(|v| visit_strings(v, f)),
    _ => {}
  }
}
