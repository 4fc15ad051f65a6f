use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use conflux_aggregator::ToolNamespace;
use conflux_config::{
  CompositeToolDef, ElicitationResponseDef, OutputConfig, OutputProperty, STEP_TYPE_ELICITATION,
  STEP_TYPE_TOOL, STEP_TYPE_TOOL_CALL, WorkflowStepDef, parse_duration,
};
use conflux_template::{
  JinjaRenderer, TemplateRenderer, extract_step_field_refs, extract_step_ids,
  has_dynamic_step_read,
};
use conflux_workflow::{ElicitationAction, ErrorPolicy, Step, StepKind, Workflow, WorkflowError};
use regex::Regex;
use tracing::debug;

use crate::error::ValidationError;

/// Upper bound on steps in one composite tool.
pub const MAX_WORKFLOW_STEPS: usize = 100;

/// Delay between retry attempts when `retryDelay` is not set.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

const STEP_TYPES: &str = "tool, tool_call, elicitation";
const OUTPUT_TYPES: &str = "string, integer, number, boolean, object, array";

static TOOL_REFERENCE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
  Tool,
  Elicitation,
}

/// Validate every composite tool of one server.
///
/// Tools are addressed as `spec.compositeTools[i]`. Besides the per-tool
/// checks, names must be unique across the list.
pub fn validate_composite_tools(
  defs: &[CompositeToolDef],
  namespace: Option<&ToolNamespace>,
) -> Result<Vec<Workflow>, ValidationError> {
  let paths: Vec<String> = (0..defs.len())
    .map(|i| format!("spec.compositeTools[{}]", i))
    .collect();

  for (def, path) in defs.iter().zip(&paths) {
    check_basics(path, def)?;
  }

  let mut seen = HashSet::new();
  for (def, path) in defs.iter().zip(&paths) {
    if !seen.insert(def.name.as_str()) {
      return Err(ValidationError::Duplicate {
        path: format!("{}.name", path),
        value: def.name.clone(),
      });
    }
  }

  defs
    .iter()
    .zip(&paths)
    .map(|(def, path)| validate_composite_tool(path, def, namespace))
    .collect()
}

/// Validate one composite tool and lock it into a [`Workflow`].
///
/// Checks run in a fixed order and the first failure is returned. When a
/// namespace is given, every tool step must resolve in it.
pub fn validate_composite_tool(
  path: &str,
  def: &CompositeToolDef,
  namespace: Option<&ToolNamespace>,
) -> Result<Workflow, ValidationError> {
  validate_with(&JinjaRenderer::new(), path, def, namespace)
}

/// [`validate_composite_tool`] with a custom template renderer.
pub fn validate_with(
  renderer: &dyn TemplateRenderer,
  path: &str,
  def: &CompositeToolDef,
  namespace: Option<&ToolNamespace>,
) -> Result<Workflow, ValidationError> {
  check_basics(path, def)?;

  let steps_path = format!("{}.steps", path);
  let step_path = |i: usize| format!("{}[{}]", steps_path, i);

  // Step IDs
  let mut ids: HashSet<&str> = HashSet::new();
  for (i, step) in def.steps.iter().enumerate() {
    if step.id.trim().is_empty() {
      return Err(ValidationError::Required {
        path: format!("{}.id", step_path(i)),
      });
    }
    if !ids.insert(step.id.as_str()) {
      return Err(ValidationError::Duplicate {
        path: format!("{}.id", step_path(i)),
        value: step.id.clone(),
      });
    }
  }

  // Step shape, templates and timeouts
  let mut shapes = Vec::with_capacity(def.steps.len());
  for (i, step) in def.steps.iter().enumerate() {
    shapes.push(check_step(renderer, &step_path(i), step)?);
  }

  // Declared dependencies
  for (i, step) in def.steps.iter().enumerate() {
    for (j, dep) in step.depends_on.iter().enumerate() {
      if !ids.contains(dep.as_str()) {
        return Err(ValidationError::UnknownStep {
          path: format!("{}.dependsOn[{}]", step_path(i), j),
          step_id: dep.clone(),
        });
      }
    }
  }

  // Error handling
  let mut policies = Vec::with_capacity(def.steps.len());
  for (i, step) in def.steps.iter().enumerate() {
    policies.push(error_policy(&step_path(i), step)?);
  }

  // Elicitation handlers
  let mut kinds = Vec::with_capacity(def.steps.len());
  for (i, (step, shape)) in def.steps.iter().zip(&shapes).enumerate() {
    kinds.push(step_kind(&step_path(i), step, *shape)?);
  }

  // Lock steps and order them
  let mut steps = Vec::with_capacity(def.steps.len());
  let mut edges: Vec<(String, String)> = Vec::new();
  for ((i, step), (kind, on_error)) in def
    .steps
    .iter()
    .enumerate()
    .zip(kinds.into_iter().zip(policies))
  {
    for dep in &step.depends_on {
      push_edge(&mut edges, dep, &step.id);
    }
    for (_, template) in step_templates(&step_path(i), step) {
      for referenced in extract_step_ids(&template) {
        if ids.contains(referenced.as_str()) {
          push_edge(&mut edges, &referenced, &step.id);
        }
      }
    }

    steps.push(Step {
      id: step.id.clone(),
      kind,
      depends_on: step.depends_on.clone(),
      condition: step
        .condition
        .clone()
        .filter(|c| !c.trim().is_empty()),
      default_results: step.default_results.clone(),
      on_error,
      timeout_ms: parse_timeout(&format!("{}.timeout", step_path(i)), step.timeout.as_deref())?,
    });
  }

  let workflow = Workflow {
    name: def.name.clone(),
    description: def.description.clone(),
    parameters: def.parameters.clone(),
    timeout_ms: parse_timeout(&format!("{}.timeout", path), def.timeout.as_deref())?,
    steps,
    edges,
    output: def.output.clone(),
  };

  if let Err(WorkflowError::Cycle { steps }) = workflow.graph().topological_order() {
    return Err(ValidationError::Cycle {
      path: steps_path,
      steps,
    });
  }

  // References and skip-safety
  let by_id: HashMap<&str, (usize, &Step)> = workflow
    .steps
    .iter()
    .enumerate()
    .map(|(i, s)| (s.id.as_str(), (i, s)))
    .collect();

  for (i, step) in def.steps.iter().enumerate() {
    let referenced_by = format!("step {:?}", step.id);
    for (location, template) in step_templates(&step_path(i), step) {
      check_references(&location, &template, &referenced_by, &by_id, &steps_path)?;
    }
  }

  if let Some(output) = &def.output {
    let templates = output_templates(renderer, &format!("{}.output", path), output)?;
    for (location, template) in templates {
      check_references(&location, &template, "output", &by_id, &steps_path)?;
    }
  }

  // Tool resolution
  if let Some(namespace) = namespace {
    for (i, step) in workflow.steps.iter().enumerate() {
      if let StepKind::ToolCall { tool, .. } = &step.kind {
        if namespace.resolve(tool).is_none() {
          return Err(ValidationError::UnknownTool {
            path: format!("{}.tool", step_path(i)),
            tool: tool.clone(),
          });
        }
      }
    }
  }

  debug!(
    tool = %workflow.name,
    steps = workflow.steps.len(),
    edges = workflow.edges.len(),
    "composite tool validated"
  );

  Ok(workflow)
}

fn check_basics(path: &str, def: &CompositeToolDef) -> Result<(), ValidationError> {
  if def.name.trim().is_empty() {
    return Err(ValidationError::Required {
      path: format!("{}.name", path),
    });
  }
  if def.description.trim().is_empty() {
    return Err(ValidationError::Required {
      path: format!("{}.description", path),
    });
  }
  if def.steps.is_empty() {
    return Err(ValidationError::Required {
      path: format!("{}.steps", path),
    });
  }
  if def.steps.len() > MAX_WORKFLOW_STEPS {
    return Err(ValidationError::TooManySteps {
      path: format!("{}.steps", path),
      max: MAX_WORKFLOW_STEPS,
      count: def.steps.len(),
    });
  }
  parse_timeout(&format!("{}.timeout", path), def.timeout.as_deref())?;
  if let Some(schema) = &def.parameters {
    check_parameters(&format!("{}.parameters", path), schema)?;
  }
  Ok(())
}

fn check_parameters(path: &str, schema: &serde_json::Value) -> Result<(), ValidationError> {
  let Some(object) = schema.as_object() else {
    return Err(ValidationError::InvalidSchema {
      path: path.to_string(),
      message: "must be a JSON Schema object".to_string(),
    });
  };

  match object.get("type") {
    None => {}
    Some(serde_json::Value::String(t)) if t == "object" => {}
    Some(other) => {
      return Err(ValidationError::InvalidSchema {
        path: format!("{}.type", path),
        message: format!("must be \"object\", got {}", other),
      });
    }
  }

  if object.get("properties").is_some_and(|p| !p.is_object()) {
    return Err(ValidationError::InvalidSchema {
      path: format!("{}.properties", path),
      message: "must be an object".to_string(),
    });
  }

  Ok(())
}

fn check_step(
  renderer: &dyn TemplateRenderer,
  path: &str,
  step: &WorkflowStepDef,
) -> Result<Shape, ValidationError> {
  let has_tool = step.tool.as_deref().is_some_and(|t| !t.is_empty());
  let has_message = step.message.as_deref().is_some_and(|m| !m.is_empty());

  let shape = match step.step_type.as_deref() {
    Some(STEP_TYPE_TOOL) | Some(STEP_TYPE_TOOL_CALL) => Shape::Tool,
    Some(STEP_TYPE_ELICITATION) => Shape::Elicitation,
    Some(other) => {
      return Err(ValidationError::InvalidChoice {
        path: format!("{}.type", path),
        value: other.to_string(),
        allowed: STEP_TYPES,
      });
    }
    None if has_tool && has_message => {
      return Err(ValidationError::AmbiguousStep {
        path: path.to_string(),
      });
    }
    None if has_message => Shape::Elicitation,
    None => Shape::Tool,
  };

  match shape {
    Shape::Tool => {
      let tool = step.tool.as_deref().unwrap_or_default();
      if tool.is_empty() {
        return Err(ValidationError::Required {
          path: format!("{}.tool", path),
        });
      }
      if !TOOL_REFERENCE.is_match(tool) {
        return Err(ValidationError::InvalidToolReference {
          path: format!("{}.tool", path),
          value: tool.to_string(),
        });
      }
    }
    Shape::Elicitation => {
      if !has_message {
        return Err(ValidationError::Required {
          path: format!("{}.message", path),
        });
      }
      if step.schema.as_ref().is_some_and(|s| !s.is_object()) {
        return Err(ValidationError::InvalidSchema {
          path: format!("{}.schema", path),
          message: "must be a JSON Schema object".to_string(),
        });
      }
    }
  }

  for (location, template) in step_templates(path, step) {
    check_template(renderer, &location, &template)?;
  }

  parse_timeout(&format!("{}.timeout", path), step.timeout.as_deref())?;

  Ok(shape)
}

fn error_policy(path: &str, step: &WorkflowStepDef) -> Result<ErrorPolicy, ValidationError> {
  let Some(on_error) = &step.on_error else {
    return Ok(ErrorPolicy::Abort);
  };
  let path = format!("{}.onError", path);
  let retry_count = on_error.retry_count.unwrap_or(0);

  let policy = match on_error.action.as_deref().unwrap_or("abort") {
    "abort" => ErrorPolicy::Abort,
    "continue" => ErrorPolicy::Continue,
    "retry" => {
      if retry_count == 0 {
        return Err(ValidationError::RetryCountRequired {
          path: format!("{}.retryCount", path),
        });
      }
      let delay_ms = match on_error.retry_delay.as_deref() {
        Some(delay) => duration_ms(&format!("{}.retryDelay", path), delay)?,
        None => DEFAULT_RETRY_DELAY_MS,
      };
      return Ok(ErrorPolicy::Retry {
        count: retry_count,
        delay_ms,
      });
    }
    other => {
      return Err(ValidationError::InvalidChoice {
        path: format!("{}.action", path),
        value: other.to_string(),
        allowed: ErrorPolicy::ACTIONS,
      });
    }
  };

  if retry_count > 0 {
    return Err(ValidationError::RetryCountNotAllowed {
      path: format!("{}.retryCount", path),
    });
  }
  if let Some(delay) = on_error.retry_delay.as_deref() {
    duration_ms(&format!("{}.retryDelay", path), delay)?;
  }

  Ok(policy)
}

fn step_kind(path: &str, step: &WorkflowStepDef, shape: Shape) -> Result<StepKind, ValidationError> {
  match shape {
    Shape::Tool => Ok(StepKind::ToolCall {
      tool: step.tool.clone().unwrap_or_default(),
      arguments: step.arguments.clone(),
    }),
    Shape::Elicitation => Ok(StepKind::Elicitation {
      message: step.message.clone().unwrap_or_default(),
      schema: step.schema.clone(),
      on_decline: elicitation_action(&format!("{}.onDecline", path), step.on_decline.as_ref())?,
      on_cancel: elicitation_action(&format!("{}.onCancel", path), step.on_cancel.as_ref())?,
    }),
  }
}

fn elicitation_action(
  path: &str,
  handler: Option<&ElicitationResponseDef>,
) -> Result<ElicitationAction, ValidationError> {
  match handler.and_then(|h| h.action.as_deref()) {
    None => Ok(ElicitationAction::default()),
    Some(name) => ElicitationAction::from_name(name).ok_or_else(|| ValidationError::InvalidChoice {
      path: format!("{}.action", path),
      value: name.to_string(),
      allowed: ElicitationAction::ACTIONS,
    }),
  }
}

/// Every template of a step with its field path.
fn step_templates(path: &str, step: &WorkflowStepDef) -> Vec<(String, String)> {
  let mut templates = Vec::new();
  for (key, value) in &step.arguments {
    collect_strings(&format!("{}.arguments.{}", path, key), value, &mut templates);
  }
  if let Some(condition) = &step.condition {
    templates.push((format!("{}.condition", path), condition.clone()));
  }
  if let Some(message) = &step.message {
    templates.push((format!("{}.message", path), message.clone()));
  }
  templates
}

fn collect_strings(path: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
  match value {
    serde_json::Value::String(s) => out.push((path.to_string(), s.clone())),
    serde_json::Value::Array(items) => {
      for (i, item) in items.iter().enumerate() {
        collect_strings(&format!("{}[{}]", path, i), item, out);
      }
    }
    serde_json::Value::Object(map) => {
      for (key, item) in map {
        collect_strings(&format!("{}.{}", path, key), item, out);
      }
    }
    _ => {}
  }
}

/// Validate the output mapping's shape and return its templates.
fn output_templates(
  renderer: &dyn TemplateRenderer,
  path: &str,
  output: &OutputConfig,
) -> Result<Vec<(String, String)>, ValidationError> {
  let mut templates = Vec::new();
  collect_output_properties(
    renderer,
    &format!("{}.properties", path),
    &output.properties,
    &mut templates,
  )?;

  for (j, name) in output.required.iter().enumerate() {
    if !output.properties.contains_key(name) {
      return Err(ValidationError::InvalidSchema {
        path: format!("{}.required[{}]", path, j),
        message: format!("names undeclared property {:?}", name),
      });
    }
  }

  Ok(templates)
}

fn collect_output_properties(
  renderer: &dyn TemplateRenderer,
  path: &str,
  properties: &BTreeMap<String, OutputProperty>,
  templates: &mut Vec<(String, String)>,
) -> Result<(), ValidationError> {
  for (name, property) in properties {
    let property_path = format!("{}.{}", path, name);

    match property.property_type.as_str() {
      "object" => {
        if property.value.is_some() == !property.properties.is_empty() {
          return Err(ValidationError::InvalidSchema {
            path: property_path,
            message: "must set exactly one of value or properties".to_string(),
          });
        }
        collect_output_properties(
          renderer,
          &format!("{}.properties", property_path),
          &property.properties,
          templates,
        )?;
      }
      "string" | "integer" | "number" | "boolean" | "array" => {
        if property.value.is_none() {
          return Err(ValidationError::Required {
            path: format!("{}.value", property_path),
          });
        }
        if !property.properties.is_empty() {
          return Err(ValidationError::InvalidSchema {
            path: format!("{}.properties", property_path),
            message: "is only allowed on object properties".to_string(),
          });
        }
      }
      other => {
        return Err(ValidationError::InvalidChoice {
          path: format!("{}.type", property_path),
          value: other.to_string(),
          allowed: OUTPUT_TYPES,
        });
      }
    }

    if let Some(value) = &property.value {
      let value_path = format!("{}.value", property_path);
      check_template(renderer, &value_path, value)?;
      templates.push((value_path, value.clone()));
    }
  }

  Ok(())
}

/// Referenced steps must exist, and skippable steps must default every
/// field read from them.
fn check_references(
  location: &str,
  template: &str,
  referenced_by: &str,
  by_id: &HashMap<&str, (usize, &Step)>,
  steps_path: &str,
) -> Result<(), ValidationError> {
  if has_dynamic_step_read(template) {
    return Err(ValidationError::InvalidTemplate {
      path: location.to_string(),
      message: "step outputs must be read with literal keys".to_string(),
    });
  }

  for step_id in extract_step_ids(template) {
    if !by_id.contains_key(step_id.as_str()) {
      return Err(ValidationError::UnknownStep {
        path: location.to_string(),
        step_id,
      });
    }
  }

  for field_ref in extract_step_field_refs(template) {
    let Some((index, step)) = by_id.get(field_ref.step_id.as_str()) else {
      continue;
    };
    if step.is_skippable() && !step.default_results.contains_key(&field_ref.field) {
      return Err(ValidationError::MissingDefaultResult {
        path: format!("{}[{}]", steps_path, index),
        step_id: field_ref.step_id,
        field: field_ref.field,
        referenced_by: referenced_by.to_string(),
      });
    }
  }

  Ok(())
}

fn check_template(
  renderer: &dyn TemplateRenderer,
  path: &str,
  template: &str,
) -> Result<(), ValidationError> {
  renderer
    .check(template)
    .map_err(|e| ValidationError::InvalidTemplate {
      path: path.to_string(),
      message: e.to_string(),
    })
}

fn parse_timeout(path: &str, value: Option<&str>) -> Result<Option<u64>, ValidationError> {
  value.map(|v| duration_ms(path, v)).transpose()
}

fn duration_ms(path: &str, value: &str) -> Result<u64, ValidationError> {
  parse_duration(value)
    .map(|d| d.as_millis() as u64)
    .map_err(|e| ValidationError::InvalidDuration {
      path: path.to_string(),
      message: e.to_string(),
    })
}

fn push_edge(edges: &mut Vec<(String, String)>, from: &str, to: &str) {
  if !edges.iter().any(|(f, t)| f == from && t == to) {
    edges.push((from.to_string(), to.to_string()));
  }
}
