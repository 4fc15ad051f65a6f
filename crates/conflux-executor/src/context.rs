use conflux_store::Checkpoint;
use conflux_workflow::Workflow;
use serde_json::{Map, Value, json};

use crate::result::elapsed_ms;

/// Build the template context for the current state of an invocation.
///
/// ```text
/// params.<name>
/// steps.<id>.status | output | error
/// workflow.id | name | step_count | status | duration_ms
/// ```
///
/// Steps without output expose an empty object, so a reference into a step
/// that produced nothing fails as undefined instead of indexing `null`.
pub(crate) fn template_context(workflow: &Workflow, checkpoint: &Checkpoint) -> Value {
  let mut steps = Map::with_capacity(checkpoint.steps.len());
  for (id, record) in &checkpoint.steps {
    steps.insert(
      id.clone(),
      json!({
        "status": record.status.as_str(),
        "output": record.output.clone().unwrap_or_else(|| Value::Object(Map::new())),
        "error": record.error,
      }),
    );
  }

  json!({
    "params": checkpoint.params,
    "steps": steps,
    "workflow": {
      "id": checkpoint.instance_id,
      "name": workflow.name,
      "step_count": workflow.steps.len(),
      "status": checkpoint.status.as_str(),
      "duration_ms": elapsed_ms(checkpoint),
    },
  })
}
