use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
  #[error("dependency cycle detected involving steps: {}", .steps.join(", "))]
  Cycle { steps: Vec<String> },
}
