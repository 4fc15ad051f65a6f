use thiserror::Error;

/// The first problem found in a composite tool definition.
///
/// Every variant carries the field path of the offending value, e.g.
/// `spec.compositeTools[0].steps[1].onError.retryCount`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
  #[error("{path} is required")]
  Required { path: String },

  #[error("{path} {value:?} is duplicated")]
  Duplicate { path: String, value: String },

  #[error("{path} must be one of: {allowed}, got {value:?}")]
  InvalidChoice {
    path: String,
    value: String,
    allowed: &'static str,
  },

  #[error("{path} must have at most {max} steps, got {count}")]
  TooManySteps {
    path: String,
    max: usize,
    count: usize,
  },

  #[error("{path} is ambiguous: set type when both tool and message are given")]
  AmbiguousStep { path: String },

  #[error("{path} {value:?} is not a valid tool reference")]
  InvalidToolReference { path: String, value: String },

  #[error("{path} references unknown tool {tool:?}")]
  UnknownTool { path: String, tool: String },

  #[error("{path} references unknown step {step_id:?}")]
  UnknownStep { path: String, step_id: String },

  #[error("{path}: dependency cycle detected involving steps: {}", .steps.join(", "))]
  Cycle { path: String, steps: Vec<String> },

  #[error("{path} is required for action retry")]
  RetryCountRequired { path: String },

  #[error("{path} must not be set unless action is retry")]
  RetryCountNotAllowed { path: String },

  #[error("{path} is not a valid duration: {message}")]
  InvalidDuration { path: String, message: String },

  #[error("{path}: {message}")]
  InvalidTemplate { path: String, message: String },

  #[error("{path} {message}")]
  InvalidSchema { path: String, message: String },

  #[error(
    "{path}.defaultResults[{field}] is required: step {step_id:?} may be skipped and field {field:?} is referenced by {referenced_by}"
  )]
  MissingDefaultResult {
    path: String,
    step_id: String,
    field: String,
    referenced_by: String,
  },
}

impl ValidationError {
  /// Field path of the offending value.
  pub fn path(&self) -> &str {
    match self {
      ValidationError::Required { path }
      | ValidationError::Duplicate { path, .. }
      | ValidationError::InvalidChoice { path, .. }
      | ValidationError::TooManySteps { path, .. }
      | ValidationError::AmbiguousStep { path }
      | ValidationError::InvalidToolReference { path, .. }
      | ValidationError::UnknownTool { path, .. }
      | ValidationError::UnknownStep { path, .. }
      | ValidationError::Cycle { path, .. }
      | ValidationError::RetryCountRequired { path }
      | ValidationError::RetryCountNotAllowed { path }
      | ValidationError::InvalidDuration { path, .. }
      | ValidationError::InvalidTemplate { path, .. }
      | ValidationError::InvalidSchema { path, .. }
      | ValidationError::MissingDefaultResult { path, .. } => path,
    }
  }
}
