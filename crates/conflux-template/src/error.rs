use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
  /// The template does not parse.
  #[error("invalid template {template:?}: {message}")]
  Syntax { template: String, message: String },

  /// The template parsed but could not be evaluated against the context,
  /// e.g. it references a missing field.
  #[error("failed to render template {template:?}: {message}")]
  Render { template: String, message: String },

  /// A condition did not evaluate to a boolean.
  #[error("condition {template:?} must evaluate to true or false, got {value:?}")]
  NotBoolean { template: String, value: String },
}
