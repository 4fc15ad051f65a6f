//! Conflux Validator
//!
//! Turns a [`CompositeToolDef`](conflux_config::CompositeToolDef) into a
//! locked [`Workflow`](conflux_workflow::Workflow), or reports the first
//! problem with its field path.
//!
//! Admission-time checks and reconcile-time checks call the same function,
//! so both reject exactly the same definitions.
//!
//! # Checks, in order
//!
//! ```text
//! 1. name, description, steps present; step count; timeout; parameters schema
//! 2. unique composite tool names (validate_composite_tools)
//! 3. step ids unique; type / tool / message consistent; templates parse
//! 4. dependsOn targets exist
//! 5. onError action and retry settings
//! 6. elicitation onDecline / onCancel actions
//! 7. no dependency cycles (declared and template-implied edges)
//! 8. referenced steps exist; skippable steps default every field read
//! 9. tool steps resolve in the namespace, when one is given
//! ```

mod error;
mod validator;

pub use error::ValidationError;
pub use validator::{
  DEFAULT_RETRY_DELAY_MS, MAX_WORKFLOW_STEPS, validate_composite_tool, validate_composite_tools,
  validate_with,
};
