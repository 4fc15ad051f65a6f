//! Conflux Template
//!
//! Templates appear in step arguments, step conditions, elicitation messages
//! and output mappings. This crate answers two questions about them:
//!
//! - Which step outputs does a template read? ([`extract_step_field_refs`]),
//!   used statically by the validator for skip-safety.
//! - What does a template evaluate to against a workflow context?
//!   ([`TemplateRenderer`]), used by the executor.
//!
//! # Context shape
//!
//! ```text
//! {
//!   "params":   { ...composite tool arguments... },
//!   "steps":    { "<id>": { "status": "...", "output": {...}, "error": "..." } },
//!   "workflow": { "id": "...", "name": "...", "step_count": 3, "status": "...", "duration_ms": 12 }
//! }
//! ```
//!
//! Both `{{ steps.fetch.output.data }}` and the Go-style
//! `{{.steps.fetch.output.data}}` spellings are accepted.

mod error;
mod refs;
mod renderer;

pub use error::TemplateError;
pub use refs::{
  StepFieldRef, extract_refs_from_value, extract_step_field_refs, extract_step_ids,
  extract_step_ids_from_value, has_dynamic_step_read,
};
pub use renderer::{JinjaRenderer, TemplateRenderer, render_value};
