//! Conflux Config
//!
//! This crate contains the serializable configuration types for Conflux.
//! These types represent composite tool definitions and aggregation settings
//! before they are validated and locked by `conflux-validator`.
//!
//! Configuration is loaded from:
//! - JSON server files (via CLI with `conflux validate server.json`)
//! - Any other boundary that deserializes into [`ServerConfig`]
//!
//! Enumerated fields that need field-path validation errors (step `type`,
//! `onError.action`, elicitation handler `action`) are kept as raw strings.

mod aggregation;
mod composite;
mod duration;
mod output;
mod server;

pub use aggregation::{
  AggregationConfig, BackendCatalog, ConflictStrategy, ToolOverride, ToolSpec, WorkloadToolConfig,
};
pub use composite::{CompositeToolDef, ElicitationResponseDef, ErrorHandlingDef, WorkflowStepDef};
pub use duration::{DurationError, format_duration, parse_duration};
pub use output::{OutputConfig, OutputProperty};
pub use server::ServerConfig;

/// Step type for backend tool calls.
pub const STEP_TYPE_TOOL: &str = "tool";

/// Alternate spelling accepted for [`STEP_TYPE_TOOL`].
pub const STEP_TYPE_TOOL_CALL: &str = "tool_call";

/// Step type for user elicitation.
pub const STEP_TYPE_ELICITATION: &str = "elicitation";
