//! Conflux Workflow
//!
//! This crate provides the "locked" workflow representation for Conflux.
//! A locked workflow is the validated form of a composite tool definition
//! and is the only form the executor accepts.
//!
//! Key differences from `conflux-config`:
//! - Step types, error policies and elicitation handlers are typed enums
//! - Durations are parsed
//! - Edges include both declared `dependsOn` edges and ordering edges implied
//!   by template references into other steps
//! - The dependency graph is known to be acyclic

mod error;
mod graph;
mod step;
mod workflow;

pub use error::WorkflowError;
pub use graph::Graph;
pub use step::{ElicitationAction, ErrorPolicy, Step, StepKind};
pub use workflow::Workflow;
