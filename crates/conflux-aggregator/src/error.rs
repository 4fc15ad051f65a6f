use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
  #[error("priorityOrder must not be empty when conflictResolution is priority")]
  EmptyPriorityOrder,

  #[error("backend {0:?} is declared more than once")]
  DuplicateBackend(String),

  #[error("unresolved tool name conflicts: {}", .names.join(", "))]
  UnresolvedConflicts { names: Vec<String> },

  #[error("failed to list tools for backend {backend:?}: {message}")]
  Discovery { backend: String, message: String },

  #[error("no backend returned a tool catalog")]
  NoBackendsAvailable,
}
