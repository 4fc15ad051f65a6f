//! Conflux Store
//!
//! This crate provides the storage trait and implementations for workflow
//! checkpoints. A checkpoint is everything needed to resume a suspended
//! composite tool invocation: parameters, per-step state and outputs, and
//! the pending elicitation, if any.
//!
//! The [`CheckpointStore`] trait defines operations for:
//! - Saving and loading checkpoints by instance ID
//! - Deleting finished checkpoints
//! - Listing instances that are not yet terminal

mod memory;
mod sqlite;
mod types;

pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
pub use types::{Checkpoint, InstanceStatus, PendingElicitation, StepRecord, StepStatus};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested checkpoint was not found.
  #[error("checkpoint not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Running migrations failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  /// A claim found the instance in a different status than expected.
  #[error("checkpoint {instance_id} is {status}")]
  StatusMismatch {
    instance_id: String,
    status: InstanceStatus,
  },

  /// A checkpoint could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Storage for workflow checkpoints.
///
/// Implementations must be read-after-write consistent for a single
/// instance: a `load` following a completed `save` sees that save.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
  /// Insert or replace a checkpoint.
  async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

  /// Load a checkpoint by instance ID.
  async fn load(&self, instance_id: &str) -> Result<Checkpoint, StoreError>;

  /// Atomically move an instance from `expected` to `next` and return the
  /// updated checkpoint.
  ///
  /// Of several concurrent claims on the same status, exactly one succeeds;
  /// the others get [`StoreError::StatusMismatch`] with the current status.
  async fn claim(
    &self,
    instance_id: &str,
    expected: InstanceStatus,
    next: InstanceStatus,
  ) -> Result<Checkpoint, StoreError>;

  /// Delete a checkpoint. Deleting a missing checkpoint is not an error.
  async fn delete(&self, instance_id: &str) -> Result<(), StoreError>;

  /// IDs of instances that are not in a terminal state.
  async fn list_active(&self) -> Result<Vec<String>, StoreError>;
}
