use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Checkpoint, CheckpointStore, InstanceStatus, StoreError};

/// In-memory checkpoint store.
///
/// Checkpoints do not survive a restart. Useful for tests and for
/// single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
  checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
  async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
    self
      .checkpoints
      .write()
      .await
      .insert(checkpoint.instance_id.clone(), checkpoint.clone());
    Ok(())
  }

  async fn load(&self, instance_id: &str) -> Result<Checkpoint, StoreError> {
    self
      .checkpoints
      .read()
      .await
      .get(instance_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))
  }

  async fn claim(
    &self,
    instance_id: &str,
    expected: InstanceStatus,
    next: InstanceStatus,
  ) -> Result<Checkpoint, StoreError> {
    let mut checkpoints = self.checkpoints.write().await;
    let checkpoint = checkpoints
      .get_mut(instance_id)
      .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))?;

    if checkpoint.status != expected {
      return Err(StoreError::StatusMismatch {
        instance_id: instance_id.to_string(),
        status: checkpoint.status,
      });
    }
    checkpoint.status = next;
    Ok(checkpoint.clone())
  }

  async fn delete(&self, instance_id: &str) -> Result<(), StoreError> {
    self.checkpoints.write().await.remove(instance_id);
    Ok(())
  }

  async fn list_active(&self) -> Result<Vec<String>, StoreError> {
    let mut ids: Vec<String> = self
      .checkpoints
      .read()
      .await
      .values()
      .filter(|c| !c.status.is_terminal())
      .map(|c| c.instance_id.clone())
      .collect();
    ids.sort();
    Ok(ids)
  }
}
