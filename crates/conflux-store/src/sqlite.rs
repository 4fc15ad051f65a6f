use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::{Checkpoint, CheckpointStore, InstanceStatus, StoreError};

/// SQLite-based checkpoint store.
///
/// The full checkpoint is stored as JSON; status and timestamps are
/// duplicated into columns for querying.
pub struct SqliteCheckpointStore {
  pool: SqlitePool,
}

impl SqliteCheckpointStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Connect to `url` (e.g. `sqlite://data/checkpoints.db?mode=rwc`) and run
  /// migrations.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let pool = SqlitePoolOptions::new().connect(url).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// A private in-memory database, already migrated.
  pub async fn in_memory() -> Result<Self, StoreError> {
    // every connection to :memory: is a separate database
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
  async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
    let state = serde_json::to_string(checkpoint)?;

    sqlx::query(
      r#"
            INSERT INTO checkpoints (instance_id, workflow, status, state, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (instance_id) DO UPDATE SET
                workflow = excluded.workflow,
                status = excluded.status,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
    )
    .bind(&checkpoint.instance_id)
    .bind(&checkpoint.workflow)
    .bind(checkpoint.status.as_str())
    .bind(state)
    .bind(checkpoint.started_at)
    .bind(checkpoint.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn load(&self, instance_id: &str) -> Result<Checkpoint, StoreError> {
    let row: Option<(String,)> = sqlx::query_as(
      r#"
            SELECT state
            FROM checkpoints
            WHERE instance_id = ?
            "#,
    )
    .bind(instance_id)
    .fetch_optional(&self.pool)
    .await?;

    let (state,) = row.ok_or_else(|| StoreError::NotFound(instance_id.to_string()))?;
    Ok(serde_json::from_str(&state)?)
  }

  async fn claim(
    &self,
    instance_id: &str,
    expected: InstanceStatus,
    next: InstanceStatus,
  ) -> Result<Checkpoint, StoreError> {
    let result = sqlx::query(
      r#"
            UPDATE checkpoints
            SET status = ?, state = json_set(state, '$.status', ?)
            WHERE instance_id = ? AND status = ?
            "#,
    )
    .bind(next.as_str())
    .bind(next.as_str())
    .bind(instance_id)
    .bind(expected.as_str())
    .execute(&self.pool)
    .await?;

    let checkpoint = self.load(instance_id).await?;
    if result.rows_affected() == 0 {
      return Err(StoreError::StatusMismatch {
        instance_id: instance_id.to_string(),
        status: checkpoint.status,
      });
    }
    Ok(checkpoint)
  }

  async fn delete(&self, instance_id: &str) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM checkpoints WHERE instance_id = ?")
      .bind(instance_id)
      .execute(&self.pool)
      .await?;

    Ok(())
  }

  async fn list_active(&self) -> Result<Vec<String>, StoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
      r#"
            SELECT instance_id
            FROM checkpoints
            WHERE status IN ('pending', 'running', 'awaiting_elicitation')
            ORDER BY instance_id
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
  }
}
