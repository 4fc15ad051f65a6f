//! Workflow executor.

use std::sync::Arc;

use chrono::Utc;
use conflux_aggregator::SharedNamespace;
use conflux_store::{
  Checkpoint, CheckpointStore, InMemoryCheckpointStore, InstanceStatus, StepStatus, StoreError,
};
use conflux_template::{JinjaRenderer, TemplateRenderer};
use conflux_workflow::Workflow;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::ExecutorConfig;
use crate::dispatch::{
  BackendDispatcher, DeferredElicitation, ElicitationResponse, ElicitationTransport,
};
use crate::error::ExecutionError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::execution::Execution;
use crate::result::Outcome;

/// Runs composite tool workflows against the aggregated backends.
///
/// Each invocation gets its own instance ID and checkpoint. An invocation
/// that reaches an elicitation returns [`Outcome::Suspended`] and continues
/// when [`resume`](Self::resume) is called with the user's answer.
pub struct WorkflowExecutor {
  pub(crate) config: ExecutorConfig,
  pub(crate) namespace: SharedNamespace,
  pub(crate) dispatcher: Arc<dyn BackendDispatcher>,
  pub(crate) elicitation: Arc<dyn ElicitationTransport>,
  pub(crate) store: Arc<dyn CheckpointStore>,
  pub(crate) renderer: Arc<dyn TemplateRenderer>,
  pub(crate) notifier: Arc<dyn ExecutionNotifier>,
}

impl WorkflowExecutor {
  /// Create an executor with an in-memory checkpoint store, the minijinja
  /// renderer and no event notifier.
  pub fn new(
    config: ExecutorConfig,
    namespace: SharedNamespace,
    dispatcher: Arc<dyn BackendDispatcher>,
  ) -> Self {
    Self {
      config,
      namespace,
      dispatcher,
      elicitation: Arc::new(DeferredElicitation),
      store: Arc::new(InMemoryCheckpointStore::new()),
      renderer: Arc::new(JinjaRenderer::new()),
      notifier: Arc::new(NoopNotifier),
    }
  }

  pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
    self.store = store;
    self
  }

  pub fn with_elicitation(mut self, elicitation: Arc<dyn ElicitationTransport>) -> Self {
    self.elicitation = elicitation;
    self
  }

  pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
    self.renderer = renderer;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  /// The namespace tool steps are resolved against. Replacing its contents
  /// affects invocations started afterwards.
  pub fn namespace(&self) -> &SharedNamespace {
    &self.namespace
  }

  /// Start a new invocation of `workflow`.
  ///
  /// Missing parameters are filled from the parameter schema's defaults.
  pub async fn invoke(
    &self,
    workflow: &Workflow,
    params: serde_json::Value,
    cancel: CancellationToken,
  ) -> Result<Outcome, ExecutionError> {
    let instance_id = uuid::Uuid::new_v4().to_string();
    let params = workflow.apply_parameter_defaults(params);

    info!(
      instance_id = %instance_id,
      workflow = %workflow.name,
      params = %params,
      "workflow_started"
    );

    let checkpoint = Checkpoint::new(
      instance_id.clone(),
      workflow.name.clone(),
      params,
      workflow.steps.iter().map(|s| s.id.clone()),
    );

    self.notifier.notify(ExecutionEvent::WorkflowStarted {
      instance_id,
      workflow: workflow.name.clone(),
    });

    Execution::new(self, workflow, checkpoint, cancel)
      .run(None)
      .await
  }

  /// Continue a suspended invocation with the user's answer to its pending
  /// elicitation.
  ///
  /// The instance is claimed before anything runs: when several callers
  /// resume the same instance, one proceeds and the rest get
  /// [`ExecutionError::NotSuspended`].
  #[instrument(name = "workflow_resume", skip(self, workflow, response, cancel))]
  pub async fn resume(
    &self,
    workflow: &Workflow,
    instance_id: &str,
    response: ElicitationResponse,
    cancel: CancellationToken,
  ) -> Result<Outcome, ExecutionError> {
    let checkpoint = self.store.load(instance_id).await?;

    if checkpoint.workflow != workflow.name {
      return Err(ExecutionError::WorkflowMismatch {
        instance_id: instance_id.to_string(),
        expected: workflow.name.clone(),
        actual: checkpoint.workflow,
      });
    }
    if checkpoint.status != InstanceStatus::AwaitingElicitation || checkpoint.awaiting.is_none() {
      return Err(ExecutionError::NotSuspended {
        instance_id: instance_id.to_string(),
        status: checkpoint.status,
      });
    }

    let checkpoint = self
      .store
      .claim(
        instance_id,
        InstanceStatus::AwaitingElicitation,
        InstanceStatus::Running,
      )
      .await?;

    Execution::new(self, workflow, checkpoint, cancel)
      .run(Some(response))
      .await
  }

  /// Current checkpoint of an instance.
  pub async fn status(&self, instance_id: &str) -> Result<Checkpoint, ExecutionError> {
    Ok(self.store.load(instance_id).await?)
  }

  /// Abort a suspended or not yet started instance.
  ///
  /// Cancelling a finished instance returns it unchanged. A running
  /// invocation is stopped through the token passed to `invoke` or `resume`.
  pub async fn cancel(&self, instance_id: &str) -> Result<Checkpoint, ExecutionError> {
    let checkpoint = self.store.load(instance_id).await?;

    match checkpoint.status {
      status if status.is_terminal() => return Ok(checkpoint),
      InstanceStatus::Running => {
        return Err(ExecutionError::NotSuspended {
          instance_id: instance_id.to_string(),
          status: checkpoint.status,
        });
      }
      _ => {}
    }

    // a concurrent resume or cancel may have moved the instance on
    let mut checkpoint = match self
      .store
      .claim(instance_id, checkpoint.status, InstanceStatus::Aborted)
      .await
    {
      Ok(checkpoint) => checkpoint,
      Err(StoreError::StatusMismatch { status, .. }) if status.is_terminal() => {
        return Ok(self.store.load(instance_id).await?);
      }
      Err(StoreError::StatusMismatch { status, .. }) => {
        return Err(ExecutionError::NotSuspended {
          instance_id: instance_id.to_string(),
          status,
        });
      }
      Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    if let Some(pending) = checkpoint.awaiting.take() {
      if let Some(record) = checkpoint.steps.get_mut(&pending.step_id) {
        record.status = StepStatus::Failed;
        record.error = Some("cancelled".to_string());
        record.finished_at = Some(now);
      }
    }
    checkpoint.error = Some(ExecutionError::Cancelled.to_string());
    checkpoint.updated_at = now;
    self.store.save(&checkpoint).await?;

    info!(instance_id = %instance_id, "workflow_cancelled");
    self.notifier.notify(ExecutionEvent::WorkflowFailed {
      instance_id: instance_id.to_string(),
      error: ExecutionError::Cancelled.to_string(),
    });

    Ok(checkpoint)
  }

  /// IDs of instances that have not finished.
  pub async fn active_instances(&self) -> Result<Vec<String>, ExecutionError> {
    Ok(self.store.list_active().await?)
  }
}
