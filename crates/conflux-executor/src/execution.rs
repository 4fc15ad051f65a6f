//! Workflow execution.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conflux_aggregator::ToolNamespace;
use conflux_store::{Checkpoint, InstanceStatus, PendingElicitation, StepRecord, StepStatus};
use conflux_template::render_value;
use conflux_workflow::{ElicitationAction, ErrorPolicy, Graph, Step, StepKind, Workflow};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::call::{CallOutcome, StepCall};
use crate::context::template_context;
use crate::dispatch::{ElicitationRequest, ElicitationResponse, ResponseAction};
use crate::error::ExecutionError;
use crate::events::ExecutionEvent;
use crate::executor::WorkflowExecutor;
use crate::output::build_output;
use crate::result::{Outcome, Suspension, WorkflowResult};

/// One run of a workflow instance, from a fresh start or from a checkpoint,
/// until it completes, suspends or fails.
///
/// The execution owns the checkpoint. Spawned steps only report results
/// back; every state change happens here and is saved before the next
/// scheduling decision.
pub(crate) struct Execution<'a> {
  executor: &'a WorkflowExecutor,
  workflow: &'a Workflow,
  graph: Graph,
  namespace: Arc<ToolNamespace>,
  checkpoint: Checkpoint,
  cancel: CancellationToken,
  timeout: Duration,
  deadline: Instant,
}

impl<'a> Execution<'a> {
  pub(crate) fn new(
    executor: &'a WorkflowExecutor,
    workflow: &'a Workflow,
    checkpoint: Checkpoint,
    cancel: CancellationToken,
  ) -> Self {
    let timeout = workflow
      .timeout_ms
      .map(Duration::from_millis)
      .unwrap_or(executor.config.default_workflow_timeout);

    // time spent before a suspension counts against the timeout
    let spent = (Utc::now() - checkpoint.started_at)
      .to_std()
      .unwrap_or_default();
    let deadline = Instant::now() + timeout.saturating_sub(spent);

    Self {
      executor,
      workflow,
      graph: workflow.graph(),
      namespace: executor.namespace.load(),
      checkpoint,
      cancel,
      timeout,
      deadline,
    }
  }

  /// Run the instance, first applying `response` to its pending elicitation
  /// when resuming.
  #[instrument(
    name = "workflow_execute",
    skip(self, response),
    fields(
      workflow = %self.workflow.name,
      instance_id = %self.checkpoint.instance_id,
    )
  )]
  pub(crate) async fn run(
    mut self,
    response: Option<ElicitationResponse>,
  ) -> Result<Outcome, ExecutionError> {
    let result = match response {
      Some(response) => match self.apply_response(response).await {
        Ok(()) => self.run_loop().await,
        Err(e) => Err(e),
      },
      None => self.run_loop().await,
    };

    let instance_id = self.checkpoint.instance_id.clone();
    match &result {
      Ok(Outcome::Completed(_)) => {
        info!(instance_id = %instance_id, "workflow_completed");
        self
          .executor
          .notifier
          .notify(ExecutionEvent::WorkflowCompleted { instance_id });
      }
      Ok(Outcome::Suspended(suspension)) => {
        info!(
          instance_id = %instance_id,
          step_id = %suspension.step_id,
          "workflow_suspended"
        );
      }
      Err(e) => {
        error!(instance_id = %instance_id, error = %e, "workflow_failed");
        self.fail(e).await;
        self.executor.notifier.notify(ExecutionEvent::WorkflowFailed {
          instance_id,
          error: e.to_string(),
        });
      }
    }

    result
  }

  /// Run the main scheduling loop.
  async fn run_loop(&mut self) -> Result<Outcome, ExecutionError> {
    if self.cancel.is_cancelled() {
      return Err(ExecutionError::Cancelled);
    }
    if Instant::now() >= self.deadline {
      return Err(self.timed_out());
    }

    self.checkpoint.status = InstanceStatus::Running;
    self.save().await?;

    debug!(
      instance_id = %self.checkpoint.instance_id,
      entry_points = ?self.graph.entry_points(),
      "scheduling"
    );

    let mut in_flight: JoinSet<CallOutcome> = JoinSet::new();
    let steps_cancel = self.cancel.child_token();

    loop {
      if let Err(e) = self.schedule(&mut in_flight, &steps_cancel).await {
        self.drain(&mut in_flight, &steps_cancel).await;
        return Err(e);
      }

      // Elicitations only start once nothing else is running, so the
      // suspended checkpoint has no in-flight steps.
      if in_flight.is_empty() {
        let Some(step) = self.eligible().into_iter().find(|s| s.is_elicitation()) else {
          break;
        };
        if !self.condition_holds(step)? {
          self.skip(step, None).await?;
          continue;
        }
        return self.suspend(step).await;
      }

      let joined = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          warn!(instance_id = %self.checkpoint.instance_id, "workflow cancelled during step execution");
          self.drain(&mut in_flight, &steps_cancel).await;
          return Err(ExecutionError::Cancelled);
        }
        _ = tokio::time::sleep_until(self.deadline) => {
          self.drain(&mut in_flight, &steps_cancel).await;
          return Err(self.timed_out());
        }
        joined = in_flight.join_next() => joined,
      };

      let Some(joined) = joined else {
        continue;
      };

      let settled = match joined {
        Ok(outcome) => self.settle(outcome).await,
        Err(e) => Err(ExecutionError::Internal {
          message: format!("task join error: {}", e),
        }),
      };
      if let Err(e) = settled {
        self.drain(&mut in_flight, &steps_cancel).await;
        return Err(e);
      }
    }

    self.finish().await
  }

  /// Start every eligible tool step, up to the concurrency limit. Steps whose
  /// condition is false are skipped, which can make further steps eligible.
  async fn schedule(
    &mut self,
    in_flight: &mut JoinSet<CallOutcome>,
    cancel: &CancellationToken,
  ) -> Result<(), ExecutionError> {
    let limit = self.executor.config.max_parallel_steps.max(1);

    loop {
      let mut skipped = false;

      for step in self.eligible() {
        if step.is_elicitation() {
          continue;
        }
        if in_flight.len() >= limit {
          return Ok(());
        }
        if !self.condition_holds(step)? {
          self.skip(step, None).await?;
          skipped = true;
          continue;
        }
        self.start(step, in_flight, cancel).await?;
      }

      if !skipped {
        return Ok(());
      }
    }
  }

  /// Waiting steps whose upstream steps have all settled, in declaration
  /// order.
  fn eligible(&self) -> Vec<&'a Step> {
    let workflow: &'a Workflow = self.workflow;
    workflow
      .steps
      .iter()
      .filter(|step| self.checkpoint.step_status(&step.id) == StepStatus::Waiting)
      .filter(|step| {
        self
          .graph
          .upstream(&step.id)
          .iter()
          .all(|up| self.checkpoint.step_status(up).is_settled())
      })
      .collect()
  }

  fn condition_holds(&self, step: &Step) -> Result<bool, ExecutionError> {
    let Some(condition) = step
      .condition
      .as_deref()
      .map(str::trim)
      .filter(|c| !c.is_empty())
    else {
      return Ok(true);
    };

    let context = self.context();
    let holds = self
      .executor
      .renderer
      .evaluate_condition(condition, &context)
      .map_err(|e| ExecutionError::Template {
        step_id: step.id.clone(),
        message: e.to_string(),
      })?;

    debug!(step_id = %step.id, condition, holds, "condition evaluated");
    Ok(holds)
  }

  /// Render a tool step's arguments and spawn its call.
  async fn start(
    &mut self,
    step: &Step,
    in_flight: &mut JoinSet<CallOutcome>,
    cancel: &CancellationToken,
  ) -> Result<(), ExecutionError> {
    let StepKind::ToolCall { tool, arguments } = &step.kind else {
      return Err(ExecutionError::Internal {
        message: format!("step '{}' is not a tool call", step.id),
      });
    };

    let target = self
      .namespace
      .resolve(tool)
      .ok_or_else(|| ExecutionError::ToolNotFound {
        step_id: step.id.clone(),
        tool: tool.clone(),
      })?;

    let context = self.context();
    let arguments = serde_json::Value::Object(
      arguments
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    );
    let arguments = render_value(self.executor.renderer.as_ref(), &arguments, &context).map_err(
      |e| ExecutionError::Template {
        step_id: step.id.clone(),
        message: e.to_string(),
      },
    )?;

    let config = &self.executor.config;
    let (attempts, retry_delay) = match step.on_error {
      ErrorPolicy::Retry { count, delay_ms } => {
        let count = if count > config.max_retry_count {
          warn!(
            step_id = %step.id,
            retry_count = count,
            max_retry_count = config.max_retry_count,
            "retry count capped"
          );
          config.max_retry_count
        } else {
          count
        };
        (count.max(1), Duration::from_millis(delay_ms))
      }
      _ => (1, Duration::ZERO),
    };

    let call = StepCall {
      instance_id: self.checkpoint.instance_id.clone(),
      step_id: step.id.clone(),
      backend: target.backend.clone(),
      tool: target.original_name.clone(),
      arguments,
      attempts,
      retry_delay,
      timeout: step
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(config.default_step_timeout),
      transport_retries: config.transport_retries,
      transport_retry_delay: config.transport_retry_delay,
      dispatcher: self.executor.dispatcher.clone(),
      notifier: self.executor.notifier.clone(),
      cancel: cancel.clone(),
    };

    info!(
      instance_id = %self.checkpoint.instance_id,
      step_id = %step.id,
      tool = %tool,
      backend = %call.backend,
      "step_started"
    );

    let record = self.record_mut(&step.id);
    record.status = StepStatus::Running;
    record.started_at = Some(Utc::now());
    self.save().await?;

    self.executor.notifier.notify(ExecutionEvent::StepStarted {
      instance_id: self.checkpoint.instance_id.clone(),
      step_id: step.id.clone(),
    });

    in_flight.spawn(call.run());
    Ok(())
  }

  /// Record a finished step call and apply its error policy.
  async fn settle(&mut self, outcome: CallOutcome) -> Result<(), ExecutionError> {
    // a step that saw the cancellation first reports it as its own failure
    if self.cancel.is_cancelled() {
      return Err(ExecutionError::Cancelled);
    }

    let workflow: &'a Workflow = self.workflow;
    let step = workflow
      .get_step(&outcome.step_id)
      .ok_or_else(|| ExecutionError::Internal {
        message: format!("unknown step '{}' finished", outcome.step_id),
      })?;

    let instance_id = self.checkpoint.instance_id.clone();
    let record = self.record_mut(&step.id);
    record.attempts = outcome.attempts;

    let message = match outcome.result {
      Ok(output) => {
        record.status = StepStatus::Completed;
        record.output = Some(output.clone());
        record.finished_at = Some(Utc::now());
        self.save().await?;

        info!(instance_id = %instance_id, step_id = %step.id, "step_completed");
        self.executor.notifier.notify(ExecutionEvent::StepCompleted {
          instance_id,
          step_id: step.id.clone(),
          output,
        });
        return Ok(());
      }
      Err(message) => message,
    };

    warn!(
      instance_id = %instance_id,
      step_id = %step.id,
      attempts = outcome.attempts,
      error = %message,
      "step_failed"
    );
    self.executor.notifier.notify(ExecutionEvent::StepFailed {
      instance_id,
      step_id: step.id.clone(),
      error: message.clone(),
    });

    match step.on_error {
      ErrorPolicy::Continue => self.skip(step, Some(message)).await,
      policy => {
        let record = self.record_mut(&step.id);
        record.status = StepStatus::Failed;
        record.error = Some(message.clone());
        record.finished_at = Some(Utc::now());
        self.save().await?;

        Err(match policy {
          ErrorPolicy::Retry { .. } => ExecutionError::RetriesExhausted {
            step_id: step.id.clone(),
            attempts: outcome.attempts,
            message,
          },
          _ => ExecutionError::StepFailed {
            step_id: step.id.clone(),
            message,
          },
        })
      }
    }
  }

  /// Mark a step skipped, substituting its default results as output.
  async fn skip(&mut self, step: &Step, error: Option<String>) -> Result<(), ExecutionError> {
    let output = (!step.default_results.is_empty()).then(|| step.default_output());

    let record = self.record_mut(&step.id);
    record.status = StepStatus::Skipped;
    record.output = output.clone();
    record.error = error;
    record.finished_at = Some(Utc::now());
    self.save().await?;

    info!(
      instance_id = %self.checkpoint.instance_id,
      step_id = %step.id,
      "step_skipped"
    );
    self.executor.notifier.notify(ExecutionEvent::StepSkipped {
      instance_id: self.checkpoint.instance_id.clone(),
      step_id: step.id.clone(),
      output,
    });
    Ok(())
  }

  /// Persist a pending elicitation and hand it to the transport.
  async fn suspend(&mut self, step: &Step) -> Result<Outcome, ExecutionError> {
    let StepKind::Elicitation {
      message, schema, ..
    } = &step.kind
    else {
      return Err(ExecutionError::Internal {
        message: format!("step '{}' is not an elicitation", step.id),
      });
    };

    let context = self.context();
    let message = match self.executor.renderer.render(message, &context) {
      Ok(serde_json::Value::String(s)) => s,
      Ok(other) => other.to_string(),
      Err(e) => {
        return Err(ExecutionError::Template {
          step_id: step.id.clone(),
          message: e.to_string(),
        });
      }
    };

    let wait = step
      .timeout_ms
      .map(Duration::from_millis)
      .unwrap_or(self.executor.config.default_elicitation_timeout);
    let now = Utc::now();
    let deadline = chrono::Duration::from_std(wait).ok().map(|d| now + d);

    let record = self.record_mut(&step.id);
    record.status = StepStatus::AwaitingElicitation;
    record.started_at = Some(now);

    self.checkpoint.status = InstanceStatus::AwaitingElicitation;
    self.checkpoint.awaiting = Some(PendingElicitation {
      step_id: step.id.clone(),
      message: message.clone(),
      schema: schema.clone(),
      requested_at: now,
      deadline,
    });
    self.save().await?;

    let request = ElicitationRequest {
      instance_id: self.checkpoint.instance_id.clone(),
      workflow: self.workflow.name.clone(),
      step_id: step.id.clone(),
      message: message.clone(),
      schema: schema.clone(),
    };
    self
      .executor
      .elicitation
      .request_input(&request)
      .await
      .map_err(|e| ExecutionError::Elicitation {
        step_id: step.id.clone(),
        message: e.to_string(),
      })?;

    info!(
      instance_id = %self.checkpoint.instance_id,
      step_id = %step.id,
      "elicitation_requested"
    );
    self
      .executor
      .notifier
      .notify(ExecutionEvent::ElicitationRequested {
        instance_id: request.instance_id.clone(),
        step_id: request.step_id.clone(),
        message: request.message.clone(),
      });

    Ok(Outcome::Suspended(Suspension {
      instance_id: request.instance_id,
      step_id: request.step_id,
      message: request.message,
      schema: request.schema,
    }))
  }

  /// Settle the pending elicitation with the user's answer.
  async fn apply_response(&mut self, response: ElicitationResponse) -> Result<(), ExecutionError> {
    let pending = self
      .checkpoint
      .awaiting
      .take()
      .ok_or_else(|| ExecutionError::Internal {
        message: "no pending elicitation".to_string(),
      })?;

    let workflow: &'a Workflow = self.workflow;
    let step = workflow
      .get_step(&pending.step_id)
      .ok_or_else(|| ExecutionError::Internal {
        message: format!("pending step '{}' is not in the workflow", pending.step_id),
      })?;
    let StepKind::Elicitation {
      on_decline,
      on_cancel,
      ..
    } = &step.kind
    else {
      return Err(ExecutionError::Internal {
        message: format!("pending step '{}' is not an elicitation", step.id),
      });
    };

    let mut response = response;
    if pending.deadline.is_some_and(|deadline| Utc::now() > deadline) {
      warn!(step_id = %step.id, "elicitation answered after its deadline, treating as cancel");
      response = ElicitationResponse::cancel();
    }

    info!(
      instance_id = %self.checkpoint.instance_id,
      step_id = %step.id,
      action = response.action.as_str(),
      "elicitation_answered"
    );
    self.executor.notifier.notify(ExecutionEvent::WorkflowResumed {
      instance_id: self.checkpoint.instance_id.clone(),
      step_id: step.id.clone(),
    });

    let handler = match response.action {
      ResponseAction::Accept => ElicitationAction::Continue,
      ResponseAction::Decline => *on_decline,
      ResponseAction::Cancel => *on_cancel,
    };

    let mut output = response.to_output();
    let record = self.record_mut(&step.id);
    record.attempts = 1;
    record.finished_at = Some(Utc::now());

    match handler {
      ElicitationAction::Continue => {
        record.status = StepStatus::Completed;
        record.output = Some(output);
      }
      ElicitationAction::SkipRemaining => {
        if let Some(map) = output.as_object_mut() {
          map.insert("skipped".to_string(), serde_json::Value::Bool(true));
        }
        record.status = StepStatus::Completed;
        record.output = Some(output);

        self.checkpoint.skip_remaining = true;
        let waiting: Vec<&'a Step> = workflow
          .steps
          .iter()
          .filter(|s| self.checkpoint.step_status(&s.id) == StepStatus::Waiting)
          .collect();
        for remaining in waiting {
          self.skip(remaining, None).await?;
        }
      }
      ElicitationAction::Abort => {
        record.status = StepStatus::Failed;
        record.error = Some(format!("elicitation {}", response.action.as_str()));
        return Err(match response.action {
          ResponseAction::Cancel => ExecutionError::ElicitationCancelled {
            step_id: step.id.clone(),
          },
          _ => ExecutionError::ElicitationDeclined {
            step_id: step.id.clone(),
          },
        });
      }
    }

    self.save().await
  }

  /// Build the output and mark the instance completed.
  async fn finish(&mut self) -> Result<Outcome, ExecutionError> {
    let output = match &self.workflow.output {
      Some(mapping) => {
        let context = self.context();
        build_output(
          self.executor.renderer.as_ref(),
          mapping,
          &context,
          self.checkpoint.skip_remaining,
        )?
      }
      None => serde_json::Value::Object(
        self
          .workflow
          .steps
          .iter()
          .filter_map(|step| {
            let output = self.checkpoint.step(&step.id)?.output.clone()?;
            Some((step.id.clone(), output))
          })
          .collect(),
      ),
    };

    self.checkpoint.status = InstanceStatus::Completed;
    self.checkpoint.output = Some(output.clone());
    self.save().await?;

    Ok(Outcome::Completed(WorkflowResult::from_checkpoint(
      &self.checkpoint,
      output,
    )))
  }

  /// Give in-flight steps the grace period to finish, then abort them.
  async fn drain(&self, in_flight: &mut JoinSet<CallOutcome>, cancel: &CancellationToken) {
    if in_flight.is_empty() {
      return;
    }
    cancel.cancel();

    let grace = self.executor.config.cancel_grace_period;
    let drained = tokio::time::timeout(grace, async {
      while in_flight.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
      warn!(
        instance_id = %self.checkpoint.instance_id,
        remaining = in_flight.len(),
        "grace period elapsed, aborting in-flight steps"
      );
      in_flight.abort_all();
    }
  }

  /// Record a terminal failure in the checkpoint.
  async fn fail(&mut self, err: &ExecutionError) {
    self.checkpoint.status = match err {
      ExecutionError::Cancelled
      | ExecutionError::ElicitationDeclined { .. }
      | ExecutionError::ElicitationCancelled { .. } => InstanceStatus::Aborted,
      _ => InstanceStatus::Failed,
    };
    self.checkpoint.error = Some(err.to_string());
    self.checkpoint.awaiting = None;

    for record in self.checkpoint.steps.values_mut() {
      if matches!(
        record.status,
        StepStatus::Running | StepStatus::AwaitingElicitation
      ) {
        record.status = StepStatus::Failed;
        record.error.get_or_insert_with(|| "interrupted".to_string());
        record.finished_at = Some(Utc::now());
      }
    }

    if let Err(e) = self.save().await {
      warn!(
        instance_id = %self.checkpoint.instance_id,
        error = %e,
        "failed to record workflow failure"
      );
    }
  }

  fn timed_out(&self) -> ExecutionError {
    ExecutionError::Timeout {
      timeout_ms: self.timeout.as_millis() as u64,
    }
  }

  fn context(&self) -> serde_json::Value {
    template_context(self.workflow, &self.checkpoint)
  }

  fn record_mut(&mut self, step_id: &str) -> &mut StepRecord {
    self.checkpoint.steps.entry(step_id.to_string()).or_default()
  }

  async fn save(&mut self) -> Result<(), ExecutionError> {
    self.checkpoint.updated_at = Utc::now();
    self.executor.store.save(&self.checkpoint).await?;
    Ok(())
  }
}
