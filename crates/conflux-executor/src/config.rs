use std::time::Duration;

/// Configuration for the workflow executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Upper bound on concurrently running steps of one invocation.
  pub max_parallel_steps: usize,
  /// Step timeout when the step does not set one.
  pub default_step_timeout: Duration,
  /// Workflow timeout when the composite tool does not set one.
  pub default_workflow_timeout: Duration,
  /// How long an elicitation is awaited when the step does not set a timeout.
  pub default_elicitation_timeout: Duration,
  /// How long in-flight calls get to finish after an abort.
  pub cancel_grace_period: Duration,
  /// Retry counts above this are capped.
  pub max_retry_count: u32,
  /// Extra attempts for transport errors before they count as a step failure.
  pub transport_retries: u32,
  pub transport_retry_delay: Duration,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      max_parallel_steps: 8,
      default_step_timeout: Duration::from_secs(5 * 60),
      default_workflow_timeout: Duration::from_secs(30 * 60),
      default_elicitation_timeout: Duration::from_secs(5 * 60),
      cancel_grace_period: Duration::from_secs(5),
      max_retry_count: 10,
      transport_retries: 2,
      transport_retry_delay: Duration::from_millis(200),
    }
  }
}
