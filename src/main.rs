use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use conflux_aggregator::{Aggregation, AggregationError, CatalogSource, SharedNamespace, discover};
use conflux_config::{BackendCatalog, ServerConfig, ToolSpec, format_duration};
use conflux_executor::{
  BackendDispatcher, DispatchError, ElicitationResponse, ExecutorConfig, Outcome, ResponseAction,
  WorkflowExecutor,
};
use conflux_store::{CheckpointStore, SqliteCheckpointStore};
use conflux_validator::validate_composite_tools;
use conflux_workflow::Workflow;

/// Conflux - Composite tools over aggregated MCP backends
#[derive(Parser)]
#[command(name = "conflux")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.conflux)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Aggregate backend tools and validate every composite tool
  Validate {
    /// Path to the server file (JSON)
    server_file: PathBuf,
  },

  /// Print the aggregated tool namespace and conflict report
  Tools {
    /// Path to the server file (JSON)
    server_file: PathBuf,
  },

  /// Invoke a composite tool with parameters read from stdin
  Run {
    /// Path to the server file (JSON)
    server_file: PathBuf,

    /// Composite tool name
    #[arg(long)]
    tool: String,
  },

  /// Answer a pending elicitation; content is read from stdin
  Resume {
    /// Path to the server file (JSON)
    server_file: PathBuf,

    /// Composite tool name
    #[arg(long)]
    tool: String,

    /// Suspended instance ID
    #[arg(long)]
    instance: String,

    #[arg(long, value_enum)]
    action: Action,
  },

  /// Print the stored state of an instance
  Status {
    #[arg(long)]
    instance: String,
  },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Action {
  Accept,
  Decline,
  Cancel,
}

impl From<Action> for ResponseAction {
  fn from(action: Action) -> Self {
    match action {
      Action::Accept => ResponseAction::Accept,
      Action::Decline => ResponseAction::Decline,
      Action::Cancel => ResponseAction::Cancel,
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".conflux"),
  };

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Some(Commands::Validate { server_file }) => rt.block_on(validate(server_file))?,
    Some(Commands::Tools { server_file }) => rt.block_on(tools(server_file))?,
    Some(Commands::Run { server_file, tool }) => {
      let params = read_json_from_stdin()?;
      rt.block_on(run(server_file, tool, params, data_dir))?
    }
    Some(Commands::Resume {
      server_file,
      tool,
      instance,
      action,
    }) => {
      let content = read_json_from_stdin()?;
      let response = ElicitationResponse {
        action: action.into(),
        content: (!content.as_object().is_some_and(|m| m.is_empty())).then_some(content),
      };
      rt.block_on(resume(server_file, tool, instance, response, data_dir))?
    }
    Some(Commands::Status { instance }) => rt.block_on(status(instance, data_dir))?,
    None => {
      println!("conflux - use --help to see available commands");
    }
  }

  Ok(())
}

/// A server file: [`ServerConfig`] plus canned backend responses.
struct LoadedServer {
  config: ServerConfig,
  fixtures: Fixtures,
}

/// Canned responses, `fixtures.<backend>.<tool>`. A fixture of the form
/// `{"error": "..."}` makes the call fail. Backends listed in `offline`
/// do not answer catalog discovery.
#[derive(Debug, Clone, Default, Deserialize)]
struct Fixtures {
  #[serde(default)]
  fixtures: HashMap<String, HashMap<String, serde_json::Value>>,

  #[serde(default)]
  offline: Vec<String>,
}

async fn load_server(path: &Path) -> Result<LoadedServer> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read server file: {}", path.display()))?;

  let raw: serde_json::Value = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse server file: {}", path.display()))?;

  let fixtures: Fixtures = serde_json::from_value(raw.clone()).context("invalid fixtures")?;
  let config: ServerConfig = serde_json::from_value(raw)
    .with_context(|| format!("invalid server configuration: {}", path.display()))?;

  Ok(LoadedServer { config, fixtures })
}

/// Discover the backend catalogs and build the aggregated namespace.
async fn aggregate(server: &LoadedServer) -> Result<Aggregation> {
  let source = ServerCatalogs::new(&server.config.backends, &server.fixtures.offline);
  let backends: Vec<String> = server
    .config
    .backends
    .iter()
    .map(|b| b.backend.clone())
    .collect();

  discover(&source, &backends, &server.config.aggregation)
    .await
    .context("failed to aggregate backend tools")
}

/// Aggregate the backends and validate every composite tool against the
/// resulting namespace.
async fn prepare(server: &LoadedServer) -> Result<(Aggregation, Vec<Workflow>)> {
  let config = &server.config;
  let aggregation = aggregate(server).await?;
  aggregation
    .ensure_resolved()
    .context("tool name conflicts must be resolved")?;

  let workflows = validate_composite_tools(&config.composite_tools, Some(&aggregation.namespace))
    .context("composite tool validation failed")?;

  Ok((aggregation, workflows))
}

async fn validate(server_file: PathBuf) -> Result<()> {
  let server = load_server(&server_file).await?;
  let (aggregation, workflows) = prepare(&server).await?;

  for conflict in &aggregation.conflicts {
    eprintln!(
      "Conflict on '{}' between {}",
      conflict.name,
      conflict.backends.join(", ")
    );
  }

  let default_timeout = ExecutorConfig::default().default_workflow_timeout;
  for workflow in &workflows {
    let timeout = workflow
      .timeout_ms
      .map(Duration::from_millis)
      .unwrap_or(default_timeout);
    eprintln!(
      "{}: {} steps, timeout {}",
      workflow.name,
      workflow.steps.len(),
      format_duration(timeout)
    );
  }

  println!(
    "ok: {} backend tools, {} composite tools",
    aggregation.namespace.len(),
    workflows.len()
  );
  Ok(())
}

async fn tools(server_file: PathBuf) -> Result<()> {
  let server = load_server(&server_file).await?;
  let aggregation = aggregate(&server).await?;

  let output = serde_json::json!({
    "tools": aggregation.namespace.iter().collect::<Vec<_>>(),
    "conflicts": aggregation.conflicts,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn run(
  server_file: PathBuf,
  tool: String,
  params: serde_json::Value,
  data_dir: PathBuf,
) -> Result<()> {
  let server = load_server(&server_file).await?;
  let outcome = invoke_tool(&server, &tool, params, &data_dir, interrupt_token()).await?;
  print_outcome(&server_file, &tool, &outcome)
}

async fn resume(
  server_file: PathBuf,
  tool: String,
  instance: String,
  response: ElicitationResponse,
  data_dir: PathBuf,
) -> Result<()> {
  let server = load_server(&server_file).await?;
  let outcome =
    resume_tool(&server, &tool, &instance, response, &data_dir, interrupt_token()).await?;
  print_outcome(&server_file, &tool, &outcome)
}

async fn status(instance: String, data_dir: PathBuf) -> Result<()> {
  let store = open_store(&data_dir).await?;
  let checkpoint = store
    .load(&instance)
    .await
    .with_context(|| format!("failed to load instance {}", instance))?;
  println!("{}", serde_json::to_string_pretty(&checkpoint)?);
  Ok(())
}

async fn invoke_tool(
  server: &LoadedServer,
  tool: &str,
  params: serde_json::Value,
  data_dir: &Path,
  cancel: CancellationToken,
) -> Result<Outcome> {
  let (executor, workflow) = executor_for(server, tool, data_dir).await?;
  eprintln!("Invoking composite tool: {}", workflow.name);

  executor
    .invoke(&workflow, params, cancel)
    .await
    .context("composite tool execution failed")
}

async fn resume_tool(
  server: &LoadedServer,
  tool: &str,
  instance: &str,
  response: ElicitationResponse,
  data_dir: &Path,
  cancel: CancellationToken,
) -> Result<Outcome> {
  let (executor, workflow) = executor_for(server, tool, data_dir).await?;
  eprintln!("Resuming {} ({})", workflow.name, instance);

  executor
    .resume(&workflow, instance, response, cancel)
    .await
    .context("composite tool execution failed")
}

async fn executor_for(
  server: &LoadedServer,
  tool: &str,
  data_dir: &Path,
) -> Result<(WorkflowExecutor, Workflow)> {
  let (aggregation, workflows) = prepare(server).await?;
  let workflow = workflows
    .into_iter()
    .find(|w| w.name == tool)
    .with_context(|| format!("composite tool '{}' not found", tool))?;

  let store = open_store(data_dir).await?;
  let executor = WorkflowExecutor::new(
    ExecutorConfig::default(),
    SharedNamespace::new(aggregation.namespace),
    Arc::new(FixtureDispatcher::new(server.fixtures.clone())),
  )
  .with_store(Arc::new(store));

  Ok((executor, workflow))
}

async fn open_store(data_dir: &Path) -> Result<SqliteCheckpointStore> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let url = format!(
    "sqlite://{}?mode=rwc",
    data_dir.join("checkpoints.db").display()
  );
  SqliteCheckpointStore::connect(&url)
    .await
    .context("failed to open checkpoint store")
}

/// Cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      trigger.cancel();
    }
  });
  cancel
}

fn print_outcome(server_file: &Path, tool: &str, outcome: &Outcome) -> Result<()> {
  match outcome {
    Outcome::Completed(result) => {
      eprintln!(
        "Execution completed: {} in {}ms",
        result.instance_id, result.duration_ms
      );
      println!("{}", serde_json::to_string_pretty(&result.output)?);
    }
    Outcome::Suspended(suspension) => {
      eprintln!("Waiting for input: {}", suspension.message);
      eprintln!(
        "Answer with: conflux resume {} --tool {} --instance {} --action accept",
        server_file.display(),
        tool,
        suspension.instance_id
      );
      println!("{}", serde_json::to_string_pretty(suspension)?);
    }
  }
  Ok(())
}

/// Serves the catalogs declared in the server file.
struct ServerCatalogs {
  catalogs: HashMap<String, Vec<ToolSpec>>,
  offline: Vec<String>,
}

impl ServerCatalogs {
  fn new(backends: &[BackendCatalog], offline: &[String]) -> Self {
    let mut catalogs = HashMap::with_capacity(backends.len());
    for catalog in backends {
      catalogs
        .entry(catalog.backend.clone())
        .or_insert_with(|| catalog.tools.clone());
    }
    Self {
      catalogs,
      offline: offline.to_vec(),
    }
  }
}

#[async_trait]
impl CatalogSource for ServerCatalogs {
  async fn list_tools(&self, backend: &str) -> Result<Vec<ToolSpec>, AggregationError> {
    if self.offline.iter().any(|b| b == backend) {
      return Err(AggregationError::Discovery {
        backend: backend.to_string(),
        message: "backend is offline".to_string(),
      });
    }
    self
      .catalogs
      .get(backend)
      .cloned()
      .ok_or_else(|| AggregationError::Discovery {
        backend: backend.to_string(),
        message: "no catalog declared".to_string(),
      })
  }
}

/// Answers backend calls from the server file's fixtures, echoing the call
/// when no fixture exists.
struct FixtureDispatcher {
  fixtures: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl FixtureDispatcher {
  fn new(fixtures: Fixtures) -> Self {
    Self {
      fixtures: fixtures.fixtures,
    }
  }
}

#[async_trait]
impl BackendDispatcher for FixtureDispatcher {
  async fn call(
    &self,
    backend: &str,
    tool: &str,
    arguments: serde_json::Value,
  ) -> Result<serde_json::Value, DispatchError> {
    debug!(backend, tool, arguments = %arguments, "fixture call");

    match self.fixtures.get(backend).and_then(|tools| tools.get(tool)) {
      Some(serde_json::Value::Object(map)) if map.len() == 1 && map.contains_key("error") => {
        let message = match &map["error"] {
          serde_json::Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        Err(DispatchError::Tool(message))
      }
      Some(fixture) => Ok(fixture.clone()),
      None => Ok(serde_json::json!({
        "backend": backend,
        "tool": tool,
        "arguments": arguments,
      })),
    }
  }
}

fn read_json_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read JSON from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse JSON from stdin")
    }
  }
}
