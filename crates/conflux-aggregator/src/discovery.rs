use async_trait::async_trait;
use conflux_config::{AggregationConfig, BackendCatalog, ToolSpec};
use tracing::{info, warn};

use crate::aggregator::{Aggregation, build};
use crate::error::AggregationError;

/// Lists the tools a backend currently offers.
#[async_trait]
pub trait CatalogSource: Send + Sync {
  async fn list_tools(&self, backend: &str) -> Result<Vec<ToolSpec>, AggregationError>;
}

/// Query every backend concurrently, then [`build`] the namespace.
///
/// Backends that fail to answer are logged and left out. Discovery only
/// fails when backends were requested and none of them answered.
pub async fn discover(
  source: &dyn CatalogSource,
  backends: &[String],
  config: &AggregationConfig,
) -> Result<Aggregation, AggregationError> {
  let results =
    futures::future::join_all(backends.iter().map(|backend| source.list_tools(backend))).await;

  let mut catalogs = Vec::with_capacity(backends.len());
  for (backend, result) in backends.iter().zip(results) {
    match result {
      Ok(tools) => {
        info!(backend = %backend, tools = tools.len(), "backend catalog listed");
        catalogs.push(BackendCatalog {
          backend: backend.clone(),
          tools,
        });
      }
      Err(e) => {
        warn!(backend = %backend, error = %e, "skipping backend");
      }
    }
  }

  if catalogs.is_empty() && !backends.is_empty() {
    return Err(AggregationError::NoBackendsAvailable);
  }

  build(&catalogs, config)
}
