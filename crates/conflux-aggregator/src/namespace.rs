use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// A backend tool as exposed by the virtual server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendTool {
  /// Backend that owns the tool.
  pub backend: String,
  /// Name the backend knows the tool by. Calls are routed with this name.
  pub original_name: String,
  /// Name the tool is exposed under after overrides and conflict resolution.
  pub name: String,
  pub description: String,
  pub input_schema: serde_json::Value,
  /// Whether the tool is listed to clients. Hidden tools stay routable.
  pub advertised: bool,
}

/// Exposed tool name to backend tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolNamespace {
  tools: BTreeMap<String, BackendTool>,
}

impl ToolNamespace {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn contains(&self, name: &str) -> bool {
    self.tools.contains_key(name)
  }

  pub(crate) fn insert(&mut self, tool: BackendTool) {
    self.tools.insert(tool.name.clone(), tool);
  }

  /// Look up an exposed name.
  pub fn get(&self, name: &str) -> Option<&BackendTool> {
    self.tools.get(name)
  }

  /// Resolve a tool reference.
  ///
  /// Accepts an exposed name, or `backend.original_name` to address a
  /// backend tool regardless of how it was renamed.
  pub fn resolve(&self, reference: &str) -> Option<&BackendTool> {
    if let Some(tool) = self.tools.get(reference) {
      return Some(tool);
    }
    let (backend, original) = reference.split_once('.')?;
    self
      .tools
      .values()
      .find(|t| t.backend == backend && t.original_name == original)
  }

  /// All routable tools, ordered by exposed name.
  pub fn iter(&self) -> impl Iterator<Item = &BackendTool> {
    self.tools.values()
  }

  /// Tools listed to clients.
  pub fn advertised(&self) -> impl Iterator<Item = &BackendTool> {
    self.tools.values().filter(|t| t.advertised)
  }

  pub fn len(&self) -> usize {
    self.tools.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tools.is_empty()
  }
}

/// A shared, atomically replaceable [`ToolNamespace`].
///
/// Readers take a snapshot with [`load`](Self::load) and keep using it even
/// if a new index is stored concurrently.
#[derive(Debug, Clone, Default)]
pub struct SharedNamespace {
  inner: Arc<RwLock<Arc<ToolNamespace>>>,
}

impl SharedNamespace {
  pub fn new(namespace: ToolNamespace) -> Self {
    Self {
      inner: Arc::new(RwLock::new(Arc::new(namespace))),
    }
  }

  /// Snapshot of the current index.
  pub fn load(&self) -> Arc<ToolNamespace> {
    self
      .inner
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Replace the whole index.
  pub fn store(&self, namespace: ToolNamespace) {
    *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(namespace);
  }
}
