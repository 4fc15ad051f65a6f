use std::collections::{BTreeMap, HashSet};

use conflux_config::{AggregationConfig, BackendCatalog, ConflictStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::DEFAULT_PREFIX_FORMAT;
use crate::error::AggregationError;
use crate::namespace::{BackendTool, ToolNamespace};

/// Result of aggregating backend catalogs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
  pub namespace: ToolNamespace,
  pub conflicts: Vec<ConflictReport>,
}

impl Aggregation {
  /// Fail if any collision was left unresolved.
  pub fn ensure_resolved(&self) -> Result<(), AggregationError> {
    let names: Vec<String> = self
      .conflicts
      .iter()
      .filter(|c| c.resolution == Resolution::Unresolved)
      .map(|c| c.name.clone())
      .collect();

    if names.is_empty() {
      Ok(())
    } else {
      Err(AggregationError::UnresolvedConflicts { names })
    }
  }
}

/// A name claimed by more than one backend tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
  /// The contested name.
  pub name: String,
  /// Contributing backends, in declaration order.
  pub backends: Vec<String>,
  pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum Resolution {
  /// Each contender was renamed; backend to exposed name.
  Prefixed { names: BTreeMap<String, String> },
  /// One backend kept the name, the others were dropped.
  Prioritized { winner: String, dropped: Vec<String> },
  /// No contender is exposed under the name.
  Unresolved,
}

/// A backend tool after overrides, before conflict resolution.
struct Candidate {
  backend_index: usize,
  backend: String,
  original_name: String,
  name: String,
  description: String,
  input_schema: serde_json::Value,
  advertised: bool,
}

impl Candidate {
  fn into_tool(self, name: String) -> BackendTool {
    BackendTool {
      backend: self.backend,
      original_name: self.original_name,
      name,
      description: self.description,
      input_schema: self.input_schema,
      advertised: self.advertised,
    }
  }
}

/// Build the exposed tool namespace from backend catalogs.
///
/// Pure and deterministic: the same catalogs and configuration always yield
/// the same namespace and conflict report. Configuration errors are detected
/// before any tool is processed.
pub fn build(
  catalogs: &[BackendCatalog],
  config: &AggregationConfig,
) -> Result<Aggregation, AggregationError> {
  check_config(catalogs, config)?;

  let candidates = collect_candidates(catalogs, config);

  let mut groups: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
  for candidate in candidates {
    groups
      .entry(candidate.name.clone())
      .or_default()
      .push(candidate);
  }

  let (unique, colliding): (Vec<_>, Vec<_>) =
    groups.into_iter().partition(|(_, group)| group.len() == 1);

  let mut namespace = ToolNamespace::new();
  for (name, group) in unique {
    for candidate in group {
      namespace.insert(candidate.into_tool(name.clone()));
    }
  }

  let mut conflicts = Vec::new();
  for (name, group) in colliding {
    let backends: Vec<String> = group.iter().map(|c| c.backend.clone()).collect();
    debug!(tool = %name, backends = ?backends, "tool name conflict");

    match config.conflict_resolution {
      ConflictStrategy::Prefix => {
        let format = config
          .prefix_format
          .as_deref()
          .unwrap_or(DEFAULT_PREFIX_FORMAT);
        resolve_by_prefix(&name, group, format, &mut namespace, &mut conflicts);
      }
      ConflictStrategy::Priority => {
        let winner = resolve_by_priority(group, &config.priority_order, &mut namespace);
        let dropped = backends
          .iter()
          .filter(|b| **b != winner)
          .cloned()
          .collect();
        conflicts.push(ConflictReport {
          name,
          backends,
          resolution: Resolution::Prioritized { winner, dropped },
        });
      }
      ConflictStrategy::Manual => {
        warn!(tool = %name, backends = ?backends, "tool name conflict requires an override");
        conflicts.push(ConflictReport {
          name,
          backends,
          resolution: Resolution::Unresolved,
        });
      }
    }
  }

  info!(
    strategy = %config.conflict_resolution,
    tools = namespace.len(),
    conflicts = conflicts.len(),
    "aggregated backend tools"
  );

  Ok(Aggregation {
    namespace,
    conflicts,
  })
}

fn check_config(
  catalogs: &[BackendCatalog],
  config: &AggregationConfig,
) -> Result<(), AggregationError> {
  let mut seen = HashSet::new();
  for catalog in catalogs {
    if !seen.insert(catalog.backend.as_str()) {
      return Err(AggregationError::DuplicateBackend(catalog.backend.clone()));
    }
  }

  if config.conflict_resolution == ConflictStrategy::Priority {
    if config.priority_order.is_empty() {
      return Err(AggregationError::EmptyPriorityOrder);
    }
    for backend in &config.priority_order {
      if !seen.contains(backend.as_str()) {
        warn!(backend = %backend, "priorityOrder references an unknown backend");
      }
    }
  }

  Ok(())
}

fn collect_candidates(catalogs: &[BackendCatalog], config: &AggregationConfig) -> Vec<Candidate> {
  let mut candidates = Vec::new();

  for (backend_index, catalog) in catalogs.iter().enumerate() {
    let workload = config.workload(&catalog.backend);

    for tool in &catalog.tools {
      let tool_override = workload.and_then(|w| w.overrides.get(&tool.name));
      let name = tool_override
        .and_then(|o| o.name.clone())
        .unwrap_or_else(|| tool.name.clone());
      let description = tool_override
        .and_then(|o| o.description.clone())
        .unwrap_or_else(|| tool.description.clone());

      let advertised = !config.exclude_all_tools
        && workload.is_none_or(|w| {
          !w.exclude_all && (w.filter.is_empty() || w.filter.contains(&tool.name))
        });

      candidates.push(Candidate {
        backend_index,
        backend: catalog.backend.clone(),
        original_name: tool.name.clone(),
        name,
        description,
        input_schema: tool.input_schema.clone(),
        advertised,
      });
    }
  }

  candidates
}

fn resolve_by_prefix(
  name: &str,
  group: Vec<Candidate>,
  format: &str,
  namespace: &mut ToolNamespace,
  conflicts: &mut Vec<ConflictReport>,
) {
  let backends: Vec<String> = group.iter().map(|c| c.backend.clone()).collect();
  let mut names = BTreeMap::new();

  for candidate in group {
    let prefixed = apply_prefix(format, &candidate.backend, &candidate.name);

    if namespace.contains(&prefixed) {
      let holder = namespace
        .get(&prefixed)
        .map(|t| t.backend.clone())
        .unwrap_or_default();
      warn!(tool = %prefixed, backend = %candidate.backend, "prefixed tool name is already taken");
      conflicts.push(ConflictReport {
        name: prefixed,
        backends: vec![holder, candidate.backend],
        resolution: Resolution::Unresolved,
      });
      continue;
    }

    names.insert(candidate.backend.clone(), prefixed.clone());
    namespace.insert(candidate.into_tool(prefixed));
  }

  conflicts.push(ConflictReport {
    name: name.to_string(),
    backends,
    resolution: Resolution::Prefixed { names },
  });
}

/// Insert the highest-priority candidate and return its backend.
///
/// Backends absent from `priority_order` rank below every listed backend,
/// in declaration order.
fn resolve_by_priority(
  group: Vec<Candidate>,
  priority_order: &[String],
  namespace: &mut ToolNamespace,
) -> String {
  let rank = |c: &Candidate| {
    priority_order
      .iter()
      .position(|b| *b == c.backend)
      .unwrap_or(priority_order.len() + c.backend_index)
  };

  let mut winner: Option<Candidate> = None;
  for candidate in group {
    let better = winner.as_ref().is_none_or(|w| rank(&candidate) < rank(w));
    if better {
      winner = Some(candidate);
    }
  }

  match winner {
    Some(candidate) => {
      let backend = candidate.backend.clone();
      let name = candidate.name.clone();
      namespace.insert(candidate.into_tool(name));
      backend
    }
    None => String::new(),
  }
}

/// Render a prefix format for one tool.
fn apply_prefix(format: &str, backend: &str, tool: &str) -> String {
  let prefixed = format
    .replace("{workload}", backend)
    .replace("{backend}", backend);
  if prefixed.contains("{tool}") {
    prefixed.replace("{tool}", tool)
  } else {
    format!("{}{}", prefixed, tool)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_apply_prefix_formats() {
    assert_eq!(apply_prefix("{workload}_{tool}", "gh", "search"), "gh_search");
    assert_eq!(apply_prefix("{backend}.", "gh", "search"), "gh.search");
    assert_eq!(apply_prefix("{workload}__", "gh", "search"), "gh__search");
    assert_eq!(apply_prefix("{tool}@{workload}", "gh", "search"), "search@gh");
  }

  #[test]
  fn test_empty_priority_order_rejected() {
    let config = AggregationConfig {
      conflict_resolution: ConflictStrategy::Priority,
      ..Default::default()
    };
    assert_eq!(
      build(&[], &config),
      Err(AggregationError::EmptyPriorityOrder)
    );
  }

  #[test]
  fn test_duplicate_backend_rejected() {
    let catalogs = vec![
      BackendCatalog {
        backend: "a".to_string(),
        tools: vec![],
      },
      BackendCatalog {
        backend: "a".to_string(),
        tools: vec![],
      },
    ];
    assert_eq!(
      build(&catalogs, &AggregationConfig::default()),
      Err(AggregationError::DuplicateBackend("a".to_string()))
    );
  }
}
