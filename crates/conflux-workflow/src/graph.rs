use std::collections::{BTreeSet, HashMap};

use crate::error::WorkflowError;

/// Dependency graph over step IDs.
///
/// Steps keep their declaration order; every ordering decision falls back on
/// it, so traversal is deterministic.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Step IDs in declaration order.
  order: Vec<String>,
  /// step_id -> steps that depend on it.
  adjacency: HashMap<String, Vec<String>>,
  /// step_id -> steps it depends on.
  reverse_adjacency: HashMap<String, Vec<String>>,
}

impl Graph {
  /// Build a graph from step IDs and `(upstream, downstream)` edges.
  pub fn new(step_ids: &[String], edges: &[(String, String)]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for id in step_ids {
      adjacency.entry(id.clone()).or_default();
      reverse_adjacency.entry(id.clone()).or_default();
    }

    for (from, to) in edges {
      let downstream = adjacency.entry(from.clone()).or_default();
      if !downstream.contains(to) {
        downstream.push(to.clone());
      }
      let upstream = reverse_adjacency.entry(to.clone()).or_default();
      if !upstream.contains(from) {
        upstream.push(from.clone());
      }
    }

    Self {
      order: step_ids.to_vec(),
      adjacency,
      reverse_adjacency,
    }
  }

  /// Steps with no dependencies.
  pub fn entry_points(&self) -> Vec<&str> {
    self
      .order
      .iter()
      .filter(|id| self.upstream(id).is_empty())
      .map(String::as_str)
      .collect()
  }

  /// Steps that depend on `step_id`.
  pub fn downstream(&self, step_id: &str) -> &[String] {
    self
      .adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Steps `step_id` depends on.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Topological order, preferring declaration order among ready steps.
  ///
  /// # Errors
  /// Returns [`WorkflowError::Cycle`] naming every step that could not be
  /// ordered, sorted by ID.
  pub fn topological_order(&self) -> Result<Vec<String>, WorkflowError> {
    let position: HashMap<&str, usize> = self
      .order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.as_str(), i))
      .collect();

    let mut in_degree: HashMap<&str, usize> = self
      .order
      .iter()
      .map(|id| (id.as_str(), self.upstream(id).len()))
      .collect();

    let mut ready: BTreeSet<usize> = self
      .order
      .iter()
      .enumerate()
      .filter(|(_, id)| in_degree.get(id.as_str()) == Some(&0))
      .map(|(i, _)| i)
      .collect();

    let mut sorted = Vec::with_capacity(self.order.len());
    while let Some(index) = ready.pop_first() {
      let id = &self.order[index];
      sorted.push(id.clone());

      for next in self.downstream(id) {
        if let Some(degree) = in_degree.get_mut(next.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            if let Some(&i) = position.get(next.as_str()) {
              ready.insert(i);
            }
          }
        }
      }
    }

    if sorted.len() < self.order.len() {
      let mut steps: Vec<String> = in_degree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(id, _)| id.to_string())
        .collect();
      steps.sort();
      return Err(WorkflowError::Cycle { steps });
    }

    Ok(sorted)
  }
}
