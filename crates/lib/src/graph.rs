//! Dependency graph resolution.
//!
//! Builds a directed graph over a manifest set (edges run dependency →
//! dependent) and produces the total build order. Ordering is Kahn's
//! algorithm with a lexicographic ready set, so the order is deterministic
//! across runs regardless of input file order.
//!
//! Resolution failures (`CyclicDependency`, `UnresolvedDependency`) are
//! fatal before anything is fetched or built.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::manifest::ManifestSet;

/// Errors from dependency resolution.
#[derive(Debug, Error)]
pub enum GraphError {
  /// The dependency relation contains a cycle; the chain names its members.
  #[error("dependency cycle: {chain}")]
  CyclicDependency { chain: String },

  /// A unit references a name absent from the manifest set.
  #[error("unit '{unit}' depends on '{dependency}', which is not defined")]
  UnresolvedDependency { unit: String, dependency: String },

  /// A requested unit is not in the manifest set.
  #[error("unknown unit '{name}'")]
  UnknownUnit { name: String },
}

/// The resolved dependency graph over a manifest set.
pub struct DependencyGraph {
  graph: DiGraph<String, ()>,
  nodes: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
  /// Build the graph, validating that every referenced dependency exists.
  pub fn from_units(units: &ManifestSet) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = BTreeMap::new();

    for unit in units.iter() {
      let idx = graph.add_node(unit.name.clone());
      nodes.insert(unit.name.clone(), idx);
    }

    for unit in units.iter() {
      let dependent = nodes[&unit.name];
      for dep in &unit.dependencies {
        let Some(&dep_idx) = nodes.get(dep) else {
          return Err(GraphError::UnresolvedDependency {
            unit: unit.name.clone(),
            dependency: dep.clone(),
          });
        };
        // Edge from dependency to dependent.
        graph.add_edge(dep_idx, dependent, ());
      }
    }

    debug!(units = nodes.len(), edges = graph.edge_count(), "built dependency graph");
    Ok(Self { graph, nodes })
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.nodes.contains_key(name)
  }

  /// Total build order: every unit appears after all of its dependencies.
  ///
  /// Ties among units with no remaining ordering constraint break
  /// lexicographically by name.
  pub fn resolve_order(&self) -> Result<Vec<String>, GraphError> {
    let mut in_degree = self.in_degrees();
    let mut ready: BTreeSet<String> = in_degree
      .iter()
      .filter(|(_, &deg)| deg == 0)
      .map(|(name, _)| name.clone())
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());

    while let Some(name) = ready.pop_first() {
      order.push(name.clone());

      let idx = self.nodes[&name];
      for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        let dependent = &self.graph[neighbor];
        let deg = in_degree.get_mut(dependent).expect("node tracked in in_degree");
        *deg -= 1;
        if *deg == 0 {
          ready.insert(dependent.clone());
        }
      }
    }

    if order.len() != self.nodes.len() {
      let remaining: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg > 0)
        .map(|(name, _)| name.as_str())
        .collect();
      return Err(GraphError::CyclicDependency {
        chain: self.cycle_chain(&remaining),
      });
    }

    Ok(order)
  }

  /// Format one cycle among the unresolvable remainder as `a -> b -> a`
  /// (read: a depends on b, b depends on a).
  fn cycle_chain(&self, remaining: &BTreeSet<&str>) -> String {
    let start: &str = remaining.first().expect("cycle implies remaining nodes");
    let mut chain: Vec<&str> = vec![start];
    let mut current = start;

    loop {
      let idx = self.nodes[current];
      // Follow the lexicographically smallest dependency still in the knot.
      let next = self
        .graph
        .neighbors_directed(idx, Direction::Incoming)
        .map(|dep| self.graph[dep].as_str())
        .filter(|dep| remaining.contains(dep))
        .min()
        .expect("every remaining node keeps an unresolved dependency");

      if let Some(pos) = chain.iter().position(|&n| n == next) {
        chain.push(next);
        return chain[pos..].join(" -> ");
      }
      chain.push(next);
      current = next;
    }
  }

  /// Direct dependencies of a unit.
  pub fn direct_dependencies(&self, name: &str) -> Vec<String> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };
    self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep| self.graph[dep].clone())
      .collect()
  }

  /// Direct dependents of a unit (units that list it as a dependency).
  pub fn direct_dependents(&self, name: &str) -> Vec<String> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };
    self
      .graph
      .neighbors_directed(idx, Direction::Outgoing)
      .map(|dep| self.graph[dep].clone())
      .collect()
  }

  /// The number of dependencies per unit.
  pub fn in_degrees(&self) -> BTreeMap<String, usize> {
    self
      .nodes
      .iter()
      .map(|(name, &idx)| {
        let deg = self.graph.neighbors_directed(idx, Direction::Incoming).count();
        (name.clone(), deg)
      })
      .collect()
  }

  /// All transitive dependents of a unit, excluding the unit itself.
  ///
  /// These are the units that can never build once `name` has failed.
  pub fn dependents_closure(&self, name: &str) -> BTreeSet<String> {
    self.closure(name, Direction::Outgoing)
  }

  /// A unit plus all of its transitive dependencies.
  pub fn dependency_closure(&self, name: &str) -> Result<BTreeSet<String>, GraphError> {
    if !self.nodes.contains_key(name) {
      return Err(GraphError::UnknownUnit { name: name.to_string() });
    }
    let mut closure = self.closure(name, Direction::Incoming);
    closure.insert(name.to_string());
    Ok(closure)
  }

  fn closure(&self, name: &str, direction: Direction) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let Some(&start) = self.nodes.get(name) else {
      return seen;
    };

    let mut queue: VecDeque<NodeIndex> = self.graph.neighbors_directed(start, direction).collect();
    while let Some(idx) = queue.pop_front() {
      if seen.insert(self.graph[idx].clone()) {
        queue.extend(self.graph.neighbors_directed(idx, direction));
      }
    }
    seen
  }
}
