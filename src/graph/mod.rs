// src/graph/mod.rs

//! Package dependency graph for build ordering
//!
//! Nodes are build identities. An edge from `dependency` to `dependent`
//! means the dependency must be built and published before the dependent
//! can build.
//!
//! # Example
//!
//! ```ignore
//! use toolsweep::graph::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_edge("linux-headers", "glibc");
//! graph.add_edge("glibc", "binutils");
//!
//! let order = graph.topological_sort()?;
//! // order: ["linux-headers", "glibc", "binutils"]
//! let needed = graph.transitive_dependencies("binutils");
//! // needed: {"glibc", "linux-headers"}
//! ```
//!
//! # Circular Dependencies
//!
//! Cycles are never cut automatically here. `cycles()` reports every
//! strongly connected component with more than one member and the
//! compiler decides, from configured rules, which edges to remove.

mod compiler;
mod provides;

pub use compiler::{compile, Compiler, CycleBreakRule, Overrides};
pub use provides::{ProvidesMap, ResolutionError};

use crate::error::{Error, Result};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// A directed graph of build identities
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Key: package, Value: packages it depends on
    predecessors: BTreeMap<String, BTreeSet<String>>,
    /// Key: package, Value: packages depending on it
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a node exists
    pub fn add_node(&mut self, name: &str) {
        self.predecessors.entry(name.to_string()).or_default();
        self.dependents.entry(name.to_string()).or_default();
    }

    /// Record that `dependent` needs `dependency`
    ///
    /// Self edges are ignored.
    pub fn add_edge(&mut self, dependency: &str, dependent: &str) {
        if dependency == dependent {
            return;
        }
        self.add_node(dependency);
        self.add_node(dependent);

        if let Some(preds) = self.predecessors.get_mut(dependent) {
            preds.insert(dependency.to_string());
        }
        if let Some(deps) = self.dependents.get_mut(dependency) {
            deps.insert(dependent.to_string());
        }
    }

    /// Remove an edge, returning whether it existed
    pub fn remove_edge(&mut self, dependency: &str, dependent: &str) -> bool {
        let removed = self
            .predecessors
            .get_mut(dependent)
            .is_some_and(|preds| preds.remove(dependency));
        if let Some(deps) = self.dependents.get_mut(dependency) {
            deps.remove(dependent);
        }
        removed
    }

    pub fn has_edge(&self, dependency: &str, dependent: &str) -> bool {
        self.predecessors
            .get(dependent)
            .is_some_and(|preds| preds.contains(dependency))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predecessors.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.predecessors.len()
    }

    pub fn edge_count(&self) -> usize {
        self.predecessors.values().map(BTreeSet::len).sum()
    }

    /// Direct dependencies of a package
    pub fn predecessors(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.predecessors.get(name)
    }

    /// Packages that directly depend on a package
    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(name)
    }

    /// All edges as (dependency, dependent) pairs, sorted
    pub fn edges(&self) -> BTreeSet<(String, String)> {
        self.predecessors
            .iter()
            .flat_map(|(dependent, preds)| {
                preds
                    .iter()
                    .map(move |dep| (dep.clone(), dependent.clone()))
            })
            .collect()
    }

    /// Perform topological sort using Kahn's algorithm
    ///
    /// Returns packages in build order (dependencies first). Ties are
    /// broken by name so the order is stable. A remaining cycle is
    /// reported as `UnbreakableCycle` naming the unsorted nodes.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degrees: BTreeMap<&str, usize> = self
            .predecessors
            .iter()
            .map(|(name, preds)| (name.as_str(), preds.len()))
            .collect();

        let mut queue: VecDeque<&str> = in_degrees
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::with_capacity(self.predecessors.len());
        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());

            for dependent in self.dependents.get(node).into_iter().flatten() {
                if let Some(deg) = in_degrees.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != self.predecessors.len() {
            let sorted: BTreeSet<&String> = order.iter().collect();
            let members = self
                .predecessors
                .keys()
                .filter(|name| !sorted.contains(name))
                .cloned()
                .collect();
            return Err(Error::UnbreakableCycle { members });
        }

        Ok(order)
    }

    /// Strongly connected components with more than one member
    ///
    /// Each component is sorted and the list of components is sorted by
    /// first member, so the result does not depend on insertion order.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for name in self.predecessors.keys() {
            index.insert(name, graph.add_node(name));
        }
        for (dependent, preds) in &self.predecessors {
            for dep in preds {
                if let (Some(&from), Some(&to)) = (index.get(dep.as_str()), index.get(dependent.as_str())) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let mut components: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut members: Vec<String> =
                    component.into_iter().map(|idx| graph[idx].to_string()).collect();
                members.sort();
                members
            })
            .collect();
        components.sort();
        components
    }

    /// All packages a package transitively depends on
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);

        while let Some(current) = queue.pop_front() {
            for dependency in self.predecessors.get(current).into_iter().flatten() {
                if result.insert(dependency.clone()) {
                    queue.push_back(dependency);
                }
            }
        }

        result
    }
}
