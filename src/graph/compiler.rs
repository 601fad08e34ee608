// src/graph/compiler.rs

//! Graph compiler: package records in, build plan out
//!
//! The compiler resolves every dependency name through the `ProvidesMap`,
//! builds the dependency graph, removes the edges named by configured
//! cycle-break rules, and emits a `BuildPlan`.
//!
//! Cycles with no configured rule abort compilation. Choosing an edge to
//! drop changes what a package is built against, so that choice belongs in
//! reviewed configuration.

use super::provides::{ProvidesMap, ResolutionError};
use super::DependencyGraph;
use crate::error::{Error, Result};
use crate::metadata::MetadataStore;
use crate::plan::{BuildPlan, BuildTarget, DEFAULT_BUILD_COMMAND};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Drop the edge "`dependent` needs `dependency`" if it lies on a cycle
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleBreakRule {
    pub dependent: String,
    pub dependency: String,
}

impl CycleBreakRule {
    pub fn new(dependent: &str, dependency: &str) -> Self {
        Self {
            dependent: dependent.to_string(),
            dependency: dependency.to_string(),
        }
    }
}

/// Configuration consumed by the compiler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Virtual name -> concrete package, shadowing declared provides
    #[serde(default)]
    pub provides: BTreeMap<String, String>,
    #[serde(default)]
    pub cycle_breaks: Vec<CycleBreakRule>,
    /// Build identities never planned
    #[serde(default)]
    pub exclude: BTreeSet<String>,
}

impl Overrides {
    pub fn validate(&self) -> Result<()> {
        for rule in &self.cycle_breaks {
            if rule.dependent == rule.dependency {
                return Err(Error::Config(format!(
                    "cycle-break rule names '{}' on both ends",
                    rule.dependent
                )));
            }
        }
        Ok(())
    }
}

/// Compiles package metadata into a build plan
#[derive(Debug, Clone)]
pub struct Compiler {
    overrides: Overrides,
    build_command: Vec<String>,
}

impl Compiler {
    pub fn new(overrides: Overrides) -> Self {
        Self {
            overrides,
            build_command: DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Set the argv template stored on every target
    pub fn with_build_command(mut self, command: Vec<String>) -> Self {
        self.build_command = command;
        self
    }

    pub fn compile(&self, store: &MetadataStore) -> Result<BuildPlan> {
        self.overrides.validate()?;
        if self.build_command.is_empty() {
            return Err(Error::Config("build command is empty".to_string()));
        }

        for excluded in &self.overrides.exclude {
            if store.get(excluded).is_none() {
                warn!(package = %excluded, "excluded package is not in the metadata");
            }
        }

        let provides = ProvidesMap::build(store, &self.overrides.provides)?;
        let mut graph = DependencyGraph::new();
        let mut unresolved: BTreeMap<String, Vec<ResolutionError>> = BTreeMap::new();

        for record in store.iter() {
            let identity = record.identity();
            if self.overrides.exclude.contains(identity) {
                debug!(package = %identity, "skipping excluded package");
                continue;
            }
            graph.add_node(identity);

            for dependency in record.all_dependencies() {
                let resolved = provides.resolve(identity, dependency).and_then(|provider| {
                    if self.overrides.exclude.contains(&provider) {
                        Err(ResolutionError::Excluded {
                            requester: identity.to_string(),
                            dependency: dependency.to_string(),
                            provider,
                        })
                    } else {
                        Ok(provider)
                    }
                });

                match resolved {
                    Ok(provider) if provider == identity => {
                        debug!(package = %identity, dependency, "dropping self-dependency");
                    }
                    Ok(provider) => graph.add_edge(&provider, identity),
                    Err(e) => {
                        warn!(package = %identity, error = %e, "dependency resolution failed");
                        unresolved.entry(identity.to_string()).or_default().push(e);
                    }
                }
            }
        }

        let broken_edges = self.break_cycles(&mut graph)?;

        let targets = store
            .iter()
            .filter(|record| graph.contains(record.identity()))
            .map(|record| {
                let identity = record.identity();
                BuildTarget {
                    name: identity.to_string(),
                    names: record.names.clone(),
                    source: record.source.clone(),
                    predecessors: graph.predecessors(identity).cloned().unwrap_or_default(),
                    command: self.build_command.clone(),
                    unresolved: unresolved.remove(identity).unwrap_or_default(),
                }
            })
            .collect();

        let plan = BuildPlan::new(targets, broken_edges);
        info!(
            targets = plan.len(),
            edges = graph.edge_count(),
            broken = plan.broken_edges().len(),
            unresolved = plan.targets().iter().filter(|t| !t.is_resolved()).count(),
            "compiled build plan"
        );
        Ok(plan)
    }

    /// Remove rule-named edges from every cycle until the graph is acyclic
    fn break_cycles(&self, graph: &mut DependencyGraph) -> Result<Vec<CycleBreakRule>> {
        let mut broken = BTreeSet::new();

        loop {
            let cycles = graph.cycles();
            if cycles.is_empty() {
                break;
            }

            for members in cycles {
                let in_cycle: BTreeSet<&str> = members.iter().map(String::as_str).collect();
                let applicable: Vec<&CycleBreakRule> = self
                    .overrides
                    .cycle_breaks
                    .iter()
                    .filter(|rule| {
                        in_cycle.contains(rule.dependent.as_str())
                            && in_cycle.contains(rule.dependency.as_str())
                            && graph.has_edge(&rule.dependency, &rule.dependent)
                    })
                    .collect();

                if applicable.is_empty() {
                    error!(members = ?members, "no cycle-break rule applies");
                    return Err(Error::UnbreakableCycle { members });
                }

                for rule in applicable {
                    graph.remove_edge(&rule.dependency, &rule.dependent);
                    info!(
                        dependent = %rule.dependent,
                        dependency = %rule.dependency,
                        "broke dependency cycle"
                    );
                    broken.insert(rule.clone());
                }
            }
        }

        Ok(broken.into_iter().collect())
    }
}

/// Compile records with the default build command
pub fn compile(store: &MetadataStore, overrides: &Overrides) -> Result<BuildPlan> {
    Compiler::new(overrides.clone()).compile(store)
}
