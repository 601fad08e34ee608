// src/plan.rs

//! Build plan representation
//!
//! A build plan is the serializable output of the graph compiler: a list
//! of build targets, each with its resolved predecessor set and the build
//! command to run. The orchestrator consumes it directly; `to_ninja()`
//! renders the same plan for a generic parallel build-file executor.

use crate::error::{Error, Result};
use crate::graph::{CycleBreakRule, DependencyGraph, ResolutionError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Argv used when no build command is configured
pub const DEFAULT_BUILD_COMMAND: &[&str] = &[
    "makepkg",
    "--syncdeps",
    "--noconfirm",
    "--nocolor",
    "--noprogressbar",
    "--nocheck",
];

/// One buildable node of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    /// Build identity
    pub name: String,
    /// Artifact names the build produces
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Build identities that must succeed first
    #[serde(default)]
    pub predecessors: BTreeSet<String>,
    /// Argv template; `{name}`, `{source}` and `{toolchain}` are expanded
    pub command: Vec<String>,
    /// Dependencies that failed to resolve; such a target never runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<ResolutionError>,
}

impl BuildTarget {
    pub fn is_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Expand placeholders in the command template
    pub fn expand_command(&self, toolchain: &str) -> Vec<String> {
        let source = self
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.name.clone());

        self.command
            .iter()
            .map(|arg| {
                arg.replace("{name}", &self.name)
                    .replace("{source}", &source)
                    .replace("{toolchain}", toolchain)
            })
            .collect()
    }
}

/// The acyclic set of targets produced by the compiler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    targets: Vec<BuildTarget>,
    /// Edges removed by cycle-break rules
    #[serde(default)]
    broken_edges: Vec<CycleBreakRule>,
}

impl BuildPlan {
    pub fn new(mut targets: Vec<BuildTarget>, broken_edges: Vec<CycleBreakRule>) -> Self {
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            targets,
            broken_edges,
        }
    }

    /// Targets sorted by name
    pub fn targets(&self) -> &[BuildTarget] {
        &self.targets
    }

    pub fn target(&self, name: &str) -> Option<&BuildTarget> {
        self.targets
            .binary_search_by(|t| t.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.targets[idx])
    }

    pub fn broken_edges(&self) -> &[CycleBreakRule] {
        &self.broken_edges
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Target name -> predecessor set
    pub fn predecessor_map(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.targets
            .iter()
            .map(|t| (t.name.clone(), t.predecessors.clone()))
            .collect()
    }

    pub fn graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for target in &self.targets {
            graph.add_node(&target.name);
            for pred in &target.predecessors {
                graph.add_edge(pred, &target.name);
            }
        }
        graph
    }

    /// One valid build order
    pub fn build_order(&self) -> Result<Vec<String>> {
        self.graph().topological_sort()
    }

    /// Check names are unique, predecessors exist and the plan is acyclic
    pub fn validate(&self) -> Result<()> {
        let names: BTreeSet<&str> = self.targets.iter().map(|t| t.name.as_str()).collect();
        if names.len() != self.targets.len() {
            return Err(Error::Config("build plan has duplicate targets".to_string()));
        }

        for target in &self.targets {
            if target.command.is_empty() {
                return Err(Error::Config(format!("target '{}' has no build command", target.name)));
            }
            if let Some(missing) = target
                .predecessors
                .iter()
                .find(|p| !names.contains(p.as_str()))
            {
                return Err(Error::Config(format!(
                    "target '{}' depends on unknown target '{}'",
                    target.name, missing
                )));
            }
        }

        self.build_order().map(|_| ())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a plan
    pub fn from_json(content: &str) -> Result<Self> {
        let plan: BuildPlan = serde_json::from_str(content)?;
        let plan = Self::new(plan.targets, plan.broken_edges);
        plan.validate()?;
        Ok(plan)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Render the plan as a ninja build file
    ///
    /// Each target writes `markers/<name>.json` once its command succeeds,
    /// with its predecessors' markers as implicit inputs. Targets with
    /// unresolved dependencies get an edge that always fails, so `ninja -k 0`
    /// skips their dependents just as the orchestrator would.
    pub fn to_ninja(&self, toolchain: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# toolsweep build plan for toolchain {}", toolchain);
        let _ = writeln!(out, "rule build");
        let _ = writeln!(out, "  command = $cmd && touch $out");
        let _ = writeln!(out, "  description = build $target");
        let _ = writeln!(out);
        let _ = writeln!(out, "rule unresolved");
        let _ = writeln!(out, "  command = echo $reason >&2 && false");
        let _ = writeln!(out, "  description = unresolved $target");

        for target in &self.targets {
            let _ = writeln!(out);
            let rule = if target.is_resolved() { "build" } else { "unresolved" };
            let _ = write!(out, "build {}: {}", ninja_path(&marker(&target.name)), rule);
            if !target.predecessors.is_empty() {
                let _ = write!(out, " |");
                for pred in &target.predecessors {
                    let _ = write!(out, " {}", ninja_path(&marker(pred)));
                }
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "  target = {}", ninja_value(&target.name));

            if target.is_resolved() {
                let argv: Vec<String> = target
                    .expand_command(toolchain)
                    .iter()
                    .map(|arg| shell_quote(arg))
                    .collect();
                let _ = writeln!(out, "  cmd = {}", ninja_value(&argv.join(" ")));
            } else {
                let reasons: Vec<String> =
                    target.unresolved.iter().map(|e| e.to_string()).collect();
                let _ = writeln!(
                    out,
                    "  reason = {}",
                    ninja_value(&shell_quote(&reasons.join("; ")))
                );
            }
        }

        out
    }
}

fn marker(name: &str) -> String {
    format!("markers/{}.json", name)
}

fn ninja_value(value: &str) -> String {
    value.replace('$', "$$")
}

fn ninja_path(path: &str) -> String {
    ninja_value(path).replace(' ', "$ ").replace(':', "$:")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
