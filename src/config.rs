// src/config.rs

//! Sweep configuration (`toolsweep.toml`)
//!
//! ```toml
//! [plan]
//! build_command = ["makepkg", "--syncdeps", "--noconfirm"]
//! exclude = ["linux-firmware"]
//!
//! [provides]
//! sh = "bash"
//!
//! [[cycle_break]]
//! dependent = "glibc"
//! dependency = "gcc"
//!
//! [run]
//! concurrency = 8
//! results_dir = "results"
//! repository_dir = "repo"
//! work_dir = "work"
//! shim_path = "/usr/lib/toolsweep/toolsweep-shim"
//! error_patterns = "patterns.toml"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use crate::diagnostics::Classifier;
use crate::error::{Error, Result};
use crate::graph::{Compiler, CycleBreakRule, Overrides};
use crate::plan::DEFAULT_BUILD_COMMAND;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Compile-time settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSection {
    /// Argv template for every build
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,

    /// Build identities never planned
    #[serde(default)]
    pub exclude: BTreeSet<String>,
}

impl Default for PlanSection {
    fn default() -> Self {
        Self {
            build_command: default_build_command(),
            exclude: BTreeSet::new(),
        }
    }
}

/// Run-time settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSection {
    /// Builds in flight; available parallelism when unset
    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Parent of the artifact repositories, one per toolchain and run
    #[serde(default = "default_repository_dir")]
    pub repository_dir: PathBuf,

    /// Parent of per-task environments, grouped by toolchain and run
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Prebuilt interceptor stub
    #[serde(default)]
    pub shim_path: Option<PathBuf>,

    /// Error pattern file; the built-in rule set when unset
    #[serde(default)]
    pub error_patterns: Option<PathBuf>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            concurrency: None,
            results_dir: default_results_dir(),
            repository_dir: default_repository_dir(),
            work_dir: default_work_dir(),
            shim_path: None,
            error_patterns: None,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub plan: PlanSection,

    /// Virtual name -> concrete producing name
    #[serde(default)]
    pub provides: BTreeMap<String, String>,

    #[serde(default, rename = "cycle_break")]
    pub cycle_breaks: Vec<CycleBreakRule>,

    #[serde(default)]
    pub run: RunSection,
}

impl SweepConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SweepConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, resolving relative paths against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.plan.build_command.is_empty() {
            return Err(Error::Config("plan.build_command is empty".to_string()));
        }
        if self.run.concurrency == Some(0) {
            return Err(Error::Config("run.concurrency must be at least 1".to_string()));
        }
        if let Some((name, _)) = self.provides.iter().find(|(k, v)| k.is_empty() || v.is_empty()) {
            return Err(Error::Config(format!("empty name in provides override '{}'", name)));
        }
        self.overrides().validate()
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.run.results_dir);
        resolve(&mut self.run.repository_dir);
        resolve(&mut self.run.work_dir);
        if let Some(path) = self.run.shim_path.as_mut() {
            resolve(path);
        }
        if let Some(path) = self.run.error_patterns.as_mut() {
            resolve(path);
        }
    }

    /// Compiler overrides described by this file
    pub fn overrides(&self) -> Overrides {
        Overrides {
            provides: self.provides.clone(),
            cycle_breaks: self.cycle_breaks.clone(),
            exclude: self.plan.exclude.clone(),
        }
    }

    /// Compiler configured from this file
    pub fn compiler(&self) -> Compiler {
        Compiler::new(self.overrides()).with_build_command(self.plan.build_command.clone())
    }

    /// Configured concurrency, or the machine's available parallelism
    pub fn concurrency(&self) -> usize {
        self.run.concurrency.unwrap_or_else(num_cpus)
    }

    /// Configured classifier, or the built-in rule set
    pub fn classifier(&self) -> Result<Classifier> {
        match &self.run.error_patterns {
            Some(path) => Classifier::load(path),
            None => Classifier::default_rules(),
        }
    }
}

fn default_build_command() -> Vec<String> {
    DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_repository_dir() -> PathBuf {
    PathBuf::from("repository")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}
