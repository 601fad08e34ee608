// src/environment/mod.rs

//! Isolated execution environments
//!
//! The orchestrator runs every build inside an environment obtained from an
//! `IsolationService`. Real deployments back this with containers; the
//! crate ships `HostEnvironment`, a directory-per-task implementation for
//! local use and testing.
//!
//! Every method failure is an infrastructure failure and aborts the run,
//! except `publish_artifact` returning `Error::Publish`, which fails only
//! the task being published.

mod host;

pub use host::HostEnvironment;

use crate::error::Result;
use crate::plan::BuildTarget;
use crate::redirect::Invocation;
use crate::result::LogEntry;
use crate::toolchain::Toolchain;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Opaque handle to one environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvHandle(pub String);

impl std::fmt::Display for EnvHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A build procedure invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub argv: Vec<String>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
}

impl BuildCommand {
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// What a build run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub exit_code: i32,
    /// Process-tree events, one per observed process
    ///
    /// The first entry is the build procedure itself. Services that see
    /// further into the tree append an entry for each child process they
    /// observed, oldest first.
    pub log: Vec<LogEntry>,
}

/// Provider of one isolated environment per build task
pub trait IsolationService: Send + Sync {
    /// Create a fresh environment for `target`
    fn create(&self, target: &BuildTarget, toolchain: &Toolchain) -> Result<EnvHandle>;

    /// Audit directory as seen from inside the environment
    fn audit_dir(&self, env: &EnvHandle) -> Result<PathBuf>;

    /// Place an executable first on the environment's tool search path
    fn install_tool(&self, env: &EnvHandle, name: &str, executable: &[u8]) -> Result<()>;

    /// Install published artifacts the build depends on
    fn install_artifacts(&self, env: &EnvHandle, packages: &[String]) -> Result<()>;

    /// Run the build procedure and capture its output
    fn run(&self, env: &EnvHandle, command: &BuildCommand) -> Result<RunOutput>;

    /// Invocations recorded by interceptors, oldest first
    fn collect_audit(&self, env: &EnvHandle) -> Result<Vec<Invocation>>;

    /// Publish the built artifacts to the shared repository
    fn publish_artifact(&self, env: &EnvHandle, packages: &[String]) -> Result<()>;

    /// Tear the environment down
    fn destroy(&self, env: &EnvHandle) -> Result<()>;
}
