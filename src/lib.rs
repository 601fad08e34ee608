// src/lib.rs

//! toolsweep: mass-rebuild a package set against a toolchain under test
//!
//! # Architecture
//!
//! - Graph compiler: package metadata plus overrides to an acyclic build plan
//! - Orchestrator: bounded parallel builds with failure propagation
//! - Tool redirector: interceptors that steer hard-coded native tools
//!   into the toolchain and record that they were used
//! - Diagnostic classifier: ordered regex rules over build logs

pub mod artifacts;
pub mod config;
pub mod diagnostics;
pub mod environment;
mod error;
pub mod graph;
pub mod metadata;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod redirect;
pub mod result;
pub mod toolchain;

pub use artifacts::ArtifactRepository;
pub use config::SweepConfig;
pub use diagnostics::{CaptureCount, Classifier, Diagnostics, ErrorPattern};
pub use environment::{BuildCommand, EnvHandle, HostEnvironment, IsolationService, RunOutput};
pub use error::{Error, Result};
pub use graph::{compile, Compiler, CycleBreakRule, DependencyGraph, Overrides, ResolutionError};
pub use metadata::{MetadataStore, PackageRecord};
pub use orchestrator::Orchestrator;
pub use plan::{BuildPlan, BuildTarget};
pub use progress::{CliProgress, LogProgress, RunObserver, SilentProgress};
pub use redirect::{Invocation, RedirectAction, RedirectConfig, RedirectRule, ToolRedirector};
pub use result::{load_results, BuildResult, LogEntry, LogKind, RunReport, RunSummary, TaskStatus};
pub use toolchain::Toolchain;
