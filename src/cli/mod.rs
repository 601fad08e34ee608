// src/cli/mod.rs
//! CLI definitions for toolsweep
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! - `compile` - Metadata to build plan
//! - `run` - Build a plan against one toolchain
//! - `redirect` - Write interceptors for external environments
//! - `classify` - Re-run error classification over stored results
//! - `summary` - Counts per status and error category

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "toolsweep")]
#[command(version)]
#[command(about = "Build a package set against a toolchain and classify what breaks", long_about = None)]
pub struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile package metadata into a build plan
    Compile {
        /// Package metadata (JSON list of package records)
        #[arg(short, long)]
        metadata: PathBuf,

        /// Sweep configuration
        #[arg(short, long, default_value = "toolsweep.toml")]
        config: PathBuf,

        /// Where to write the plan
        #[arg(short, long, default_value = "plan.json")]
        out: PathBuf,

        /// Also write a ninja build file
        #[arg(long)]
        ninja: Option<PathBuf>,

        /// Toolchain name substituted into ninja commands
        #[arg(long, default_value = "native")]
        ninja_toolchain: String,
    },

    /// Build every target of a plan with one toolchain
    Run {
        /// Build plan produced by `compile`
        #[arg(short, long, default_value = "plan.json")]
        plan: PathBuf,

        /// Toolchain description
        #[arg(short, long)]
        toolchain: PathBuf,

        /// Sweep configuration
        #[arg(short, long, default_value = "toolsweep.toml")]
        config: PathBuf,

        /// Builds in flight (overrides run.concurrency)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Interceptor stub (overrides run.shim_path)
        #[arg(long)]
        shim: Option<PathBuf>,

        /// Keep per-task environment directories
        #[arg(long)]
        keep_envs: bool,
    },

    /// Write one interceptor per redirect rule of a toolchain
    Redirect {
        /// Toolchain description
        #[arg(short, long)]
        toolchain: PathBuf,

        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Interceptor stub (default: toolsweep-shim next to this binary)
        #[arg(long)]
        shim: Option<PathBuf>,

        /// Where interceptors record invocations
        #[arg(long, default_value = "/tmp")]
        audit_dir: PathBuf,
    },

    /// Re-classify stored build results
    Classify {
        /// Directory of per-task result files
        results_dir: PathBuf,

        /// Error pattern file (default: built-in rules)
        #[arg(short, long)]
        patterns: Option<PathBuf>,
    },

    /// Summarize stored build results
    Summary {
        /// Directory of per-task result files
        results_dir: PathBuf,
    },
}
