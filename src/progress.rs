// src/progress.rs

//! Run progress reporting
//!
//! The orchestrator reports task starts and completions through the
//! `RunObserver` trait. Implementations:
//! - `CliProgress`: indicatif progress bar over completed tasks
//! - `LogProgress`: periodic tracing lines
//! - `SilentProgress`: counts only, for tests and scripted use

use crate::result::{BuildResult, TaskStatus};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Receives task lifecycle events from a run
///
/// Called from the orchestrator's scheduling loop, never concurrently.
pub trait RunObserver: Send + Sync {
    /// A task left the ready queue and is about to build
    fn task_started(&self, _name: &str) {}

    /// A task reached a final state (including Blocked and Cancelled)
    fn task_finished(&self, result: &BuildResult);

    /// The run is over
    fn run_finished(&self) {}
}

/// Counting observer with no output
#[derive(Debug, Default)]
pub struct SilentProgress {
    started: AtomicU64,
    finished: AtomicU64,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }
}

impl RunObserver for SilentProgress {
    fn task_started(&self, _name: &str) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn task_finished(&self, _result: &BuildResult) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }
}

/// Logs progress to tracing at info level
///
/// Only logs every `log_interval` completions to avoid spam on large runs.
#[derive(Debug)]
pub struct LogProgress {
    total: u64,
    finished: AtomicU64,
    log_interval: u64,
}

impl LogProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            finished: AtomicU64::new(0),
            log_interval: std::cmp::max(1, total / 10),
        }
    }
}

impl RunObserver for LogProgress {
    fn task_finished(&self, _result: &BuildResult) {
        let done = self.finished.fetch_add(1, Ordering::Relaxed) + 1;
        if self.total > 0 && (done % self.log_interval == 0 || done == self.total) {
            info!("builds: {}% ({}/{})", done * 100 / self.total, done, self.total);
        }
    }
}

/// Progress bar over completed tasks
pub struct CliProgress {
    bar: ProgressBar,
    failed: AtomicU64,
}

impl CliProgress {
    pub fn new(total: u64, toolchain: &str) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(format!("building with {}", toolchain));
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            failed: AtomicU64::new(0),
        }
    }
}

impl RunObserver for CliProgress {
    fn task_started(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn task_finished(&self, result: &BuildResult) {
        if matches!(result.status, TaskStatus::Failed) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.bar
                .println(format!("  failed: {} ({:.1}s)", result.name, result.time));
        }
        self.bar.inc(1);
    }

    fn run_finished(&self) {
        let failed = self.failed.load(Ordering::Relaxed);
        self.bar
            .finish_with_message(format!("done, {} failed", failed));
    }
}
