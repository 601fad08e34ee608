// src/result.rs

//! Build results and run reports
//!
//! One `BuildResult` is produced per task when it reaches a final state.
//! Results are persisted as one JSON file per task:
//!
//! ```json
//! {"name": "zlib", "toolchain": "x86_64-musl", "status": "failed",
//!  "time": 12.5, "return_code": 2, "log": [...],
//!  "native_tools": {"ar": 3}, "errors": {"compile_error": [...]},
//!  "blocked_by": [], "blocks": ["libpng"]}
//! ```
//!
//! A task blocked by its own unresolved dependencies carries them in
//! `unresolved`; `blocked_by` only ever names other tasks.

use crate::diagnostics::{Classifier, Diagnostics};
use crate::error::Result;
use crate::redirect::Invocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kind of log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// A process run inside the build environment
    Command,
    /// A note from the orchestrator
    Info,
    /// A fatal problem that ended the task
    Die,
}

/// One event of a task's process-tree log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub head: String,
    pub kind: LogKind,
    pub time: DateTime<Utc>,
    /// Output lines, in the order they were produced
    #[serde(default)]
    pub body: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl LogEntry {
    pub fn new(kind: LogKind, head: impl Into<String>, body: Vec<String>) -> Self {
        Self {
            head: head.into(),
            kind,
            time: Utc::now(),
            body,
            exit_code: None,
        }
    }

    pub fn info(head: impl Into<String>) -> Self {
        Self::new(LogKind::Info, head, Vec::new())
    }

    pub fn die(head: impl Into<String>) -> Self {
        Self::new(LogKind::Die, head, Vec::new())
    }

    /// A finished command with its combined output
    pub fn command(head: impl Into<String>, output: &str, exit_code: i32) -> Self {
        let mut entry = Self::new(
            LogKind::Command,
            head,
            output.lines().map(str::to_string).collect(),
        );
        entry.exit_code = Some(exit_code);
        entry
    }

    /// A native tool run caught by an interceptor
    ///
    /// Its output is part of the enclosing command's body and its exit
    /// status is not observed, since the interceptor replaced itself.
    pub fn intercepted(invocation: &Invocation) -> Self {
        let secs = i64::try_from(invocation.time / 1_000_000_000).unwrap_or(i64::MAX);
        let nanos = (invocation.time % 1_000_000_000) as u32;
        Self {
            head: invocation.command_line(),
            kind: LogKind::Command,
            time: DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now),
            body: Vec::new(),
            exit_code: None,
        }
    }
}

/// Final state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    /// Never ran because a predecessor failed or was blocked
    Blocked,
    /// Never ran because the run was cancelled
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one build task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub name: String,
    pub toolchain: String,
    pub status: TaskStatus,
    /// Wall-clock duration in seconds
    pub time: f64,
    pub return_code: Option<i32>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    /// Redirected-tool invocation counts
    #[serde(default)]
    pub native_tools: BTreeMap<String, u64>,
    #[serde(default)]
    pub errors: Diagnostics,
    /// Failed or blocked predecessors (transitively) that kept this from running
    #[serde(default)]
    pub blocked_by: Vec<String>,
    /// Dependency strings of this target that named no known package
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    /// Tasks that were blocked because of this one
    #[serde(default)]
    pub blocks: Vec<String>,
}

impl BuildResult {
    fn empty(name: &str, toolchain: &str, status: TaskStatus) -> Self {
        Self {
            name: name.to_string(),
            toolchain: toolchain.to_string(),
            status,
            time: 0.0,
            return_code: None,
            log: Vec::new(),
            native_tools: BTreeMap::new(),
            errors: BTreeMap::new(),
            blocked_by: Vec::new(),
            unresolved: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Result for a task that ran
    pub fn finished(name: &str, toolchain: &str, status: TaskStatus) -> Self {
        Self::empty(name, toolchain, status)
    }

    /// Result for a task skipped because of failed predecessors
    pub fn blocked(name: &str, toolchain: &str, blocked_by: Vec<String>) -> Self {
        let mut result = Self::empty(name, toolchain, TaskStatus::Blocked);
        result.blocked_by = blocked_by;
        result
    }

    /// Result for a task the run never started
    pub fn cancelled(name: &str, toolchain: &str) -> Self {
        Self::empty(name, toolchain, TaskStatus::Cancelled)
    }

    /// Every output line in log order
    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.log
            .iter()
            .flat_map(|entry| entry.body.iter().map(String::as_str))
    }

    /// Replace `errors` with a fresh classification of the log
    pub fn classify(&mut self, classifier: &Classifier) {
        self.errors = classifier.classify(self.log_lines());
    }

    /// File name used when persisting this result
    ///
    /// `%`, `/` and a leading `.` are percent-encoded, so distinct task
    /// names always get distinct files and none of them is `summary.json`.
    pub fn file_name(&self) -> String {
        let mut encoded = String::with_capacity(self.name.len());
        for (i, c) in self.name.chars().enumerate() {
            match c {
                '%' => encoded.push_str("%25"),
                '/' => encoded.push_str("%2F"),
                '.' if i == 0 => encoded.push_str("%2E"),
                _ => encoded.push(c),
            }
        }
        if format!("{}.json", encoded) == SUMMARY_FILE {
            encoded.replace_range(..1, "%73");
        }
        format!("{}.json", encoded)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name());
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Counts per status, written next to the per-task results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub toolchain: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub blocked: Vec<String>,
    pub cancelled: Vec<String>,
}

pub const SUMMARY_FILE: &str = "summary.json";

/// Every task's result for one run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub toolchain: String,
    pub results: BTreeMap<String, BuildResult>,
}

impl RunReport {
    pub fn new(toolchain: &str) -> Self {
        Self {
            toolchain: toolchain.to_string(),
            results: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&BuildResult> {
        self.results.get(name)
    }

    /// Task names with the given status, sorted
    pub fn with_status(&self, status: TaskStatus) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.status == status)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        let names = |status: TaskStatus| -> Vec<String> {
            self.with_status(status)
                .into_iter()
                .map(str::to_string)
                .collect()
        };
        RunSummary {
            toolchain: self.toolchain.clone(),
            succeeded: names(TaskStatus::Succeeded),
            failed: names(TaskStatus::Failed),
            blocked: names(TaskStatus::Blocked),
            cancelled: names(TaskStatus::Cancelled),
        }
    }

    /// Persist one file per task plus `summary.json`
    pub fn write_results(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        for result in self.results.values() {
            result.save(dir)?;
        }
        fs::write(
            dir.join(SUMMARY_FILE),
            serde_json::to_string_pretty(&self.summary())?,
        )?;
        debug!(count = self.results.len(), dir = %dir.display(), "wrote build results");
        Ok(())
    }
}

/// Load every persisted result in a directory, sorted by path
pub fn load_results(dir: &Path) -> Result<Vec<(PathBuf, BuildResult)>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "json")
                && path.file_name().is_some_and(|name| name != SUMMARY_FILE)
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| BuildResult::load(&path).map(|result| (path, result)))
        .collect()
}
