// src/orchestrator/mod.rs

//! Build orchestration
//!
//! Runs every target of a `BuildPlan` against one toolchain with at most
//! `concurrency_limit` builds in flight. Each build runs on a blocking
//! thread inside its own environment from the `IsolationService`.
//!
//! Each environment receives the artifacts of every transitive
//! predecessor, not only the direct ones.
//!
//! A failed or blocked task blocks its dependents once all their other
//! predecessors are final; blocked tasks never run and get a result with
//! no log. An `Err` from the environment service aborts the run: in-flight
//! builds are drained and the error is returned instead of a report.
//!
//! Cancelling the token stops new builds from starting. In-flight builds
//! finish and every task that never started is reported as cancelled.

mod scheduler;
mod task;

pub use scheduler::{Scheduler, TaskState};
pub use task::TOOLCHAIN_VAR;

use crate::diagnostics::Classifier;
use crate::environment::IsolationService;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::plan::BuildPlan;
use crate::progress::RunObserver;
use crate::redirect::ToolRedirector;
use crate::result::{BuildResult, RunReport, TaskStatus};
use crate::toolchain::Toolchain;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use task::TaskContext;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Schedules and runs builds
pub struct Orchestrator {
    isolation: Arc<dyn IsolationService>,
    classifier: Arc<Classifier>,
    redirector: Option<ToolRedirector>,
    cancel: CancellationToken,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Orchestrator {
    pub fn new(isolation: Arc<dyn IsolationService>, classifier: Classifier) -> Self {
        Self {
            isolation,
            classifier: Arc::new(classifier),
            redirector: None,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }

    /// Interceptor generator for toolchains with redirect rules
    pub fn with_redirector(mut self, redirector: ToolRedirector) -> Self {
        self.redirector = Some(redirector);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels runs of this orchestrator
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build every target of `plan` with `toolchain`
    pub async fn run(
        &self,
        plan: &BuildPlan,
        toolchain: &Toolchain,
        concurrency_limit: usize,
    ) -> Result<RunReport> {
        if concurrency_limit == 0 {
            return Err(Error::Config("concurrency limit must be at least 1".to_string()));
        }
        toolchain.validate()?;
        plan.validate()?;

        let rules = toolchain.redirect_rules()?;
        if !rules.is_empty() && self.redirector.is_none() {
            return Err(Error::Config(format!(
                "toolchain '{}' redirects {} tools but no interceptor stub is configured",
                toolchain.name,
                rules.len()
            )));
        }

        let ctx = Arc::new(TaskContext {
            isolation: Arc::clone(&self.isolation),
            classifier: Arc::clone(&self.classifier),
            redirector: self.redirector.clone(),
            rules,
            toolchain: toolchain.clone(),
        });

        info!(
            toolchain = %toolchain.name,
            tasks = plan.len(),
            jobs = concurrency_limit,
            "starting build run"
        );

        let graph = plan.graph();
        let mut scheduler = Scheduler::new(plan);
        let mut report = RunReport::new(&toolchain.name);
        let mut running: JoinSet<(String, Result<BuildResult>)> = JoinSet::new();
        let mut fatal: Option<Error> = None;
        let mut cancel_seen = false;

        loop {
            self.record_blocked(&mut scheduler, &mut report, &toolchain.name);

            while fatal.is_none() && !self.cancel.is_cancelled() && running.len() < concurrency_limit {
                let Some(name) = scheduler.next_ready() else {
                    break;
                };
                let Some(target) = plan.target(&name).cloned() else {
                    continue;
                };
                let dependencies = dependency_artifacts(plan, &graph, &name);

                if let Some(observer) = &self.observer {
                    observer.task_started(&name);
                }
                info!(task = %name, "build started");

                let ctx = Arc::clone(&ctx);
                running.spawn_blocking(move || {
                    let outcome = task::execute(&ctx, &target, &dependencies);
                    (name, outcome)
                });
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok((name, Ok(result))) => {
                            scheduler.complete(&name, result.status == TaskStatus::Succeeded);
                            self.record_finished(&mut report, result);
                        }
                        Ok((name, Err(e))) => {
                            error!(task = %name, error = %e, "environment failure, aborting run");
                            fatal.get_or_insert(e);
                        }
                        Err(e) => {
                            error!(error = %e, "build task panicked, aborting run");
                            fatal.get_or_insert(Error::Environment(format!("build task panicked: {}", e)));
                        }
                    }
                }
                _ = self.cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    warn!(in_flight = running.len(), "run cancelled, waiting for in-flight builds");
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        for name in scheduler.unstarted() {
            self.record_finished(&mut report, BuildResult::cancelled(&name, &toolchain.name));
        }
        fill_blocks(&mut report);

        if let Some(observer) = &self.observer {
            observer.run_finished();
        }

        let summary = report.summary();
        info!(
            toolchain = %toolchain.name,
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            blocked = summary.blocked.len(),
            cancelled = summary.cancelled.len(),
            "build run finished"
        );
        Ok(report)
    }

    fn record_blocked(&self, scheduler: &mut Scheduler, report: &mut RunReport, toolchain: &str) {
        for (name, blocked_by) in scheduler.take_newly_blocked() {
            if !blocked_by.is_empty() {
                warn!(
                    task = %name,
                    blocked_by = %blocked_by.join(", "),
                    "skipping build due to failed dependency"
                );
            }
            let mut result = BuildResult::blocked(&name, toolchain, blocked_by);
            result.unresolved = scheduler.unresolved(&name);
            if !result.unresolved.is_empty() {
                warn!(
                    task = %name,
                    unresolved = %result.unresolved.join(", "),
                    "skipping build due to unresolved dependencies"
                );
            }
            self.record_finished(report, result);
        }
    }

    fn record_finished(&self, report: &mut RunReport, result: BuildResult) {
        match result.status {
            TaskStatus::Succeeded | TaskStatus::Failed => info!(
                task = %result.name,
                status = %result.status,
                time = result.time,
                "build finished"
            ),
            TaskStatus::Blocked | TaskStatus::Cancelled => {}
        }
        if let Some(observer) = &self.observer {
            observer.task_finished(&result);
        }
        report.results.insert(result.name.clone(), result);
    }
}

/// Artifact names of every build `name` transitively depends on
fn dependency_artifacts(plan: &BuildPlan, graph: &DependencyGraph, name: &str) -> Vec<String> {
    graph
        .transitive_dependencies(name)
        .iter()
        .filter_map(|pred| plan.target(pred))
        .flat_map(|target| target.names.iter().cloned())
        .collect()
}

/// Fill each result's `blocks` from the `blocked_by` lists of blocked tasks
fn fill_blocks(report: &mut RunReport) {
    let mut blocks: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for result in report.results.values() {
        if result.status != TaskStatus::Blocked {
            continue;
        }
        for blocker in &result.blocked_by {
            blocks
                .entry(blocker.clone())
                .or_default()
                .insert(result.name.clone());
        }
    }

    for (name, dependents) in blocks {
        if let Some(result) = report.results.get_mut(&name) {
            result.blocks = dependents.into_iter().collect();
        }
    }
}
