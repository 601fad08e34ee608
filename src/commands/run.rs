// src/commands/run.rs

//! Run command - build a plan against one toolchain

use super::compile::load_config;
use super::locate_shim;
use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use toolsweep::{
    BuildPlan, CliProgress, HostEnvironment, LogProgress, Orchestrator, RunObserver, TaskStatus,
    Toolchain, ToolRedirector,
};
use tracing::{info, warn};

/// Build every target of `plan` and write one result per task
pub async fn cmd_run(
    plan: &Path,
    toolchain: &Path,
    config: &Path,
    jobs: Option<usize>,
    shim: Option<&Path>,
    keep_envs: bool,
) -> Result<()> {
    let config = load_config(config)?;
    let plan = BuildPlan::load(plan)
        .with_context(|| format!("Failed to load plan: {}", plan.display()))?;
    let toolchain = Toolchain::load(toolchain)
        .with_context(|| format!("Failed to load toolchain: {}", toolchain.display()))?;
    let classifier = config
        .classifier()
        .context("Failed to load error patterns")?;

    let host = HostEnvironment::for_run(&config.run, &toolchain.name)
        .with_context(|| {
            format!(
                "Failed to prepare run directories under {} and {}",
                config.run.repository_dir.display(),
                config.run.work_dir.display()
            )
        })?
        .keep_environments(keep_envs);
    info!(repository = %host.repository().root().display(), "artifact repository for this run");

    let progress: Arc<dyn RunObserver> = if std::io::stderr().is_terminal() {
        Arc::new(CliProgress::new(plan.len() as u64, &toolchain.name))
    } else {
        Arc::new(LogProgress::new(plan.len() as u64))
    };
    let mut orchestrator = Orchestrator::new(Arc::new(host), classifier).with_observer(progress);

    if !toolchain.redirect.is_empty() {
        let shim = locate_shim(shim.or(config.run.shim_path.as_deref()))?;
        // The real audit directory is per environment and set for each task
        let redirector = ToolRedirector::from_shim(&shim, "/tmp")
            .with_context(|| format!("Failed to load interceptor stub: {}", shim.display()))?;
        orchestrator = orchestrator.with_redirector(redirector);
    }

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, no new builds will start");
            token.cancel();
        }
    });

    let jobs = jobs.unwrap_or_else(|| config.concurrency());
    let report = orchestrator
        .run(&plan, &toolchain, jobs)
        .await
        .context("Build run aborted")?;

    let results_dir = config.run.results_dir.join(&toolchain.name);
    report
        .write_results(&results_dir)
        .with_context(|| format!("Failed to write results: {}", results_dir.display()))?;
    info!(dir = %results_dir.display(), "results written");

    let summary = report.summary();
    println!("Toolchain: {}", toolchain.name);
    println!("  succeeded: {}", summary.succeeded.len());
    println!("  failed:    {}", summary.failed.len());
    println!("  blocked:   {}", summary.blocked.len());
    if !summary.cancelled.is_empty() {
        println!("  cancelled: {}", summary.cancelled.len());
    }
    for name in report.with_status(TaskStatus::Failed) {
        if let Some(result) = report.get(name) {
            let categories: Vec<&str> = result.errors.keys().map(String::as_str).collect();
            println!("  [FAILED] {} {}", name, categories.join(" "));
        }
    }
    println!("Results in {}", results_dir.display());

    Ok(())
}
