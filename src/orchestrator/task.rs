// src/orchestrator/task.rs

//! One build task, start to finish
//!
//! Runs on a blocking thread. Any `Err` returned from here is an
//! infrastructure failure and aborts the run; build failures come back as
//! a `BuildResult` with status `Failed`.

use crate::diagnostics::Classifier;
use crate::environment::{BuildCommand, EnvHandle, IsolationService};
use crate::error::{Error, Result};
use crate::plan::BuildTarget;
use crate::redirect::{tool_frequencies, tool_names, RedirectRule, ToolRedirector};
use crate::result::{BuildResult, LogEntry, LogKind, TaskStatus};
use crate::toolchain::Toolchain;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Environment variable carrying the toolchain name into every build
pub const TOOLCHAIN_VAR: &str = "TOOLSWEEP_TOOLCHAIN";

/// Everything a task needs that is shared across the run
pub(crate) struct TaskContext {
    pub isolation: Arc<dyn IsolationService>,
    pub classifier: Arc<Classifier>,
    pub redirector: Option<ToolRedirector>,
    pub rules: Vec<RedirectRule>,
    pub toolchain: Toolchain,
}

/// Build `target` in a fresh environment
///
/// `dependencies` are the artifact names of every transitive predecessor.
pub(crate) fn execute(
    ctx: &TaskContext,
    target: &BuildTarget,
    dependencies: &[String],
) -> Result<BuildResult> {
    let started = Instant::now();
    let env = ctx.isolation.create(target, &ctx.toolchain)?;
    debug!(task = %target.name, env = %env, "environment ready");

    let outcome = build_in(ctx, &env, target, dependencies);
    let destroyed = ctx.isolation.destroy(&env);

    let mut result = outcome?;
    destroyed?;

    result.time = started.elapsed().as_secs_f64();
    result.classify(&ctx.classifier);
    Ok(result)
}

fn build_in(
    ctx: &TaskContext,
    env: &EnvHandle,
    target: &BuildTarget,
    dependencies: &[String],
) -> Result<BuildResult> {
    let mut log = Vec::new();

    if !ctx.rules.is_empty() {
        let redirector = ctx.redirector.as_ref().ok_or_else(|| {
            Error::Config("redirect rules configured without an interceptor stub".to_string())
        })?;
        let redirector = redirector.with_audit_dir(ctx.isolation.audit_dir(env)?)?;
        for rule in &ctx.rules {
            ctx.isolation
                .install_tool(env, &rule.tool, &redirector.generate(rule)?)?;
        }
        log.push(LogEntry::new(
            LogKind::Info,
            "install interceptors",
            ctx.rules
                .iter()
                .map(|r| format!("{} -> {}", r.tool, r.destination().display()))
                .collect(),
        ));
    }

    if !dependencies.is_empty() {
        ctx.isolation.install_artifacts(env, dependencies)?;
        log.push(LogEntry::new(
            LogKind::Info,
            "install dependencies",
            dependencies.to_vec(),
        ));
    }

    let mut vars = ctx.toolchain.env.clone();
    vars.insert(TOOLCHAIN_VAR.to_string(), ctx.toolchain.name.clone());
    let command = BuildCommand {
        argv: target.expand_command(&ctx.toolchain.name),
        env: vars,
    };

    let output = ctx.isolation.run(env, &command)?;
    log.extend(output.log);

    let audit = ctx.isolation.collect_audit(env)?;
    if !audit.is_empty() {
        log.push(LogEntry::new(
            LogKind::Info,
            "native tool audit",
            audit
                .iter()
                .map(|invocation| {
                    format!(
                        "toolsweep: native invocation of '{}' in {}",
                        invocation.tool,
                        invocation.directory.display()
                    )
                })
                .collect(),
        ));
    }

    let status = if output.exit_code != 0 {
        TaskStatus::Failed
    } else {
        match ctx.isolation.publish_artifact(env, &target.names) {
            Ok(()) => TaskStatus::Succeeded,
            Err(Error::Publish(reason)) => {
                warn!(task = %target.name, reason = %reason, "artifact publication failed");
                log.push(LogEntry::die(format!("publish failed: {}", reason)));
                TaskStatus::Failed
            }
            Err(e) => return Err(e),
        }
    };

    let mut result = BuildResult::finished(&target.name, &ctx.toolchain.name, status);
    result.return_code = Some(output.exit_code);
    result.log = log;
    result.native_tools = tool_frequencies(tool_names(&audit));
    Ok(result)
}
