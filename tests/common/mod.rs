// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use toolsweep::{
    BuildCommand, BuildPlan, BuildTarget, EnvHandle, Error, Invocation, IsolationService,
    LogEntry, PackageRecord, Result, RunOutput, Toolchain,
};

/// What the fake environment does when a task's build runs
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub exit_code: i32,
    pub output: Vec<String>,
    /// Tools the build "invokes" through interceptors
    pub native_tools: Vec<String>,
    /// The build produces nothing to publish
    pub no_artifact: bool,
    /// Creating the environment fails
    pub env_failure: bool,
    pub delay: Duration,
}

impl Script {
    pub fn fail(exit_code: i32, output: &[&str]) -> Self {
        Self {
            exit_code,
            output: output.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct State {
    envs: BTreeMap<String, String>,
    published: BTreeSet<String>,
    started: Vec<String>,
    installed_tools: BTreeMap<String, Vec<(String, Vec<u8>)>>,
    installed_artifacts: BTreeMap<String, Vec<String>>,
    commands: BTreeMap<String, BuildCommand>,
    destroyed: Vec<String>,
}

/// In-memory `IsolationService` driven by per-task scripts
///
/// Installing an artifact that was never published is an environment
/// error, so a dependent starting before its predecessors finished fails
/// the run.
#[derive(Debug, Default)]
pub struct FakeIsolation {
    scripts: BTreeMap<String, Script>,
    state: Mutex<State>,
    counter: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeIsolation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, task: &str, script: Script) -> Self {
        self.scripts.insert(task.to_string(), script);
        self
    }

    /// Tasks whose build ran, in start order
    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn published(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.state.lock().unwrap().destroyed.len()
    }

    pub fn installed_tools(&self, task: &str) -> Vec<(String, Vec<u8>)> {
        self.state
            .lock()
            .unwrap()
            .installed_tools
            .get(task)
            .cloned()
            .unwrap_or_default()
    }

    /// Artifacts installed into a task's environment
    pub fn installed_artifacts(&self, task: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .installed_artifacts
            .get(task)
            .cloned()
            .unwrap_or_default()
    }

    pub fn command(&self, task: &str) -> Option<BuildCommand> {
        self.state.lock().unwrap().commands.get(task).cloned()
    }

    fn task(&self, env: &EnvHandle) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .envs
            .get(&env.0)
            .cloned()
            .ok_or_else(|| Error::Environment(format!("unknown environment {}", env)))
    }

    fn script_for(&self, task: &str) -> Script {
        self.scripts.get(task).cloned().unwrap_or_default()
    }

    /// The scripted native tool runs, one second apart
    fn invocations(&self, task: &str) -> Vec<Invocation> {
        self.script_for(task)
            .native_tools
            .iter()
            .enumerate()
            .map(|(i, tool)| Invocation {
                time: (i as u64 + 1) * 1_000_000_000,
                tool: tool.clone(),
                directory: PathBuf::from("/build").join(task),
                argv: vec![tool.into(), "--fake".into()],
            })
            .collect()
    }
}

impl IsolationService for FakeIsolation {
    fn create(&self, target: &BuildTarget, _toolchain: &Toolchain) -> Result<EnvHandle> {
        if self.script_for(&target.name).env_failure {
            return Err(Error::Environment("container service unreachable".to_string()));
        }
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let handle = EnvHandle(format!("env-{}", id));
        self.state
            .lock()
            .unwrap()
            .envs
            .insert(handle.0.clone(), target.name.clone());
        Ok(handle)
    }

    fn audit_dir(&self, env: &EnvHandle) -> Result<PathBuf> {
        Ok(PathBuf::from("/audit").join(&env.0))
    }

    fn install_tool(&self, env: &EnvHandle, name: &str, executable: &[u8]) -> Result<()> {
        let task = self.task(env)?;
        self.state
            .lock()
            .unwrap()
            .installed_tools
            .entry(task)
            .or_default()
            .push((name.to_string(), executable.to_vec()));
        Ok(())
    }

    fn install_artifacts(&self, env: &EnvHandle, packages: &[String]) -> Result<()> {
        let task = self.task(env)?;
        let mut state = self.state.lock().unwrap();
        if let Some(missing) = packages.iter().find(|p| !state.published.contains(*p)) {
            return Err(Error::Environment(format!("artifact {} not published", missing)));
        }
        state
            .installed_artifacts
            .entry(task)
            .or_default()
            .extend(packages.iter().cloned());
        Ok(())
    }

    fn run(&self, env: &EnvHandle, command: &BuildCommand) -> Result<RunOutput> {
        let task = self.task(env)?;
        let script = self.script_for(&task);
        {
            let mut state = self.state.lock().unwrap();
            state.started.push(task.clone());
            state.commands.insert(task.clone(), command.clone());
        }

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(script.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);

        let mut log = vec![LogEntry::command(
            command.display(),
            &script.output.join("\n"),
            script.exit_code,
        )];
        log.extend(self.invocations(&task).iter().map(LogEntry::intercepted));
        Ok(RunOutput {
            exit_code: script.exit_code,
            log,
        })
    }

    fn collect_audit(&self, env: &EnvHandle) -> Result<Vec<Invocation>> {
        let task = self.task(env)?;
        Ok(self.invocations(&task))
    }

    fn publish_artifact(&self, env: &EnvHandle, packages: &[String]) -> Result<()> {
        let task = self.task(env)?;
        if self.script_for(&task).no_artifact {
            return Err(Error::Publish(format!("build produced no artifact for '{}'", task)));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(taken) = packages.iter().find(|p| state.published.contains(*p)) {
            return Err(Error::Publish(format!("artifact '{}' is already published", taken)));
        }
        state.published.extend(packages.iter().cloned());
        Ok(())
    }

    fn destroy(&self, env: &EnvHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.envs.remove(&env.0);
        state.destroyed.push(env.0.clone());
        Ok(())
    }
}

/// Build target with the given predecessors and a trivial command
pub fn target(name: &str, predecessors: &[&str]) -> BuildTarget {
    BuildTarget {
        name: name.to_string(),
        names: vec![name.to_string()],
        source: None,
        predecessors: predecessors.iter().map(|p| p.to_string()).collect(),
        command: vec!["build".to_string(), "{name}".to_string(), "{toolchain}".to_string()],
        unresolved: Vec::new(),
    }
}

pub fn plan(targets: Vec<BuildTarget>) -> BuildPlan {
    BuildPlan::new(targets, Vec::new())
}

/// Record with runtime dependencies only
pub fn record(name: &str, depends: &[&str]) -> PackageRecord {
    PackageRecord::new(name).with_depends(depends)
}
