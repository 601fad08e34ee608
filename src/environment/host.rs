// src/environment/host.rs

//! Directory-per-task environments on the host
//!
//! No process isolation: each task gets a fresh directory tree and a
//! `PATH` with its own `bin/` first. Layout of one environment:
//!
//! ```text
//! <work>/<task>-<n>/
//!   bin/      interceptors (first on PATH)
//!   audit/    interceptor audit records
//!   deps/     installed predecessor artifacts, one directory per package
//!   out/      the build drops one entry per produced package name here
//!   src/      copy of the package's recipe directory (working directory)
//!   build.log combined stdout/stderr of the build
//! ```
//!
//! The build sees `TOOLSWEEP_DEPS` and `TOOLSWEEP_OUT` on top of the
//! command's own environment.
//!
//! Without a tracer the host only observes the top-level process. Child
//! processes become visible through interceptors: every audit record
//! written during the run is reported as a further command event.
//!
//! `HostEnvironment::for_run` gives every run of a toolchain its own
//! repository and work directory under `<dir>/<toolchain>/<run id>`, so a
//! run never installs artifacts another toolchain built and never collides
//! with names an earlier run published.

use super::{BuildCommand, EnvHandle, IsolationService, RunOutput};
use crate::artifacts::{copy_tree, ArtifactRepository};
use crate::config::RunSection;
use crate::error::{Error, Result};
use crate::plan::BuildTarget;
use crate::redirect::{read_audit_records, Invocation};
use crate::result::LogEntry;
use crate::toolchain::Toolchain;
use chrono::Utc;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Host-directory implementation of `IsolationService`
#[derive(Debug)]
pub struct HostEnvironment {
    work_dir: PathBuf,
    repository: ArtifactRepository,
    counter: AtomicU64,
    keep: bool,
}

impl HostEnvironment {
    pub fn new(work_dir: impl Into<PathBuf>, repository: ArtifactRepository) -> Result<Self> {
        let work_dir = work_dir.into();
        fs::create_dir_all(&work_dir)?;
        Ok(Self {
            work_dir,
            repository,
            counter: AtomicU64::new(0),
            keep: false,
        })
    }

    /// Fresh repository and work directory for one run of `toolchain`
    pub fn for_run(run: &RunSection, toolchain: &str) -> Result<Self> {
        let repositories = run.repository_dir.join(toolchain);
        let run_id = create_run_dir(&repositories)?;
        let repository = ArtifactRepository::new(repositories.join(&run_id))?;
        debug!(toolchain, run = %run_id, "prepared run directories");
        Self::new(run.work_dir.join(toolchain).join(&run_id), repository)
    }

    /// Keep environment directories after the task ends
    pub fn keep_environments(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn repository(&self) -> &ArtifactRepository {
        &self.repository
    }

    fn root(&self, env: &EnvHandle) -> Result<PathBuf> {
        let root = self.work_dir.join(&env.0);
        if !root.is_dir() {
            return Err(Error::Environment(format!("unknown environment '{}'", env)));
        }
        Ok(root)
    }

    fn search_path(bin: &Path) -> Result<OsString> {
        let mut paths = vec![bin.to_path_buf()];
        if let Some(existing) = env::var_os("PATH") {
            paths.extend(env::split_paths(&existing));
        }
        env::join_paths(paths).map_err(|e| Error::Environment(format!("invalid PATH: {}", e)))
    }
}

/// Create a uniquely named run directory under `parent`, named after the
/// current time
fn create_run_dir(parent: &Path) -> Result<String> {
    fs::create_dir_all(parent)?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6f").to_string();

    let mut attempt = 0u32;
    loop {
        let run_id = match attempt {
            0 => stamp.clone(),
            n => format!("{}-{}", stamp, n),
        };
        match fs::create_dir(parent.join(&run_id)) {
            Ok(()) => return Ok(run_id),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

impl IsolationService for HostEnvironment {
    fn create(&self, target: &BuildTarget, toolchain: &Toolchain) -> Result<EnvHandle> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let handle = EnvHandle(format!("{}-{}", target.name.replace('/', "_"), id));
        let root = self.work_dir.join(&handle.0);

        for dir in ["bin", "audit", "deps", "out", "src"] {
            fs::create_dir_all(root.join(dir))
                .map_err(|e| Error::Environment(format!("cannot create {}: {}", root.display(), e)))?;
        }

        match &target.source {
            Some(source) if source.is_dir() => copy_tree(source, &root.join("src"))?,
            Some(source) => {
                warn!(task = %target.name, source = %source.display(), "recipe directory not found");
            }
            None => {}
        }

        debug!(
            task = %target.name,
            toolchain = %toolchain.name,
            env = %handle,
            "created host environment"
        );
        Ok(handle)
    }

    fn audit_dir(&self, env: &EnvHandle) -> Result<PathBuf> {
        Ok(self.root(env)?.join("audit"))
    }

    fn install_tool(&self, env: &EnvHandle, name: &str, executable: &[u8]) -> Result<()> {
        let path = self.root(env)?.join("bin").join(name);
        fs::write(&path, executable)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    fn install_artifacts(&self, env: &EnvHandle, packages: &[String]) -> Result<()> {
        let deps = self.root(env)?.join("deps");
        for package in packages {
            self.repository.install_into(package, &deps.join(package))?;
        }
        Ok(())
    }

    fn run(&self, env: &EnvHandle, command: &BuildCommand) -> Result<RunOutput> {
        let root = self.root(env)?;
        let Some((program, args)) = command.argv.split_first() else {
            return Err(Error::Environment("empty build command".to_string()));
        };

        let log_path = root.join("build.log");
        let log_file = fs::File::create(&log_path)?;

        let spawned = Command::new(program)
            .args(args)
            .current_dir(root.join("src"))
            .env("PATH", Self::search_path(&root.join("bin"))?)
            .env("TOOLSWEEP_DEPS", root.join("deps"))
            .env("TOOLSWEEP_OUT", root.join("out"))
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                // A missing build tool is the package's problem, not the host's
                let message = format!("{}: {}", program, e);
                return Ok(RunOutput {
                    exit_code: 127,
                    log: vec![LogEntry::command(command.display(), &message, 127)],
                });
            }
        };

        let status = child.wait()?;
        let exit_code = status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0));
        let output = fs::read(&log_path)?;

        let mut log = vec![LogEntry::command(
            command.display(),
            &String::from_utf8_lossy(&output),
            exit_code,
        )];
        log.extend(
            read_audit_records(&root.join("audit"))?
                .iter()
                .map(LogEntry::intercepted),
        );
        Ok(RunOutput {
            exit_code,
            log,
        })
    }

    fn collect_audit(&self, env: &EnvHandle) -> Result<Vec<Invocation>> {
        Ok(read_audit_records(&self.audit_dir(env)?)?)
    }

    fn publish_artifact(&self, env: &EnvHandle, packages: &[String]) -> Result<()> {
        let out = self.root(env)?.join("out");
        let artifacts: Vec<(String, PathBuf)> = packages
            .iter()
            .map(|package| (package.clone(), out.join(package)))
            .collect();
        self.repository.publish_all(&artifacts)?;
        Ok(())
    }

    fn destroy(&self, env: &EnvHandle) -> Result<()> {
        let root = self.root(env)?;
        if self.keep {
            debug!(env = %env, "keeping environment");
            return Ok(());
        }
        fs::remove_dir_all(&root)
            .map_err(|e| Error::Environment(format!("cannot remove {}: {}", root.display(), e)))
    }
}
