// src/commands/mod.rs
//! Command handlers for the toolsweep CLI

mod classify;
mod compile;
mod redirect;
mod run;
mod summary;

pub use classify::cmd_classify;
pub use compile::cmd_compile;
pub use redirect::cmd_redirect;
pub use run::cmd_run;
pub use summary::cmd_summary;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// File name of the interceptor stub installed next to `toolsweep`
const SHIM_NAME: &str = "toolsweep-shim";

/// Pick the interceptor stub: explicit path first, then the installed one
fn locate_shim(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let exe = std::env::current_exe().context("Failed to locate the toolsweep executable")?;
    let candidate = exe
        .parent()
        .map(|dir| dir.join(SHIM_NAME))
        .context("toolsweep executable has no parent directory")?;
    if !candidate.exists() {
        anyhow::bail!(
            "Interceptor stub not found at {} (pass --shim or set run.shim_path)",
            candidate.display()
        );
    }
    Ok(candidate)
}
