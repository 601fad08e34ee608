// src/commands/redirect.rs

//! Redirect command - write interceptors for externally built environments

use super::locate_shim;
use anyhow::{Context, Result};
use std::path::Path;
use toolsweep::{Toolchain, ToolRedirector};

pub fn cmd_redirect(
    toolchain: &Path,
    out: &Path,
    shim: Option<&Path>,
    audit_dir: &Path,
) -> Result<()> {
    let toolchain = Toolchain::load(toolchain)
        .with_context(|| format!("Failed to load toolchain: {}", toolchain.display()))?;
    let rules = toolchain.redirect_rules()?;
    if rules.is_empty() {
        println!("Toolchain {} redirects no tools", toolchain.name);
        return Ok(());
    }

    let shim = locate_shim(shim)?;
    let redirector = ToolRedirector::from_shim(&shim, audit_dir)
        .with_context(|| format!("Failed to load interceptor stub: {}", shim.display()))?;
    let written = redirector
        .write_all(&rules, out)
        .with_context(|| format!("Failed to write interceptors to {}", out.display()))?;

    for (rule, path) in rules.iter().zip(&written) {
        println!("{} -> {}", path.display(), rule.destination().display());
    }
    println!("Wrote {} interceptors (audit records go to {})", written.len(), audit_dir.display());
    Ok(())
}
