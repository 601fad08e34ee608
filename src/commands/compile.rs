// src/commands/compile.rs

//! Compile command - package metadata to build plan

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use toolsweep::{MetadataStore, SweepConfig};
use tracing::info;

/// Compile `metadata` into a plan written to `out`
pub fn cmd_compile(
    metadata: &Path,
    config: &Path,
    out: &Path,
    ninja: Option<&Path>,
    ninja_toolchain: &str,
) -> Result<()> {
    let config = load_config(config)?;
    let store = MetadataStore::load(metadata)
        .with_context(|| format!("Failed to load package metadata: {}", metadata.display()))?;
    info!(records = store.len(), "loaded package metadata");

    let plan = config
        .compiler()
        .compile(&store)
        .context("Failed to compile build plan")?;

    plan.save(out)
        .with_context(|| format!("Failed to write plan: {}", out.display()))?;

    if let Some(path) = ninja {
        fs::write(path, plan.to_ninja(ninja_toolchain))
            .with_context(|| format!("Failed to write ninja file: {}", path.display()))?;
        println!("Wrote ninja file {}", path.display());
    }

    let unresolved: Vec<_> = plan.targets().iter().filter(|t| !t.is_resolved()).collect();
    println!(
        "Compiled {} targets ({} cycle edges broken) into {}",
        plan.len(),
        plan.broken_edges().len(),
        out.display()
    );
    for rule in plan.broken_edges() {
        println!("  broke: {} -> {}", rule.dependent, rule.dependency);
    }
    if !unresolved.is_empty() {
        println!("{} targets will be blocked:", unresolved.len());
        for target in unresolved {
            for error in &target.unresolved {
                println!("  {}", error);
            }
        }
    }

    Ok(())
}

/// Load the sweep configuration, or defaults if the file does not exist
pub(super) fn load_config(path: &Path) -> Result<SweepConfig> {
    if !path.exists() {
        info!(path = %path.display(), "no configuration file, using defaults");
        return Ok(SweepConfig::default());
    }
    SweepConfig::load(path)
        .with_context(|| format!("Failed to load configuration: {}", path.display()))
}
