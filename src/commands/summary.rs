// src/commands/summary.rs

//! Summary command - counts per status and per error category

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use toolsweep::{load_results, TaskStatus};

pub fn cmd_summary(results_dir: &Path) -> Result<()> {
    let results = load_results(results_dir)
        .with_context(|| format!("Failed to read results: {}", results_dir.display()))?;

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_category: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    let mut native_tools: BTreeMap<&str, u64> = BTreeMap::new();

    for (_, result) in &results {
        *by_status.entry(result.status.as_str()).or_default() += 1;
        for (category, captures) in &result.errors {
            let entry = by_category.entry(category.as_str()).or_default();
            entry.0 += 1;
            entry.1 += captures.iter().map(|c| c.frequency).sum::<u64>();
        }
        for (tool, count) in &result.native_tools {
            *native_tools.entry(tool.as_str()).or_default() += count;
        }
    }

    println!("{} results in {}", results.len(), results_dir.display());
    for status in [
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Blocked,
        TaskStatus::Cancelled,
    ] {
        let count = by_status.get(status.as_str()).copied().unwrap_or(0);
        println!("  {:<10} {}", status.as_str(), count);
    }

    if !by_category.is_empty() {
        println!("\nError categories (packages, occurrences):");
        let mut sorted: Vec<_> = by_category.into_iter().collect();
        sorted.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.0.cmp(b.0)));
        for (category, (packages, occurrences)) in sorted {
            println!("  {:<24} {:>5} {:>7}", category, packages, occurrences);
        }
    }

    if !native_tools.is_empty() {
        println!("\nNative tool invocations:");
        for (tool, count) in native_tools {
            println!("  {:<24} {:>7}", tool, count);
        }
    }

    Ok(())
}
