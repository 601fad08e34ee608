// src/commands/classify.rs

//! Classify command - re-run error classification over stored results

use anyhow::{Context, Result};
use std::path::Path;
use toolsweep::{load_results, Classifier};
use tracing::debug;

pub fn cmd_classify(results_dir: &Path, patterns: Option<&Path>) -> Result<()> {
    let classifier = match patterns {
        Some(path) => Classifier::load(path)
            .with_context(|| format!("Failed to load error patterns: {}", path.display()))?,
        None => Classifier::default_rules()?,
    };

    let results = load_results(results_dir)
        .with_context(|| format!("Failed to read results: {}", results_dir.display()))?;

    let total = results.len();
    let mut changed = 0;
    for (path, mut result) in results {
        let before = result.errors.clone();
        result.classify(&classifier);
        if result.errors != before {
            changed += 1;
            debug!(task = %result.name, "classification changed");
        }
        let dir = path.parent().unwrap_or(results_dir);
        result
            .save(dir)
            .with_context(|| format!("Failed to rewrite {}", path.display()))?;
    }

    println!(
        "Classified {} results with {} rules ({} changed)",
        total,
        classifier.len(),
        changed
    );
    Ok(())
}
