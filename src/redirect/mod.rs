// src/redirect/mod.rs

//! Tool redirection
//!
//! Broken build scripts hard-code native tools (`/usr/bin/ar`, `gcc`, ...).
//! For every redirect rule an interceptor executable is generated and put
//! first on the build's tool search path. The interceptor records the
//! invocation and execs the toolchain's tool in its place.
//!
//! Interceptors are produced by appending a payload to the prebuilt
//! `toolsweep-shim` binary, so they need nothing beyond libc at run time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use toolsweep_shim::Payload;

pub use toolsweep_shim::{read_audit_records, rewrite_argv, tool_names, Invocation, AUDIT_PREFIX};

/// What an interceptor does with the tool name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectAction {
    /// Exec the toolchain tool of the same name
    OverwriteInPlace,
    /// Exec a differently named toolchain tool
    Remap(String),
}

/// One native tool redirected into the toolchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub tool: String,
    /// Toolchain tool directory
    pub destination_dir: PathBuf,
    pub action: RedirectAction,
}

impl RedirectRule {
    /// Absolute path of the tool the interceptor execs
    pub fn destination(&self) -> PathBuf {
        match &self.action {
            RedirectAction::OverwriteInPlace => self.destination_dir.join(&self.tool),
            RedirectAction::Remap(name) => self.destination_dir.join(name),
        }
    }
}

/// Redirect section of a toolchain file
///
/// ```toml
/// [redirect]
/// bin = "/toolchain/bin"
/// overwrite = ["ar", "nm"]
///
/// [redirect.replacements]
/// gcc = "x86_64-linux-musl-gcc"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectConfig {
    /// Toolchain tool directory
    #[serde(default)]
    pub bin: PathBuf,
    /// Tools replaced by the toolchain tool of the same name
    #[serde(default)]
    pub overwrite: Vec<String>,
    /// Native name -> toolchain tool name
    #[serde(default)]
    pub replacements: BTreeMap<String, String>,
}

impl RedirectConfig {
    pub fn is_empty(&self) -> bool {
        self.overwrite.is_empty() && self.replacements.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if !self.bin.is_absolute() {
            return Err(Error::Config(format!(
                "redirect bin directory must be absolute, got '{}'",
                self.bin.display()
            )));
        }

        let mut seen = BTreeSet::new();
        let names = self
            .overwrite
            .iter()
            .chain(self.replacements.keys());
        for name in names {
            validate_tool_name(name)?;
            if !seen.insert(name.as_str()) {
                return Err(Error::Config(format!(
                    "tool '{}' is redirected more than once",
                    name
                )));
            }
        }
        for target in self.replacements.values() {
            validate_tool_name(target)?;
        }
        Ok(())
    }

    /// Expand into rules sorted by tool name
    pub fn rules(&self) -> Result<Vec<RedirectRule>> {
        self.validate()?;

        let mut rules: Vec<RedirectRule> = self
            .overwrite
            .iter()
            .map(|tool| RedirectRule {
                tool: tool.clone(),
                destination_dir: self.bin.clone(),
                action: RedirectAction::OverwriteInPlace,
            })
            .chain(self.replacements.iter().map(|(tool, target)| RedirectRule {
                tool: tool.clone(),
                destination_dir: self.bin.clone(),
                action: RedirectAction::Remap(target.clone()),
            }))
            .collect();
        rules.sort_by(|a, b| a.tool.cmp(&b.tool));
        Ok(rules)
    }
}

fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(Error::Config(format!("invalid tool name '{}'", name)));
    }
    Ok(())
}

/// Generates interceptor executables from redirect rules
#[derive(Debug, Clone)]
pub struct ToolRedirector {
    stub: Vec<u8>,
    audit_dir: PathBuf,
}

impl ToolRedirector {
    /// Wrap a stub image; audit records go to `audit_dir` at run time
    pub fn new(stub: Vec<u8>, audit_dir: impl Into<PathBuf>) -> Result<Self> {
        let audit_dir = audit_dir.into();
        if !audit_dir.is_absolute() {
            return Err(Error::Redirect(format!(
                "audit directory must be absolute, got '{}'",
                audit_dir.display()
            )));
        }
        match Payload::extract(&stub) {
            Ok(None) => {}
            Ok(Some(existing)) => {
                return Err(Error::Redirect(format!(
                    "stub already carries a payload for '{}'",
                    existing.tool
                )));
            }
            Err(e) => return Err(Error::Redirect(e.to_string())),
        }
        Ok(Self { stub, audit_dir })
    }

    /// Load the stub from the shim binary on disk
    pub fn from_shim(shim: &Path, audit_dir: impl Into<PathBuf>) -> Result<Self> {
        let stub = fs::read(shim).map_err(|e| {
            Error::Redirect(format!("cannot read shim {}: {}", shim.display(), e))
        })?;
        Self::new(stub, audit_dir)
    }

    /// Same stub, different audit directory
    pub fn with_audit_dir(&self, audit_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::new(self.stub.clone(), audit_dir)
    }

    pub fn audit_dir(&self) -> &Path {
        &self.audit_dir
    }

    /// Produce the interceptor executable image for one rule
    pub fn generate(&self, rule: &RedirectRule) -> Result<Vec<u8>> {
        let destination = rule.destination();
        if !destination.is_absolute() {
            return Err(Error::Redirect(format!(
                "destination for '{}' is not absolute: {}",
                rule.tool,
                destination.display()
            )));
        }

        debug!(tool = %rule.tool, destination = %destination.display(), "generating interceptor");
        let payload = Payload {
            tool: rule.tool.clone(),
            destination,
            audit_dir: self.audit_dir.clone(),
        };
        Ok(payload.append_to(&self.stub))
    }

    /// Write one executable interceptor per rule into `dir`
    pub fn write_all(&self, rules: &[RedirectRule], dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(rules.len());

        for rule in rules {
            let path = dir.join(&rule.tool);
            fs::write(&path, self.generate(rule)?)?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            written.push(path);
        }

        info!(count = written.len(), dir = %dir.display(), "wrote interceptors");
        Ok(written)
    }
}

/// Count audit records per tool
pub fn tool_frequencies<I, S>(records: I) -> BTreeMap<String, u64>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut counts = BTreeMap::new();
    for tool in records {
        *counts.entry(tool.into()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RedirectConfig {
        RedirectConfig {
            bin: PathBuf::from("/toolchain/bin"),
            overwrite: vec!["ar".to_string(), "nm".to_string()],
            replacements: BTreeMap::from([("gcc".to_string(), "musl-gcc".to_string())]),
        }
    }

    #[test]
    fn test_rules_from_config() {
        let rules = config().rules().unwrap();
        let tools: Vec<&str> = rules.iter().map(|r| r.tool.as_str()).collect();
        assert_eq!(tools, vec!["ar", "gcc", "nm"]);

        assert_eq!(rules[0].destination(), PathBuf::from("/toolchain/bin/ar"));
        assert_eq!(rules[1].action, RedirectAction::Remap("musl-gcc".to_string()));
        assert_eq!(rules[1].destination(), PathBuf::from("/toolchain/bin/musl-gcc"));
    }

    #[test]
    fn test_tool_listed_twice_rejected() {
        let mut cfg = config();
        cfg.replacements.insert("ar".to_string(), "llvm-ar".to_string());
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let mut cfg = config();
        cfg.overwrite.push("nm".to_string());
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_relative_bin_rejected() {
        let mut cfg = config();
        cfg.bin = PathBuf::from("toolchain/bin");
        assert!(matches!(cfg.rules(), Err(Error::Config(_))));
    }

    #[test]
    fn test_path_like_tool_rejected() {
        let mut cfg = config();
        cfg.overwrite.push("/usr/bin/ar".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_empty_config_valid_without_bin() {
        assert!(RedirectConfig::default().rules().unwrap().is_empty());
    }

    #[test]
    fn test_generate_appends_payload() {
        let redirector = ToolRedirector::new(b"stub".to_vec(), "/tmp/audit").unwrap();
        let rule = &config().rules().unwrap()[0];
        let image = redirector.generate(rule).unwrap();

        assert!(image.starts_with(b"stub"));
        let payload = Payload::extract(&image).unwrap().unwrap();
        assert_eq!(payload.tool, "ar");
        assert_eq!(payload.destination, PathBuf::from("/toolchain/bin/ar"));
        assert_eq!(payload.audit_dir, PathBuf::from("/tmp/audit"));

        // An interceptor is not a valid stub
        assert!(matches!(ToolRedirector::new(image, "/tmp"), Err(Error::Redirect(_))));
    }

    #[test]
    fn test_write_all_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let redirector = ToolRedirector::new(b"stub".to_vec(), "/tmp").unwrap();
        let written = redirector.write_all(&config().rules().unwrap(), dir.path()).unwrap();

        assert_eq!(written.len(), 3);
        let mode = fs::metadata(dir.path().join("gcc")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_tool_frequencies() {
        let counts = tool_frequencies(["ar", "gcc", "ar"]);
        assert_eq!(counts.get("ar"), Some(&2));
        assert_eq!(counts.get("gcc"), Some(&1));
    }
}
