// src/metadata/mod.rs

//! Package metadata store
//!
//! Holds the parsed package records that the graph compiler consumes.
//! Records are read once from a JSON list and never mutated afterwards.
//!
//! A record describes one build procedure. A build may produce several
//! named artifacts ("split packages"), so each record carries a build
//! identity (`build`) distinct from the names it produces. When `build`
//! is omitted the first produced name is used.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parsed metadata for one build procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Build identity; defaults to the first produced name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Names of the artifacts this build produces
    pub names: Vec<String>,
    #[serde(default)]
    pub version: String,
    /// Runtime dependencies
    #[serde(default)]
    pub depends: Vec<String>,
    /// Build-time-only dependencies
    #[serde(default)]
    pub makedepends: Vec<String>,
    /// Virtual names this build satisfies
    #[serde(default)]
    pub provides: Vec<String>,
    /// Directory holding the package's build recipe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl PackageRecord {
    /// Create a record producing a single artifact of the same name
    pub fn new(name: &str) -> Self {
        Self {
            build: None,
            names: vec![name.to_string()],
            version: String::new(),
            depends: Vec::new(),
            makedepends: Vec::new(),
            provides: Vec::new(),
            source: None,
        }
    }

    /// Add runtime dependencies
    pub fn with_depends(mut self, deps: &[&str]) -> Self {
        self.depends.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    /// Add build-time dependencies
    pub fn with_makedepends(mut self, deps: &[&str]) -> Self {
        self.makedepends.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    /// Add provided virtual names
    pub fn with_provides(mut self, names: &[&str]) -> Self {
        self.provides.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// The build identity of this record
    pub fn identity(&self) -> &str {
        match &self.build {
            Some(build) => build,
            None => self.names.first().map(String::as_str).unwrap_or_default(),
        }
    }

    /// All dependency strings, runtime first, in declaration order
    pub fn all_dependencies(&self) -> impl Iterator<Item = &str> {
        self.depends
            .iter()
            .chain(self.makedepends.iter())
            .map(String::as_str)
    }
}

/// Strip a version constraint from a dependency string
///
/// `gcc>=5.1` becomes `gcc`. Builds always use the newest available
/// version, so the constraint carries no ordering information.
pub fn strip_version_info(dependency: &str) -> &str {
    let end = dependency
        .find(['<', '>', '='])
        .unwrap_or(dependency.len());
    dependency[..end].trim()
}

/// Immutable collection of package records keyed by build identity
#[derive(Debug, Default, Clone)]
pub struct MetadataStore {
    records: BTreeMap<String, PackageRecord>,
}

impl MetadataStore {
    /// Build a store, rejecting nameless records, duplicate identities and
    /// package names produced by more than one build
    pub fn from_records(records: Vec<PackageRecord>) -> Result<Self> {
        let mut map = BTreeMap::new();
        let mut producers: BTreeMap<String, String> = BTreeMap::new();

        for record in records {
            if record.names.is_empty() || record.names.iter().any(|n| n.trim().is_empty()) {
                return Err(Error::Config(format!(
                    "package record {:?} has no usable names",
                    record.build
                )));
            }

            let identity = record.identity().to_string();
            if map.contains_key(&identity) {
                return Err(Error::Config(format!(
                    "duplicate build identity '{}' in package metadata",
                    identity
                )));
            }
            for name in &record.names {
                if let Some(other) = producers.insert(name.clone(), identity.clone()) {
                    return Err(Error::Config(format!(
                        "package '{}' is produced by both '{}' and '{}'",
                        name, other, identity
                    )));
                }
            }
            map.insert(identity, record);
        }

        debug!(records = map.len(), "loaded package metadata");
        Ok(Self { records: map })
    }

    /// Load a JSON list of package records
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let records: Vec<PackageRecord> = serde_json::from_str(&content)?;
        Self::from_records(records)
    }

    pub fn get(&self, identity: &str) -> Option<&PackageRecord> {
        self.records.get(identity)
    }

    /// Records in identity order
    pub fn iter(&self) -> impl Iterator<Item = &PackageRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
