// src/graph/provides.rs

//! Dependency name resolution
//!
//! Resolution is an explicit layered lookup, tried in this order:
//!
//! 1. the override table from configuration
//! 2. concrete produced names (a package named `sh` shadows any virtual `sh`)
//! 3. names declared in `provides`
//!
//! Produced names are unique across a `MetadataStore`, so only the
//! `provides` layer can offer several candidates. That is an ambiguity,
//! never a guess.

use crate::error::{Error, Result};
use crate::metadata::{strip_version_info, MetadataStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Resolution failure scoped to one requesting package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    #[error("{requester}: unresolved dependency '{dependency}'")]
    Unresolved { requester: String, dependency: String },

    #[error("{requester}: '{dependency}' is provided by more than one package: {}", candidates.join(", "))]
    Ambiguous {
        requester: String,
        dependency: String,
        candidates: Vec<String>,
    },

    #[error("{requester}: '{dependency}' resolves to excluded package '{provider}'")]
    Excluded {
        requester: String,
        dependency: String,
        provider: String,
    },
}

impl ResolutionError {
    /// The dependency string that failed to resolve
    pub fn dependency(&self) -> &str {
        match self {
            Self::Unresolved { dependency, .. }
            | Self::Ambiguous { dependency, .. }
            | Self::Excluded { dependency, .. } => dependency,
        }
    }
}

/// Two-layer map from dependency names to build identities
#[derive(Debug, Default, Clone)]
pub struct ProvidesMap {
    /// Override layer, already resolved to build identities
    overrides: BTreeMap<String, String>,
    /// Produced name -> the build producing it
    concrete: BTreeMap<String, String>,
    /// Declared virtual name -> builds providing it
    declared: BTreeMap<String, BTreeSet<String>>,
}

impl ProvidesMap {
    /// Build the map from every record plus the override table
    ///
    /// Override values name a concrete package (a produced name or a build
    /// identity). An override naming nothing known is a configuration error.
    pub fn build(store: &MetadataStore, overrides: &BTreeMap<String, String>) -> Result<Self> {
        let mut map = Self::default();

        for record in store.iter() {
            let identity = record.identity();
            for name in &record.names {
                map.concrete.insert(name.clone(), identity.to_string());
            }
            for virtual_name in &record.provides {
                let virtual_name = strip_version_info(virtual_name);
                // Providing one of your own names adds nothing
                if record.names.iter().any(|n| n == virtual_name) {
                    continue;
                }
                map.declared
                    .entry(virtual_name.to_string())
                    .or_default()
                    .insert(identity.to_string());
            }
        }

        for (virtual_name, target) in overrides {
            let identity = if store.get(target).is_some() {
                target.clone()
            } else {
                map.concrete.get(target.as_str()).cloned().ok_or_else(|| {
                    Error::Config(format!(
                        "provides override '{}' -> '{}' names an unknown package",
                        virtual_name, target
                    ))
                })?
            };
            map.overrides.insert(virtual_name.clone(), identity);
        }

        Ok(map)
    }

    /// Resolve one dependency string of `requester` to a build identity
    ///
    /// Version constraints are stripped first. The result may be the
    /// requester itself; callers drop such edges.
    pub fn resolve(&self, requester: &str, dependency: &str) -> std::result::Result<String, ResolutionError> {
        let name = strip_version_info(dependency);

        if let Some(identity) = self.overrides.get(name) {
            return Ok(identity.clone());
        }

        if let Some(identity) = self.concrete.get(name) {
            return Ok(identity.clone());
        }

        match self.declared.get(name) {
            Some(candidates) if candidates.len() == 1 => Ok(candidates
                .first()
                .cloned()
                .unwrap_or_else(|| name.to_string())),
            Some(candidates) => Err(ResolutionError::Ambiguous {
                requester: requester.to_string(),
                dependency: dependency.to_string(),
                candidates: candidates.iter().cloned().collect(),
            }),
            None => Err(ResolutionError::Unresolved {
                requester: requester.to_string(),
                dependency: dependency.to_string(),
            }),
        }
    }
}
