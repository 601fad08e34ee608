// src/toolchain.rs

//! Toolchain descriptions
//!
//! A toolchain is one compiler/libc/architecture combination under test.
//! Each toolchain is described by a TOML file:
//!
//! ```toml
//! name = "x86_64-musl"
//! target = "x86_64-linux-musl"
//! description = "musl libc with gcc 5"
//!
//! [env]
//! CC = "x86_64-linux-musl-gcc"
//!
//! [redirect]
//! bin = "/toolchain/bin"
//! overwrite = ["ar", "nm", "ranlib"]
//! ```

use crate::error::{Error, Result};
use crate::redirect::{RedirectConfig, RedirectRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A toolchain under test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub name: String,

    /// Target triple (e.g., x86_64-linux-musl)
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Extra environment for every build
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub redirect: RedirectConfig,
}

impl Toolchain {
    /// A toolchain with no redirects and no extra environment
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toolchain: Toolchain = toml::from_str(content)?;
        toolchain.validate()?;
        Ok(toolchain)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("toolchain name is empty".to_string()));
        }
        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(Error::Config(format!("invalid environment variable name '{}'", key)));
        }
        self.redirect.validate()
    }

    /// Redirect rules, sorted by tool name
    pub fn redirect_rules(&self) -> Result<Vec<RedirectRule>> {
        self.redirect.rules()
    }
}
