// src/diagnostics/mod.rs

//! Build log classification
//!
//! Each log line is matched against an ordered list of rules. The first
//! rule whose pattern matches assigns the line's category and captured
//! fields; later rules are not tried. Lines matching no rule are left out
//! of the classification but stay in the raw log.
//!
//! The classifier never reorders rules. Order is part of the rule set's
//! configuration and expresses which pattern is more specific.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Rule set shipped with the binary
pub const DEFAULT_PATTERNS: &str = include_str!("../../config/error_patterns.toml");

/// One rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    /// Regex, optionally with named capture groups
    pub pattern: String,
    pub category: String,
}

impl ErrorPattern {
    pub fn new(pattern: &str, category: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            category: category.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    #[serde(default, rename = "pattern")]
    patterns: Vec<ErrorPattern>,
}

/// A distinct set of captured fields and how often it occurred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureCount {
    pub captures: BTreeMap<String, String>,
    pub frequency: u64,
}

/// Category -> distinct captures, in order of first occurrence
pub type Diagnostics = BTreeMap<String, Vec<CaptureCount>>;

#[derive(Debug, Clone)]
struct Rule {
    regex: Regex,
    category: String,
}

/// Ordered, first-match-wins log classifier
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Compile rules, keeping their order
    pub fn new(patterns: Vec<ErrorPattern>) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());

        for (idx, pattern) in patterns.into_iter().enumerate() {
            if pattern.category.trim().is_empty() {
                return Err(Error::Config(format!(
                    "error pattern #{} ('{}') has an empty category",
                    idx + 1,
                    pattern.pattern
                )));
            }
            let regex = Regex::new(&pattern.pattern).map_err(|e| {
                Error::Config(format!("error pattern #{} is not a valid regex: {}", idx + 1, e))
            })?;
            rules.push(Rule {
                regex,
                category: pattern.category,
            });
        }

        Ok(Self { rules })
    }

    /// Parse a `[[pattern]]` TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: PatternFile = toml::from_str(content)?;
        Self::new(file.patterns)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// The built-in rule set
    pub fn default_rules() -> Result<Self> {
        Self::from_toml_str(DEFAULT_PATTERNS)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Category and named captures of the first rule matching `line`
    ///
    /// Optional groups that did not participate in the match are omitted.
    pub fn categorize(&self, line: &str) -> Option<(&str, BTreeMap<String, String>)> {
        self.rules.iter().find_map(|rule| {
            let caps = rule.regex.captures(line)?;
            let fields = rule
                .regex
                .capture_names()
                .flatten()
                .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect();
            Some((rule.category.as_str(), fields))
        })
    }

    /// Classify log lines into per-category capture frequencies
    pub fn classify<'a, I>(&self, lines: I) -> Diagnostics
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut result: Diagnostics = BTreeMap::new();
        let mut index: HashMap<(String, BTreeMap<String, String>), usize> = HashMap::new();

        for line in lines {
            let Some((category, captures)) = self.categorize(line) else {
                continue;
            };
            let entries = result.entry(category.to_string()).or_default();
            let key = (category.to_string(), captures);

            match index.get(&key) {
                Some(&pos) => entries[pos].frequency += 1,
                None => {
                    index.insert(key.clone(), entries.len());
                    entries.push(CaptureCount {
                        captures: key.1,
                        frequency: 1,
                    });
                }
            }
        }

        result
    }
}
