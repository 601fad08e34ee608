// src/error.rs

//! Error types for toolsweep
//!
//! Only run-scoped failures are represented here. Failures scoped to a
//! single package (unresolved dependencies, failed builds) are recorded as
//! data in the build plan and build results instead.

use thiserror::Error;

/// Run-scoped errors
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration (redirect rules, error patterns, overrides)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dependency cycle that no configured cycle-break rule resolves
    #[error("Unbreakable dependency cycle among: {}", members.join(", "))]
    UnbreakableCycle { members: Vec<String> },

    /// The isolated execution substrate failed
    #[error("Environment error: {0}")]
    Environment(String),

    /// Artifact publication was refused or could not complete
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Interceptor generation failed
    #[error("Redirect error: {0}")]
    Redirect(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
