// src/artifacts.rs

//! Shared artifact repository
//!
//! Built packages are published here and installed from here into the
//! environments of later builds. The repository is keyed by package name
//! and each key is written at most once.
//!
//! Publication stages the artifact in a temporary directory inside the
//! repository and renames it into place, so readers see either nothing or
//! a complete artifact. A build producing several names publishes all of
//! them or none.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File inside each artifact directory holding its digest
pub const DIGEST_FILE: &str = ".sha256";

/// Single-writer-per-name artifact store
#[derive(Debug, Clone)]
pub struct ArtifactRepository {
    root: PathBuf,
}

impl ArtifactRepository {
    /// Open a repository, creating its directory if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root)?;
            debug!("Created artifact repository: {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains('/') {
            return Err(Error::Publish(format!("invalid artifact name '{}'", name)));
        }
        Ok(self.root.join(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|p| p.exists())
    }

    /// Publish `source` (a file or directory) under `name`
    ///
    /// Fails if the name was already published. Returns the sha256 digest.
    pub fn publish(&self, name: &str, source: &Path) -> Result<String> {
        let mut digests = self.publish_all(&[(name.to_string(), source.to_path_buf())])?;
        digests
            .pop()
            .ok_or_else(|| Error::Publish(format!("nothing published for '{}'", name)))
    }

    /// Publish every `(name, source)` pair of one build, or none of them
    ///
    /// Everything is staged before the first rename. If a rename fails, the
    /// names this call already moved into place are removed again. Returns
    /// the digests in input order.
    pub fn publish_all(&self, artifacts: &[(String, PathBuf)]) -> Result<Vec<String>> {
        let mut seen = BTreeSet::new();
        let mut dests = Vec::with_capacity(artifacts.len());
        for (name, source) in artifacts {
            let dest = self.path_for(name)?;
            if !seen.insert(name.as_str()) {
                return Err(Error::Publish(format!("artifact '{}' listed twice", name)));
            }
            if dest.exists() {
                return Err(Error::Publish(format!("artifact '{}' is already published", name)));
            }
            if !source.exists() {
                return Err(Error::Publish(format!(
                    "build produced no artifact for '{}' at {}",
                    name,
                    source.display()
                )));
            }
            dests.push(dest);
        }

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?;
        let mut digests = Vec::with_capacity(artifacts.len());
        for (name, source) in artifacts {
            digests.push(stage(source, &staging.path().join(name))?);
        }

        let mut moved: Vec<&Path> = Vec::with_capacity(dests.len());
        for ((name, _), dest) in artifacts.iter().zip(&dests) {
            // rename() refuses a non-empty destination, so a racing second
            // publisher fails here instead of replacing the first
            if let Err(e) = fs::rename(staging.path().join(name), dest) {
                for done in moved {
                    if let Err(cleanup) = fs::remove_dir_all(done) {
                        warn!(artifact = %done.display(), error = %cleanup, "cannot withdraw artifact");
                    }
                }
                return Err(Error::Publish(format!("cannot publish '{}': {}", name, e)));
            }
            moved.push(dest);
        }

        for ((name, _), digest) in artifacts.iter().zip(&digests) {
            debug!("Published artifact {} ({})", name, digest);
        }
        Ok(digests)
    }

    /// Copy a published artifact into `dest`
    pub fn install_into(&self, name: &str, dest: &Path) -> Result<()> {
        let src = self.path_for(name)?;
        if !src.exists() {
            return Err(Error::Environment(format!("artifact '{}' is not published", name)));
        }
        copy_tree(&src, dest)
    }

    /// Stored digest of a published artifact
    pub fn digest(&self, name: &str) -> Result<String> {
        let path = self.path_for(name)?.join(DIGEST_FILE);
        Ok(fs::read_to_string(path)?.trim().to_string())
    }
}

/// Copy one artifact into `staged` and record its digest there
fn stage(source: &Path, staged: &Path) -> Result<String> {
    if source.is_dir() {
        copy_tree(source, staged)?;
    } else {
        fs::create_dir_all(staged)?;
        let file_name = source.file_name().unwrap_or(source.as_os_str());
        fs::copy(source, staged.join(file_name))?;
    }

    let digest = tree_digest(staged)?;
    fs::write(staged.join(DIGEST_FILE), format!("{}\n", digest))?;
    Ok(digest)
}

/// Recursively copy a directory tree
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// sha256 over every file's relative path and content, in sorted order
fn tree_digest(root: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(entry.path())?);
    }
    Ok(hex::encode(hasher.finalize()))
}
