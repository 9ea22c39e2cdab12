//! # Loader
//!
//! Root-restricted, recursive reading of kustomization trees. A loader
//! is anchored at a directory; `load` reads files relative to it, and
//! `new` descends into a base: a relative directory, or a remote git
//! spec that is cloned to a temp directory first.
//!
//! Cycle detection: every loader carries the chain of roots and raw
//! remote specs that led to it; descending into anything already on the
//! chain is fatal.

use crate::error::Error;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

pub mod cloner;
pub mod repospec;

pub use repospec::RepoSpec;

/// How strictly file reads are confined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRestriction {
    /// Files must live in or below the loader's root.
    RootOnly,
    /// Any readable path is accepted. For trusted callers only.
    None,
}

/// A reader anchored at a directory.
#[derive(Debug, Clone)]
pub struct Loader {
    root: PathBuf,
    restriction: LoadRestriction,
    referral_chain: Vec<String>,
    // Keeps remote clones alive as long as any loader derived from them.
    clones: Vec<Arc<TempDir>>,
}

impl Loader {
    /// A root-only loader anchored at `path`.
    pub fn new_at_root(path: &Path) -> Result<Loader> {
        Loader::at_root_with_restriction(path, LoadRestriction::RootOnly)
    }

    /// An unrestricted loader; used by trusted CLIs and test harnesses.
    pub fn new_unrestricted(path: &Path) -> Result<Loader> {
        Loader::at_root_with_restriction(path, LoadRestriction::None)
    }

    fn at_root_with_restriction(path: &Path, restriction: LoadRestriction) -> Result<Loader> {
        let root = fs::canonicalize(path)
            .map_err(|e| Error::NotFound(format!("root {}: {e}", path.display())))?;
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "root {} is not a directory",
                root.display()
            ))
            .into());
        }
        let chain_entry = root.display().to_string();
        Ok(Loader {
            root,
            restriction,
            referral_chain: vec![chain_entry],
            clones: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a file. Relative paths resolve under the root; under root-only
    /// restriction the resolved path must stay in or below the root.
    pub fn load(&self, path: &str) -> Result<Vec<u8>> {
        let requested = Path::new(path);
        let full = if requested.is_absolute() {
            if self.restriction == LoadRestriction::RootOnly {
                return Err(Error::Forbidden(format!(
                    "security; absolute path {path} is not in or below {}",
                    self.root.display()
                ))
                .into());
            }
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };
        let resolved = fs::canonicalize(&full)
            .map_err(|e| Error::NotFound(format!("{}: {e}", full.display())))?;
        if self.restriction == LoadRestriction::RootOnly && !resolved.starts_with(&self.root) {
            return Err(Error::Forbidden(format!(
                "security; file {path} is not in or below {}",
                self.root.display()
            ))
            .into());
        }
        fs::read(&resolved).with_context(|| format!("reading {}", resolved.display()))
    }

    /// File names directly under the root, for descriptor discovery.
    pub fn file_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).max_depth(1).into_iter() {
            let entry =
                entry.with_context(|| format!("listing {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Descend into a base: a relative directory, or a remote git spec
    /// that gets cloned first.
    pub fn new(&self, path: &str) -> Result<Loader> {
        if path.is_empty() {
            return Err(Error::NotFound("new root cannot be empty".to_string()).into());
        }
        if let Ok(spec) = RepoSpec::from_url(path) {
            return self.new_at_git_clone(spec);
        }
        if Path::new(path).is_absolute() {
            return Err(
                Error::Forbidden(format!("new root cannot be absolute: {path}")).into(),
            );
        }
        let dir = fs::canonicalize(self.root.join(path))
            .map_err(|e| Error::NotFound(format!("base {path}: {e}")))?;
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "base {path} resolves to a file, expected a directory"
            ))
            .into());
        }
        let candidate = dir.display().to_string();
        for ancestor in &self.referral_chain {
            let ancestor_path = Path::new(ancestor);
            if ancestor_path == dir || ancestor_path.starts_with(&dir) {
                return Err(Error::Cycle(format!(
                    "candidate root {candidate} contains visited root {ancestor}"
                ))
                .into());
            }
        }
        debug!("descending into {candidate}");
        let mut referral_chain = self.referral_chain.clone();
        referral_chain.push(candidate);
        Ok(Loader {
            root: dir,
            restriction: self.restriction,
            referral_chain,
            clones: self.clones.clone(),
        })
    }

    fn new_at_git_clone(&self, spec: RepoSpec) -> Result<Loader> {
        if self.referral_chain.iter().any(|raw| raw == &spec.raw) {
            return Err(Error::Cycle(format!(
                "cycle detected: {} was already visited",
                spec.raw
            ))
            .into());
        }
        let clone = cloner::clone_repo(&spec)
            .with_context(|| format!("cloning {}", spec.raw))?;
        let subdir = clone.path().join(spec.path.trim_start_matches('/'));
        let root = fs::canonicalize(&subdir).map_err(|e| {
            Error::NotFound(format!("path {} in clone of {}: {e}", spec.path, spec.raw))
        })?;
        let mut referral_chain = self.referral_chain.clone();
        referral_chain.push(spec.raw.clone());
        let mut clones = self.clones.clone();
        clones.push(Arc::new(clone));
        Ok(Loader {
            root,
            restriction: self.restriction,
            referral_chain,
            clones,
        })
    }
}
