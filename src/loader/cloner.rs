//! Obtain a local clone of a remote repo with the `git` binary found on
//! PATH: init an empty repository in a temp directory, add the remote,
//! shallow-fetch the requested ref (or `master`), hard-reset to
//! FETCH_HEAD, and bring in submodules. The temp directory is owned by the
//! loader chain and removed when the last loader referencing it drops.

use crate::error::Error;
use crate::loader::repospec::RepoSpec;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use tracing::debug;

const DEFAULT_REF: &str = "master";

pub fn clone_repo(spec: &RepoSpec) -> Result<TempDir> {
    let clone_dir = TempDir::new().context("creating clone directory")?;
    let clone_spec = spec.clone_spec();
    debug!("cloning {clone_spec} into {}", clone_dir.path().display());

    run_git(None, &["init", &clone_dir.path().display().to_string()])
        .with_context(|| format!("trouble initializing empty git repo in {}", clone_dir.path().display()))?;
    run_git(Some(clone_dir.path()), &["remote", "add", "origin", &clone_spec])
        .with_context(|| format!("trouble adding remote {clone_spec}"))?;

    let git_ref = if spec.git_ref.is_empty() {
        DEFAULT_REF
    } else {
        &spec.git_ref
    };
    run_git(
        Some(clone_dir.path()),
        &["fetch", "--depth=1", "origin", git_ref],
    )
    .with_context(|| format!("trouble fetching {git_ref}"))?;
    run_git(Some(clone_dir.path()), &["reset", "--hard", "FETCH_HEAD"])
        .with_context(|| format!("trouble hard resetting empty repository to {git_ref}"))?;
    run_git(
        Some(clone_dir.path()),
        &["submodule", "update", "--init", "--recursive"],
    )
    .with_context(|| format!("trouble fetching submodules for {git_ref}"))?;

    Ok(clone_dir)
}

fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .map_err(|e| Error::External(format!("no usable 'git' program on path: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::External(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        ))
        .into());
    }
    Ok(())
}
