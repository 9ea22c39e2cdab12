//! Shared harness for build scenario tests: writes a kustomization tree
//! into a temp directory, runs the target build, and hands back the
//! emitted YAML.

use anyhow::Result;
use kompost::loader::Loader;
use kompost::target::KustTarget;
use std::fs;
use tempfile::TempDir;

pub struct TestHarness {
    dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        TestHarness {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    /// Write a file, creating parent directories as needed.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    /// Write the kustomization descriptor of a directory.
    pub fn write_kustomization(&self, rel_dir: &str, content: &str) {
        let rel = if rel_dir.is_empty() {
            "kustomization.yaml".to_string()
        } else {
            format!("{rel_dir}/kustomization.yaml")
        };
        self.write(&rel, content);
    }

    pub fn target(&self, rel_dir: &str) -> Result<KustTarget> {
        let ldr = Loader::new_at_root(&self.dir.path().join(rel_dir))?;
        KustTarget::new(ldr)
    }

    /// Build and emit in declared order.
    pub fn build(&self, rel_dir: &str) -> Result<String> {
        self.target(rel_dir)?.make_customized_res_map()?.as_yaml()
    }

    /// Build and emit in legacy order.
    pub fn build_ordered(&self, rel_dir: &str) -> Result<String> {
        self.target(rel_dir)?.make_ordered_res_map()?.as_yaml()
    }
}
