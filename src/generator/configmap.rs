//! Generate a ConfigMap from literals, files and env files.

use crate::error::Error;
use crate::generator::{load_kv_pairs, make_generated_resource, Generator};
use crate::kustfile::{GeneratorArgs, GeneratorOptions};
use crate::loader::Loader;
use crate::resource::Resource;
use anyhow::Result;
use serde_yaml::{Mapping, Value};

pub struct ConfigMapGenerator {
    args: GeneratorArgs,
    options: Option<GeneratorOptions>,
}

impl ConfigMapGenerator {
    pub fn new(args: GeneratorArgs, options: Option<GeneratorOptions>) -> Self {
        ConfigMapGenerator { args, options }
    }
}

impl Generator for ConfigMapGenerator {
    fn generate(&self, ldr: &Loader) -> Result<Resource> {
        let mut data = Mapping::new();
        for (key, value) in load_kv_pairs(ldr, &self.args)? {
            let text = String::from_utf8(value).map_err(|_| {
                Error::MalformedInput(format!(
                    "ConfigMap key {key:?} of {:?} has a non-UTF-8 value",
                    self.args.name
                ))
            })?;
            data.insert(Value::from(key), Value::from(text));
        }
        make_generated_resource("ConfigMap", &self.args, self.options.as_ref(), data, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;
    use std::fs;
    use tempfile::TempDir;

    fn loader_with(files: &[(&str, &str)]) -> (TempDir, Loader) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let ldr = Loader::new_at_root(dir.path()).unwrap();
        (dir, ldr)
    }

    #[test]
    fn literals_files_and_envs_combine() {
        let (_dir, ldr) = loader_with(&[
            ("app.properties", "verbose=true\n"),
            ("settings.env", "MODE=fast\n# comment\n\nRETRIES=3\n"),
        ]);
        let args = GeneratorArgs {
            name: "app-config".to_string(),
            literals: vec!["COLOR=blue".to_string()],
            files: vec!["app.properties".to_string()],
            envs: vec!["settings.env".to_string()],
            ..GeneratorArgs::default()
        };
        let r = ConfigMapGenerator::new(args, None).generate(&ldr).unwrap();
        assert_eq!(r.name(), "app-config");
        assert!(r.need_hash_suffix());
        let data = r.map().get("data").unwrap();
        assert_eq!(data.get("COLOR").unwrap().as_str(), Some("blue"));
        assert_eq!(
            data.get("app.properties").unwrap().as_str(),
            Some("verbose=true\n")
        );
        assert_eq!(data.get("MODE").unwrap().as_str(), Some("fast"));
        assert_eq!(data.get("RETRIES").unwrap().as_str(), Some("3"));
    }

    #[test]
    fn duplicate_keys_across_sources_are_fatal() {
        let (_dir, ldr) = loader_with(&[("dup.env", "COLOR=red\n")]);
        let args = GeneratorArgs {
            name: "app-config".to_string(),
            literals: vec!["COLOR=blue".to_string()],
            envs: vec!["dup.env".to_string()],
            ..GeneratorArgs::default()
        };
        let err = ConfigMapGenerator::new(args, None).generate(&ldr).unwrap_err();
        assert!(format!("{err:#}").contains("another key by that name"));
    }

    #[test]
    fn named_file_key_overrides_basename() {
        let (_dir, ldr) = loader_with(&[("data.txt", "payload")]);
        let args = GeneratorArgs {
            name: "cm".to_string(),
            files: vec!["renamed=data.txt".to_string()],
            ..GeneratorArgs::default()
        };
        let r = ConfigMapGenerator::new(args, None).generate(&ldr).unwrap();
        let data = r.map().get("data").unwrap();
        assert_eq!(data.get("renamed").unwrap().as_str(), Some("payload"));
        assert!(data.get("data.txt").is_none());
    }
}
