//! Generate a Secret from literals, files and env files. Values are
//! base64-encoded into `data`; the type defaults to `Opaque`.

use crate::generator::{load_kv_pairs, make_generated_resource, Generator};
use crate::kustfile::{GeneratorOptions, SecretArgs};
use crate::loader::Loader;
use crate::resource::Resource;
use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use serde_yaml::{Mapping, Value};

const DEFAULT_SECRET_TYPE: &str = "Opaque";

pub struct SecretGenerator {
    args: SecretArgs,
    options: Option<GeneratorOptions>,
}

impl SecretGenerator {
    pub fn new(args: SecretArgs, options: Option<GeneratorOptions>) -> Self {
        SecretGenerator { args, options }
    }
}

impl Generator for SecretGenerator {
    fn generate(&self, ldr: &Loader) -> Result<Resource> {
        let mut data = Mapping::new();
        for (key, value) in load_kv_pairs(ldr, &self.args.generator_args)? {
            let encoded = general_purpose::STANDARD.encode(&value);
            data.insert(Value::from(key), Value::from(encoded));
        }
        let secret_type = if self.args.secret_type.is_empty() {
            DEFAULT_SECRET_TYPE
        } else {
            self.args.secret_type.as_str()
        };
        make_generated_resource(
            "Secret",
            &self.args.generator_args,
            self.options.as_ref(),
            data,
            vec![("type", Value::from(secret_type))],
        )
    }
}
