// src/cache/key.rs

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::Result;
use crate::model::DataMap;
use crate::store::sha256_hex;

/// Identity of the backend a response came from, as far as caching cares.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub opts: DataMap,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            opts: DataMap::new(),
        }
    }

    pub fn with_opt(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.opts.insert(key.into(), value.into());
        self
    }
}

/// 64-char hex SHA-256 over the canonical JSON of
/// `{backend: {name, model, opts}, step, inputs, code_version}`.
///
/// Canonical JSON (RFC 8785) sorts object keys at every depth and drops all
/// insignificant whitespace, so the key depends only on the values.
pub fn compute_cache_key(
    backend: &BackendConfig,
    step_id: &str,
    inputs: &Value,
    code_version: &str,
) -> Result<String> {
    let material = json!({
        "backend": {
            "name": backend.name,
            "model": backend.model,
            "opts": backend.opts,
        },
        "step": step_id,
        "inputs": inputs,
        "code_version": code_version,
    });

    let bytes = serde_json_canonicalizer::to_vec(&material)?;
    Ok(sha256_hex(bytes))
}
