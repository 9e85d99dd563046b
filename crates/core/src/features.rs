//! Parses `devcontainer-features.json`, the per-source metadata document that
//! accompanies a fetched feature payload (spec §6).
//!
//! Grounded on the inherited `features.rs`'s parse/validate/tracing-log
//! style, trimmed to the field set the engine actually reads: lifecycle
//! commands, mounts, and container capability flags are out of scope here
//! (they belong to the container's own lifecycle driver, not this engine).

use crate::errors::{ConfigError, EngineError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, instrument};

/// A single option value as it can appear in a feature's `options` map or in
/// a user's selected value for an option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Boolean(bool),
    String(String),
    Number(f64),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The literal string this value would be written as in a build-arg
    /// env file (spec §4.5(c)): booleans render as `true`/`false`, numbers
    /// without a trailing `.0` when they're integral.
    pub fn to_env_literal(&self) -> String {
        match self {
            OptionValue::Boolean(b) => b.to_string(),
            OptionValue::String(s) => s.clone(),
            OptionValue::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            OptionValue::Number(n) => n.to_string(),
        }
    }
}

/// One record of `devcontainer-features.json`'s array, per spec §6:
/// `{ id, name?, options?, buildArg?, containerEnv?, entrypoint? }`.
/// Unknown keys are ignored by `serde`'s default struct behavior (fields not
/// declared here are simply never deserialized into).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetadata {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub options: HashMap<String, OptionValue>,

    #[serde(default)]
    pub build_arg: Option<String>,

    #[serde(default)]
    pub container_env: HashMap<String, String>,

    #[serde(default)]
    pub entrypoint: Option<String>,
}

impl FeatureMetadata {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.is_empty() {
            return Err(EngineError::Config(ConfigError::Validation(
                "feature id is required and cannot be empty".to_string(),
            )));
        }
        Ok(())
    }
}

/// Parses the `devcontainer-features.json` array at `path` into its records.
#[instrument(level = "debug")]
pub fn parse_feature_metadata_file(path: &Path) -> Result<Vec<FeatureMetadata>, EngineError> {
    debug!("parsing feature metadata from {}", path.display());

    if !path.exists() {
        return Err(EngineError::Config(ConfigError::NotFound(path.to_path_buf())));
    }

    let content = std::fs::read_to_string(path)?;
    let records: Vec<FeatureMetadata> =
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    for record in &records {
        record.validate()?;
        debug!(id = %record.id, options = record.options.len(), "parsed feature metadata record");
    }

    Ok(records)
}

/// Looks up a single record by id within a parsed metadata file, the common
/// case when assembling one feature at a time (§4.4).
pub fn find_feature_metadata<'a>(
    records: &'a [FeatureMetadata],
    id: &str,
) -> Option<&'a FeatureMetadata> {
    records.iter().find(|r| r.id == id)
}
