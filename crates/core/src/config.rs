//! Loads and discovers `devcontainer.json`/`.devcontainer.json` documents.
//!
//! The engine reads only a handful of top-level keys itself (`image`,
//! `features`, `remoteUser`, `updateRemoteUserUID`, `overrideFeatureInstallOrder`
//! — spec §3); everything else is opaque to it. The document is kept in two
//! forms: [`DevContainerConfig`] for the fields the engine acts on directly,
//! and the raw [`serde_json::Value`] the Config Merger (§4.3) operates over,
//! since merge policy is keyed by arbitrary top-level key names the loader
//! does not itself know the shape of.
//!
//! Grounded on the inherited `config.rs`'s JSON5 discovery/load pipeline,
//! trimmed to this engine's field set.

use crate::errors::{ConfigError, EngineError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

fn default_empty_object() -> Value {
    Value::Object(Default::default())
}

/// Location a configuration file was (or would be) discovered at.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub exists: bool,
}

impl ConfigLocation {
    pub fn new(path: PathBuf) -> Self {
        let exists = path.exists();
        Self { path, exists }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.exists
    }
}

/// The subset of `devcontainer.json` the engine reads directly (spec §3).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevContainerConfig {
    pub image: Option<String>,

    #[serde(default = "default_empty_object")]
    pub features: Value,

    pub remote_user: Option<String>,

    #[serde(default)]
    pub update_remote_user_uid: Option<bool>,

    /// Governs feature build/install ordering relative to the features map
    /// (treated by this engine as the "extension-policy keys" spec §3
    /// refers to — see DESIGN.md Open Question decisions).
    #[serde(default)]
    pub override_feature_install_order: Vec<String>,
}

impl Default for DevContainerConfig {
    fn default() -> Self {
        Self {
            image: None,
            features: default_empty_object(),
            remote_user: None,
            update_remote_user_uid: None,
            override_feature_install_order: Vec::new(),
        }
    }
}

impl DevContainerConfig {
    /// The `features` map as an ordered `id -> value` table, the shape the
    /// Feature Set Assembler (§4.4) consumes. Preserves document order
    /// because `serde_json`'s `preserve_order` feature backs `Value::Object`
    /// with an `IndexMap`.
    pub fn features_map(&self) -> indexmap::IndexMap<String, Value> {
        match &self.features {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => indexmap::IndexMap::new(),
        }
    }
}

/// A loaded configuration: the typed known-field view plus the raw document
/// the Config Merger needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    pub typed: DevContainerConfig,
    pub raw: Value,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Searches `.devcontainer/devcontainer.json` then `.devcontainer.json`.
    /// Returns the first preference even when neither exists, so callers can
    /// decide how to handle a missing configuration.
    #[instrument(skip_all, fields(workspace = %workspace.display()))]
    pub fn discover_config(workspace: &Path) -> Result<ConfigLocation> {
        if !workspace.exists() {
            return Err(EngineError::Config(ConfigError::NotFound(
                workspace.to_path_buf(),
            )));
        }

        let search_paths = [
            workspace.join(".devcontainer").join("devcontainer.json"),
            workspace.join(".devcontainer.json"),
        ];

        for path in &search_paths {
            if path.exists() {
                debug!(path = %path.display(), "found configuration file");
                return Ok(ConfigLocation::new(path.clone()));
            }
        }

        Ok(ConfigLocation::new(search_paths[0].clone()))
    }

    /// Reads, JSON5-parses, and deserializes a configuration file, validating
    /// the handful of constraints the engine cares about.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_from_path(path: &Path) -> Result<LoadedConfig> {
        if !path.exists() {
            return Err(EngineError::Config(ConfigError::NotFound(
                path.to_path_buf(),
            )));
        }

        let content = std::fs::read_to_string(path)?;

        let raw: Value = json5::from_str(&content).map_err(|e| {
            EngineError::Config(ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })?;

        let typed: DevContainerConfig = serde_json::from_value(raw.clone()).map_err(|e| {
            EngineError::Config(ConfigError::Parse {
                path: path.to_path_buf(),
                message: format!("deserializing known fields: {e}"),
            })
        })?;

        Ok(LoadedConfig { typed, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn default_features_is_an_empty_object() {
        let config = DevContainerConfig::default();
        assert!(config.features.is_object());
        assert!(config.features_map().is_empty());
    }

    #[test]
    fn loads_config_with_comments_and_trailing_commas() {
        let content = r#"{
            // a comment
            "image": "ubuntu:22.04",
            "features": {
                "helloworld": "latest",
            },
            "remoteUser": "vscode",
        }"#;
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, content.as_bytes()).unwrap();

        let loaded = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(loaded.typed.image.as_deref(), Some("ubuntu:22.04"));
        assert_eq!(loaded.typed.remote_user.as_deref(), Some("vscode"));
        assert_eq!(loaded.typed.features_map().get("helloworld").unwrap(), "latest");
        assert!(loaded.raw.get("features").is_some());
    }

    #[test]
    fn missing_file_is_not_found_error() {
        let err = ConfigLoader::load_from_path(Path::new("/nonexistent/devcontainer.json"))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"{ not json5 at all :::").unwrap();
        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn discover_prefers_devcontainer_dir_over_root_file() {
        let temp = TempDir::new().unwrap();
        let dir_path = temp.path().join(".devcontainer");
        std::fs::create_dir_all(&dir_path).unwrap();
        std::fs::write(dir_path.join("devcontainer.json"), "{}").unwrap();
        std::fs::write(temp.path().join(".devcontainer.json"), "{}").unwrap();

        let location = ConfigLoader::discover_config(temp.path()).unwrap();
        assert_eq!(location.path(), &dir_path.join("devcontainer.json"));
    }

    #[test]
    fn discover_returns_preferred_path_when_nothing_exists() {
        let temp = TempDir::new().unwrap();
        let location = ConfigLoader::discover_config(temp.path()).unwrap();
        assert!(!location.exists());
        assert_eq!(
            location.path(),
            &temp.path().join(".devcontainer").join("devcontainer.json")
        );
    }

    #[test]
    fn discover_errors_when_workspace_is_missing() {
        let err = ConfigLoader::discover_config(Path::new("/nonexistent/workspace")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn features_map_preserves_declaration_order() {
        let content = r#"{
            "features": { "b": "1", "a": "2", "c": "3" }
        }"#;
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, content.as_bytes()).unwrap();
        let loaded = ConfigLoader::load_from_path(file.path()).unwrap();
        let keys: Vec<_> = loaded.typed.features_map().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }
}
