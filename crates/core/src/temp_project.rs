//! Produces a minimal dev-container workspace from a base image and a list
//! of feature ids — the Temp Project Generator (spec §4.7), used by the
//! `devfeat features test` command to drive the ordinary build path against
//! a synthetic configuration.
//!
//! Grounded on `config.rs`'s `DevContainerConfig`/JSON5 writing conventions.

use crate::errors::{ConfigError, EngineError, Result};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Generates `<tmp>/vsch/container-features-test/<timestamp>/.devcontainer/devcontainer.json`
/// mapping `"<collection_path>/<feature_id>": "latest"` for each feature id, and
/// returns the generated project's root folder.
#[instrument(skip(feature_ids))]
pub fn generate_test_project(
    base_image: &str,
    collection_path: &str,
    feature_ids: &[String],
) -> Result<PathBuf> {
    generate_test_project_under(
        &std::env::temp_dir(),
        base_image,
        collection_path,
        feature_ids,
    )
}

/// As [`generate_test_project`], but rooted under an explicit tmp directory
/// so tests don't touch the real system temp dir.
pub fn generate_test_project_under(
    tmp_root: &Path,
    base_image: &str,
    collection_path: &str,
    feature_ids: &[String],
) -> Result<PathBuf> {
    let timestamp = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let project_root = tmp_root
        .join("vsch")
        .join("container-features-test")
        .join(format!("{timestamp:x}{:x}", nanos as u64));
    let devcontainer_dir = project_root.join(".devcontainer");
    std::fs::create_dir_all(&devcontainer_dir)?;

    let mut features = Map::new();
    for id in feature_ids {
        features.insert(format!("{collection_path}/{id}"), json!("latest"));
    }

    let document = json!({
        "image": base_image,
        "features": Value::Object(features),
    });

    let rendered = serde_json::to_string_pretty(&document).map_err(|e| {
        EngineError::Config(ConfigError::Validation(format!(
            "failed to render generated devcontainer.json: {e}"
        )))
    })?;

    let config_path = devcontainer_dir.join("devcontainer.json");
    std::fs::write(&config_path, rendered)?;

    debug!(path = %config_path.display(), features = feature_ids.len(), "generated test project");
    Ok(project_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_devcontainer_json_with_image_and_features() {
        let tmp = TempDir::new().unwrap();
        let ids = vec!["helloworld".to_string(), "node".to_string()];

        let root =
            generate_test_project_under(tmp.path(), "ubuntu:22.04", "octocat/myfeatures", &ids)
                .unwrap();

        let content =
            std::fs::read_to_string(root.join(".devcontainer").join("devcontainer.json")).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();

        assert_eq!(parsed["image"], "ubuntu:22.04");
        assert_eq!(parsed["features"]["octocat/myfeatures/helloworld"], "latest");
        assert_eq!(parsed["features"]["octocat/myfeatures/node"], "latest");
    }

    #[test]
    fn empty_feature_list_yields_empty_features_object() {
        let tmp = TempDir::new().unwrap();
        let root = generate_test_project_under(tmp.path(), "ubuntu:22.04", "octocat/x", &[])
            .unwrap();

        let content =
            std::fs::read_to_string(root.join(".devcontainer").join("devcontainer.json")).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert!(parsed["features"].as_object().unwrap().is_empty());
    }

    #[test]
    fn project_root_is_nested_under_container_features_test() {
        let tmp = TempDir::new().unwrap();
        let root = generate_test_project_under(tmp.path(), "ubuntu:22.04", "x", &[]).unwrap();
        assert!(root.starts_with(tmp.path().join("vsch").join("container-features-test")));
    }
}
