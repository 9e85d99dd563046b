//! Groups resolved features by source, reads per-feature metadata, and
//! computes inclusion — the Feature Set Assembler (spec §4.4).
//!
//! Grounded on the inherited `feature_installer.rs`'s per-source grouping
//! conventions and `features.rs`'s metadata lookup.

use crate::features::{find_feature_metadata, FeatureMetadata, OptionValue};
use crate::identifier::{resolve_identifier, ResolvedIdentifier, SourceInfoKey, SourceInformation};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// The value a user selected for a feature: either a bare scalar (commonly
/// `"latest"`) or a structured option map.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Scalar(String),
    Options(HashMap<String, OptionValue>),
}

impl FeatureValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut options = HashMap::new();
                for (k, v) in map {
                    if let Some(ov) = json_to_option_value(v) {
                        options.insert(k.clone(), ov);
                    }
                }
                FeatureValue::Options(options)
            }
            other => FeatureValue::Scalar(
                other
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            ),
        }
    }
}

fn json_to_option_value(v: &Value) -> Option<OptionValue> {
    match v {
        Value::Bool(b) => Some(OptionValue::Boolean(*b)),
        Value::String(s) => Some(OptionValue::String(s.clone())),
        Value::Number(n) => n.as_f64().map(OptionValue::Number),
        _ => None,
    }
}

/// A resolved feature within a [`FeatureSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub value: FeatureValue,
    pub build_arg: Option<String>,
    pub container_env: HashMap<String, String>,
    pub options: HashMap<String, OptionValue>,
    pub included: bool,
}

/// All features sharing one [`SourceInformation`] (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub source_information: SourceInformation,
    pub features: Vec<Feature>,
    pub dst_folder: PathBuf,
}

impl FeatureSet {
    pub fn source_info_string(&self) -> SourceInfoKey {
        self.source_information.source_info_string()
    }
}

/// The full set of feature sets for one build (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturesConfig {
    pub feature_sets: Vec<FeatureSet>,
    pub dst_folder: PathBuf,
}

/// Assembles a [`FeaturesConfig`] from a user's `features` mapping.
///
/// `user_features` must preserve declaration order (an [`IndexMap`]): the
/// order features are first encountered here is the order feature sets are
/// emitted in, which is load-bearing for build-cache determinism (spec §5).
///
/// `metadata_for` loads the `devcontainer-features.json` records for a given
/// source (typically by reading the fetched payload's metadata file);
/// returning `None` means no metadata is available and fields fall back to
/// conservative defaults. `inclusion_policy` is the external product-policy
/// predicate deciding whether a feature should be built in at all.
pub fn assemble_features_config(
    user_features: &IndexMap<String, Value>,
    dst_folder: &std::path::Path,
    metadata_for: impl Fn(&SourceInfoKey) -> Option<Vec<FeatureMetadata>>,
    inclusion_policy: impl Fn(&str) -> bool,
) -> FeaturesConfig {
    let mut sets: IndexMap<SourceInfoKey, FeatureSet> = IndexMap::new();

    for (raw_id, value) in user_features {
        let resolved = resolve_identifier(raw_id);
        let (source, feature_id) = match resolved {
            ResolvedIdentifier::Resolved { source, feature_id } => (source, feature_id),
            ResolvedIdentifier::Rejected { reason } => {
                debug!(identifier = %raw_id, reason = %reason, "skipping unrecognized feature identifier");
                continue;
            }
        };

        let key = source.source_info_string();
        let set = sets.entry(key.clone()).or_insert_with(|| FeatureSet {
            source_information: source.clone(),
            features: Vec::new(),
            dst_folder: dst_folder.join(&key.0),
        });

        let metadata = metadata_for(&key).and_then(|records| {
            find_feature_metadata(&records, &feature_id).cloned()
        });

        let is_local_cache = matches!(source, SourceInformation::LocalCache);
        let included = is_local_cache || inclusion_policy(&feature_id);

        let build_arg = metadata.as_ref().and_then(|m| m.build_arg.clone());
        let container_env = metadata
            .as_ref()
            .map(|m| m.container_env.clone())
            .unwrap_or_default();
        let declared_options = metadata.as_ref().map(|m| m.options.clone()).unwrap_or_default();

        let feature_value = FeatureValue::from_json(value);
        let options = match &feature_value {
            FeatureValue::Options(opts) => {
                let mut merged = declared_options;
                merged.extend(opts.clone());
                merged
            }
            FeatureValue::Scalar(_) => declared_options,
        };

        set.features.push(Feature {
            id: feature_id,
            value: feature_value,
            build_arg,
            container_env,
            options,
            included,
        });
    }

    FeaturesConfig {
        feature_sets: sets.into_values().collect(),
        dst_folder: dst_folder.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_metadata(_: &SourceInfoKey) -> Option<Vec<FeatureMetadata>> {
        None
    }

    #[test]
    fn groups_features_by_source_info_string() {
        let mut features = IndexMap::new();
        features.insert("helloworld".to_string(), json!("latest"));
        features.insert("octocat/myfeatures/other".to_string(), json!("latest"));

        let config = assemble_features_config(
            &features,
            std::path::Path::new("/tmp/dst"),
            no_metadata,
            |_| true,
        );

        assert_eq!(config.feature_sets.len(), 2);
        assert_eq!(config.feature_sets[0].features[0].id, "helloworld");
        assert_eq!(config.feature_sets[1].features[0].id, "other");
    }

    #[test]
    fn local_cache_features_are_always_included() {
        let mut features = IndexMap::new();
        features.insert("helloworld".to_string(), json!("latest"));

        let config = assemble_features_config(
            &features,
            std::path::Path::new("/tmp/dst"),
            no_metadata,
            |_| false, // policy would reject everything
        );

        assert!(config.feature_sets[0].features[0].included);
    }

    #[test]
    fn non_local_cache_features_respect_inclusion_policy() {
        let mut features = IndexMap::new();
        features.insert("octocat/myfeatures/helloworld".to_string(), json!("latest"));

        let config = assemble_features_config(
            &features,
            std::path::Path::new("/tmp/dst"),
            no_metadata,
            |_| false,
        );

        assert!(!config.feature_sets[0].features[0].included);
    }

    #[test]
    fn rejected_identifiers_are_skipped_without_failing() {
        let mut features = IndexMap::new();
        features.insert("octocat/myfeatures/@x".to_string(), json!("latest"));
        features.insert("helloworld".to_string(), json!("latest"));

        let config = assemble_features_config(
            &features,
            std::path::Path::new("/tmp/dst"),
            no_metadata,
            |_| true,
        );

        assert_eq!(config.feature_sets.len(), 1);
        assert_eq!(config.feature_sets[0].features[0].id, "helloworld");
    }

    #[test]
    fn metadata_supplies_build_arg_and_container_env() {
        let mut features = IndexMap::new();
        features.insert("node".to_string(), json!("18"));

        let metadata_for = |_key: &SourceInfoKey| {
            Some(vec![FeatureMetadata {
                id: "node".to_string(),
                name: None,
                options: HashMap::new(),
                build_arg: Some("NODE_VERSION".to_string()),
                container_env: HashMap::from([("NODE_HOME".to_string(), "/usr/local/node".to_string())]),
                entrypoint: None,
            }])
        };

        let config = assemble_features_config(
            &features,
            std::path::Path::new("/tmp/dst"),
            metadata_for,
            |_| true,
        );

        let feature = &config.feature_sets[0].features[0];
        assert_eq!(feature.build_arg.as_deref(), Some("NODE_VERSION"));
        assert_eq!(feature.container_env.get("NODE_HOME").unwrap(), "/usr/local/node");
    }

    #[test]
    fn feature_set_dst_folder_is_nested_under_source_info_string() {
        let mut features = IndexMap::new();
        features.insert("helloworld".to_string(), json!("latest"));

        let config = assemble_features_config(
            &features,
            std::path::Path::new("/tmp/dst"),
            no_metadata,
            |_| true,
        );

        assert_eq!(
            config.feature_sets[0].dst_folder,
            std::path::PathBuf::from("/tmp/dst/local-cache")
        );
        assert_eq!(config.dst_folder, std::path::PathBuf::from("/tmp/dst"));
    }

    #[test]
    fn object_value_becomes_options_merged_with_declared_options() {
        let mut features = IndexMap::new();
        features.insert("node".to_string(), json!({"version": "20"}));

        let config = assemble_features_config(
            &features,
            std::path::Path::new("/tmp/dst"),
            no_metadata,
            |_| true,
        );

        match &config.feature_sets[0].features[0].value {
            FeatureValue::Options(opts) => {
                assert_eq!(opts.get("version").unwrap().as_str(), Some("20"));
            }
            other => panic!("expected Options, got {other:?}"),
        }
    }
}
