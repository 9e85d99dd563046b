//! Builds a multi-stage container build recipe from a [`FeaturesConfig`] —
//! the Build Recipe Synthesizer (spec §4.5), the engine's centerpiece.
//!
//! Grounded on `dockerfile_generator.rs`'s ARG/FROM/RUN generation, its
//! env-var quoting (`format_env_var`) and feature-id sanitizing
//! (`sanitize_feature_id`), generalized into a typed stanza list per the
//! structured-template design note (§9): string concatenation happens only
//! in [`BuildRecipe::render`], everything upstream of it operates on plain
//! data so two recipes can be compared for determinism without rendering.

use crate::assemble::{Feature, FeatureSet, FeaturesConfig};
use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Reserved build-arg names (spec §6).
pub const BASE_IMAGE_ARG: &str = "_DEV_CONTAINERS_BASE_IMAGE";
pub const IMAGE_USER_ARG: &str = "_DEV_CONTAINERS_IMAGE_USER";
pub const FEATURE_CONTENT_SOURCE_ARG: &str = "_DEV_CONTAINERS_FEATURE_CONTENT_SOURCE";

const TARGET_STAGE: &str = "dev_containers_target_stage";
const CONTENT_SOURCE_STAGE: &str = "dev_containers_feature_content_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Advanced,
    Legacy,
}

/// How a fetched feature's payload expects to be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStyle {
    /// A single `install.sh`, run in the main feature layer.
    Script,
    /// `bin/acquire` (and optional `bin/configure`), run in its own stage.
    Staged { has_configure: bool },
}

/// Inspects a fetched feature's payload directory to decide its install
/// style. `root` is `dstFolder/<source-info-string>/features/<id>`.
pub fn detect_install_style(root: &Path) -> std::io::Result<InstallStyle> {
    if root.join("bin").join("acquire").is_file() {
        Ok(InstallStyle::Staged {
            has_configure: root.join("bin").join("configure").is_file(),
        })
    } else {
        Ok(InstallStyle::Script)
    }
}

/// `SAFE_ID` per spec §4.5(c): upper-cased id with `/` and `-` replaced by `_`.
pub fn safe_id(id: &str) -> String {
    id.to_uppercase().replace(['/', '-'], "_")
}

/// A single typed stanza of the build recipe. Order within
/// [`BuildRecipe::stanzas`] is the emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    /// The `ARG`/`FROM` pair that opens the recipe.
    Base { base_image: String },
    /// An intermediate stage for one `acquire`-style feature. Each branches
    /// directly off `dev_containers_target_stage`, not off any other
    /// `AcquireStage`, so these may appear in any relative order among
    /// themselves.
    AcquireStage {
        stage_name: String,
        source_info_string: String,
        feature_id: String,
    },
    /// Re-opens `dev_containers_target_stage` as the current stage after one
    /// or more `AcquireStage`s. Without this, the `COPY`/`RUN`/`ENV` stanzas
    /// that follow an `AcquireStage` would land inside that stage instead of
    /// the image being built — see spec §4.5's `copyFeatureBuildStages`.
    /// Only emitted when at least one `AcquireStage` precedes it.
    ReopenTargetStage,
    /// The shared layer installing every `install.sh`-style feature, in
    /// feature-set-then-feature-declaration order.
    FeatureLayer { commands: Vec<String> },
    /// `COPY --from=<stage>` plus, when present, a `configure` run.
    CopyStage {
        stage_name: String,
        feature_path: String,
        has_configure: bool,
        source_info_string: String,
    },
    /// One `ENV K=V` line.
    ContainerEnv { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipePrefix {
    /// Advanced-backend-only `# syntax=...` directive.
    pub syntax_directive: Option<String>,
    pub base_image: String,
    /// Legacy-backend-only: the pre-built content image tag (from
    /// [`crate::build::driver::build_content_image`]) used as the `FROM` of
    /// `dev_containers_feature_content_source`. Unused in advanced mode,
    /// where that stage name is instead supplied as a `--build-context`.
    pub content_image: Option<String>,
}

/// The `FROM scratch; COPY . /tmp/build-features/` Dockerfile built once,
/// separately, to produce the legacy-backend content image (spec §4.5(b)).
pub const CONTENT_BUILD_DOCKERFILE: &str = "FROM scratch\nCOPY . /tmp/build-features/\n";

#[derive(Debug, Clone, PartialEq)]
pub struct BuildRecipe {
    pub prefix: RecipePrefix,
    pub backend: BackendMode,
    pub stanzas: Vec<Stanza>,
}

impl BuildRecipe {
    /// Renders the recipe to Dockerfile-compatible text. The only function
    /// in this module that concatenates strings.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(directive) = &self.prefix.syntax_directive {
            let _ = writeln!(out, "# syntax={directive}");
        }
        let _ = writeln!(out, "ARG {BASE_IMAGE_ARG}={}", self.prefix.base_image);
        out.push('\n');

        if self.backend == BackendMode::Legacy {
            let image = self
                .prefix
                .content_image
                .as_deref()
                .unwrap_or("dev-containers-feature-content-source:local");
            let _ = writeln!(out, "FROM {image} AS {CONTENT_SOURCE_STAGE}\n");
        }

        let content_root = content_source_root(self.backend);

        for stanza in &self.stanzas {
            match stanza {
                Stanza::Base { base_image } => {
                    let _ = writeln!(out, "FROM {base_image} AS {TARGET_STAGE}\n");
                }
                Stanza::ReopenTargetStage => {
                    let _ = writeln!(out, "FROM {TARGET_STAGE}\n");
                }
                Stanza::AcquireStage {
                    stage_name,
                    source_info_string,
                    feature_id,
                } => {
                    let feature_path = format!("features/{feature_id}");
                    let _ = writeln!(out, "FROM {TARGET_STAGE} AS {stage_name}");
                    let _ = writeln!(
                        out,
                        "COPY --from={CONTENT_SOURCE_STAGE} {content_root}{source_info_string}/{feature_path} /tmp/build-features/{source_info_string}/{feature_path}"
                    );
                    let _ = writeln!(
                        out,
                        "COPY --from={CONTENT_SOURCE_STAGE} {content_root}{source_info_string}/common /tmp/build-features/{source_info_string}/common"
                    );
                    let _ = writeln!(
                        out,
                        "RUN cd /tmp/build-features/{source_info_string}/{feature_path} && \\\n    set -a && . ./devcontainer-features.env && set +a && \\\n    ./bin/acquire\n"
                    );
                }
                Stanza::FeatureLayer { commands } => {
                    for command in commands {
                        out.push_str(command);
                        out.push('\n');
                    }
                    out.push('\n');
                }
                Stanza::CopyStage {
                    stage_name,
                    feature_path,
                    has_configure,
                    source_info_string,
                } => {
                    let dst = format!("/usr/local/devcontainer-features/{source_info_string}/{feature_path}");
                    let _ = writeln!(out, "COPY --from={stage_name} {dst} {dst}");
                    if *has_configure {
                        let _ = writeln!(
                            out,
                            "RUN cd {dst} && \\\n    set -a && . ./devcontainer-features.env && set +a && \\\n    ./bin/configure\n"
                        );
                    }
                }
                Stanza::ContainerEnv { key, value } => {
                    let _ = writeln!(out, "ENV {key}={}", quote_env_value(value));
                }
            }
        }

        out
    }
}

/// `contentSourceRootPath` (spec §4.5(a)): empty in advanced mode, since the
/// injected build context is already rooted at `dstFolder`; `/tmp/build-features/`
/// in legacy mode, since the content image nests everything under that path.
fn content_source_root(backend: BackendMode) -> &'static str {
    match backend {
        BackendMode::Advanced => "",
        BackendMode::Legacy => "/tmp/build-features/",
    }
}

fn quote_env_value(value: &str) -> String {
    if value.contains(' ') || value.is_empty() {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Synthesizes the recipe for a fully assembled [`FeaturesConfig`].
///
/// `install_style_of` resolves a fetched feature's install style by
/// inspecting its payload directory (injected so this function stays a pure
/// transformation over `FeaturesConfig` for determinism testing).
pub fn synthesize_recipe(
    base_image: &str,
    features_config: &FeaturesConfig,
    backend: BackendMode,
    content_image: Option<String>,
    install_style_of: impl Fn(&FeatureSet, &Feature) -> InstallStyle,
) -> BuildRecipe {
    let mut stanzas = vec![Stanza::Base {
        base_image: base_image.to_string(),
    }];

    let mut acquire_stanzas = Vec::new();
    let mut copy_stanzas = Vec::new();
    let mut script_commands = Vec::new();
    let mut env_stanzas = Vec::new();

    for set in &features_config.feature_sets {
        let source_info_string = set.source_info_string().0;

        for feature in &set.features {
            if !feature.included {
                continue;
            }

            match install_style_of(set, feature) {
                InstallStyle::Staged { has_configure } => {
                    let stage_name = format!("{source_info_string}_{}", feature.id);
                    acquire_stanzas.push(Stanza::AcquireStage {
                        stage_name: stage_name.clone(),
                        source_info_string: source_info_string.clone(),
                        feature_id: feature.id.clone(),
                    });
                    copy_stanzas.push(Stanza::CopyStage {
                        stage_name,
                        feature_path: format!("features/{}", feature.id),
                        has_configure,
                        source_info_string: source_info_string.clone(),
                    });
                }
                InstallStyle::Script => {
                    let content_root = content_source_root(backend);
                    let feature_path = format!("features/{}", feature.id);
                    script_commands.push(format!(
                        "COPY --from={CONTENT_SOURCE_STAGE} {content_root}{source_info_string}/{feature_path} /tmp/build-features/{source_info_string}/{feature_path}"
                    ));
                    script_commands.push(format!(
                        "COPY --from={CONTENT_SOURCE_STAGE} {content_root}{source_info_string}/common /tmp/build-features/{source_info_string}/common"
                    ));
                    script_commands.push(format!(
                        "RUN cd /tmp/build-features/{source_info_string}/{feature_path} && \\\n    set -a && . ./devcontainer-features.env && set +a && \\\n    chmod +x install.sh && ./install.sh"
                    ));
                }
            }

            for (key, value) in &feature.container_env {
                if !value.is_empty() {
                    env_stanzas.push(Stanza::ContainerEnv {
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
    }

    // Every AcquireStage branches off dev_containers_target_stage directly,
    // so they all come first; the stage left "current" after the last one is
    // that AcquireStage, not the target, so re-anchor to the target stage
    // before copying anything back into it (spec §4.5 copyFeatureBuildStages).
    let had_acquire_stages = !acquire_stanzas.is_empty();
    stanzas.extend(acquire_stanzas);
    if had_acquire_stages {
        stanzas.push(Stanza::ReopenTargetStage);
    }
    stanzas.extend(copy_stanzas);

    if !script_commands.is_empty() {
        stanzas.push(Stanza::FeatureLayer {
            commands: script_commands,
        });
    }
    stanzas.extend(env_stanzas);

    BuildRecipe {
        prefix: RecipePrefix {
            syntax_directive: (backend == BackendMode::Advanced)
                .then(|| "docker/dockerfile:1.4".to_string()),
            base_image: base_image.to_string(),
            content_image,
        },
        backend,
        stanzas,
    }
}

/// Builds the `devcontainer-features.env` content for one feature (spec
/// §4.5(c)). `targetpath`, when `Some`, is the `acquire`-style install path
/// emitted as `_BUILD_ARG_<SAFE_ID>_TARGETPATH`.
pub fn build_arg_env_file(feature: &Feature, targetpath: Option<&str>) -> String {
    let id = safe_id(&feature.id);
    let mut lines = Vec::new();

    for (opt, value) in &feature.options {
        lines.push(format!(
            "_BUILD_ARG_{id}_{}=\"{}\"",
            opt.to_uppercase(),
            value.to_env_literal()
        ));
    }

    lines.push(format!("_BUILD_ARG_{id}=true"));

    if let Some(build_arg) = &feature.build_arg {
        if let Some(main_value) = main_option_value(feature) {
            lines.push(format!("{build_arg}={main_value}"));
        }
    }

    if let Some(path) = targetpath {
        lines.push(format!("_BUILD_ARG_{id}_TARGETPATH={path}"));
    }

    lines.join("\n") + "\n"
}

fn main_option_value(feature: &Feature) -> Option<String> {
    match &feature.value {
        crate::assemble::FeatureValue::Scalar(s) => Some(s.clone()),
        crate::assemble::FeatureValue::Options(_) => None,
    }
}

/// Writes every feature's `devcontainer-features.env` under `dst_folder`
/// (spec §4.5(c) paths). `targetpath_of` supplies the `acquire`-style
/// target path for staged features, `None` for script-style ones.
pub fn write_env_files(
    features_config: &FeaturesConfig,
    dst_folder: &Path,
    install_style_of: impl Fn(&FeatureSet, &Feature) -> InstallStyle,
) -> Result<(), EngineError> {
    for set in &features_config.feature_sets {
        let source_info_string = set.source_info_string().0;
        for feature in &set.features {
            let style = install_style_of(set, feature);
            let (dir, targetpath) = match style {
                InstallStyle::Script => (
                    dst_folder.join(&source_info_string),
                    None,
                ),
                InstallStyle::Staged { .. } => {
                    let path = format!(
                        "/usr/local/devcontainer-features/{source_info_string}/{}",
                        feature.id
                    );
                    (
                        dst_folder
                            .join(&source_info_string)
                            .join("features")
                            .join(&feature.id),
                        Some(path),
                    )
                }
            };
            std::fs::create_dir_all(&dir)?;
            let content = build_arg_env_file(feature, targetpath.as_deref());
            std::fs::write(dir.join("devcontainer-features.env"), content)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::FeatureValue;
    use crate::identifier::SourceInformation;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn script_feature(id: &str) -> Feature {
        Feature {
            id: id.to_string(),
            value: FeatureValue::Scalar("latest".to_string()),
            build_arg: None,
            container_env: HashMap::new(),
            options: HashMap::new(),
            included: true,
        }
    }

    fn feature_set(id: &str) -> FeatureSet {
        FeatureSet {
            source_information: SourceInformation::LocalCache,
            features: vec![script_feature(id)],
            dst_folder: PathBuf::from("/tmp/dst/local-cache"),
        }
    }

    #[test]
    fn safe_id_upper_cases_and_replaces_separators() {
        assert_eq!(safe_id("node-lts"), "NODE_LTS");
        assert_eq!(safe_id("octocat/myfeatures/foo"), "OCTOCAT_MYFEATURES_FOO");
    }

    #[test]
    fn render_emits_base_arg_and_from_stage() {
        let config = FeaturesConfig {
            feature_sets: vec![feature_set("helloworld")],
            dst_folder: PathBuf::from("/tmp/dst"),
        };
        let recipe = synthesize_recipe("ubuntu:22.04", &config, BackendMode::Advanced, None, |_, _| {
            InstallStyle::Script
        });
        let text = recipe.render();
        assert!(text.contains("ARG _DEV_CONTAINERS_BASE_IMAGE=ubuntu:22.04"));
        assert!(text.contains("FROM ubuntu:22.04 AS dev_containers_target_stage"));
        assert!(text.contains("./install.sh"));
    }

    #[test]
    fn legacy_backend_emits_content_image_stage_and_no_syntax_directive() {
        let config = FeaturesConfig {
            feature_sets: vec![feature_set("helloworld")],
            dst_folder: PathBuf::from("/tmp/dst"),
        };
        let recipe = synthesize_recipe(
            "ubuntu:22.04",
            &config,
            BackendMode::Legacy,
            Some("dev-containers-feature-content-source:abc123".to_string()),
            |_, _| InstallStyle::Script,
        );
        assert!(recipe.prefix.syntax_directive.is_none());
        let text = recipe.render();
        assert!(text.contains(
            "FROM dev-containers-feature-content-source:abc123 AS dev_containers_feature_content_source"
        ));
        assert!(text.contains("COPY --from=dev_containers_feature_content_source /tmp/build-features/local-cache/features/helloworld"));
        assert!(!text.contains("# syntax="));
    }

    #[test]
    fn advanced_backend_script_install_copies_from_named_context_without_prefix() {
        let config = FeaturesConfig {
            feature_sets: vec![feature_set("helloworld")],
            dst_folder: PathBuf::from("/tmp/dst"),
        };
        let recipe = synthesize_recipe("ubuntu:22.04", &config, BackendMode::Advanced, None, |_, _| {
            InstallStyle::Script
        });
        let text = recipe.render();
        assert!(!text.contains("AS dev_containers_feature_content_source"));
        assert!(text.contains(
            "COPY --from=dev_containers_feature_content_source local-cache/features/helloworld /tmp/build-features/local-cache/features/helloworld"
        ));
    }

    #[test]
    fn staged_features_get_acquire_stage_and_copy_stage() {
        let mut feature = script_feature("docker-in-docker");
        feature.id = "docker-in-docker".to_string();
        let set = FeatureSet {
            source_information: SourceInformation::LocalCache,
            features: vec![feature],
            dst_folder: PathBuf::from("/tmp/dst/local-cache"),
        };
        let config = FeaturesConfig {
            feature_sets: vec![set],
            dst_folder: PathBuf::from("/tmp/dst"),
        };
        let recipe = synthesize_recipe("ubuntu:22.04", &config, BackendMode::Advanced, None, |_, _| {
            InstallStyle::Staged { has_configure: true }
        });
        let text = recipe.render();
        assert!(text.contains("AS local-cache_docker-in-docker"));
        assert!(text.contains("./bin/acquire"));
        assert!(text.contains("COPY --from=local-cache_docker-in-docker"));
        assert!(text.contains("./bin/configure"));
    }

    #[test]
    fn mixed_acquire_and_script_features_reopen_target_stage_before_copying() {
        let staged = {
            let mut f = script_feature("docker-in-docker");
            f.id = "docker-in-docker".to_string();
            f
        };
        let scripted = script_feature("common-utils");
        let set = FeatureSet {
            source_information: SourceInformation::LocalCache,
            features: vec![staged, scripted],
            dst_folder: PathBuf::from("/tmp/dst/local-cache"),
        };
        let config = FeaturesConfig {
            feature_sets: vec![set],
            dst_folder: PathBuf::from("/tmp/dst"),
        };
        let recipe = synthesize_recipe("ubuntu:22.04", &config, BackendMode::Advanced, None, |_, feature| {
            if feature.id == "docker-in-docker" {
                InstallStyle::Staged { has_configure: false }
            } else {
                InstallStyle::Script
            }
        });

        assert!(matches!(
            recipe.stanzas.iter().find(|s| matches!(s, Stanza::AcquireStage { .. } | Stanza::ReopenTargetStage | Stanza::CopyStage { .. })),
            Some(Stanza::AcquireStage { .. })
        ));
        let acquire_idx = recipe
            .stanzas
            .iter()
            .position(|s| matches!(s, Stanza::AcquireStage { .. }))
            .unwrap();
        let reopen_idx = recipe
            .stanzas
            .iter()
            .position(|s| matches!(s, Stanza::ReopenTargetStage))
            .unwrap();
        let copy_idx = recipe
            .stanzas
            .iter()
            .position(|s| matches!(s, Stanza::CopyStage { .. }))
            .unwrap();
        let layer_idx = recipe
            .stanzas
            .iter()
            .position(|s| matches!(s, Stanza::FeatureLayer { .. }))
            .unwrap();
        assert!(acquire_idx < reopen_idx);
        assert!(reopen_idx < copy_idx);
        assert!(reopen_idx < layer_idx);

        let text = recipe.render();
        let acquire_pos = text.find("AS local-cache_docker-in-docker").unwrap();
        let reopen_pos = text
            .find("FROM dev_containers_target_stage\n")
            .unwrap();
        let copy_pos = text.find("COPY --from=local-cache_docker-in-docker").unwrap();
        let install_pos = text.find("./install.sh").unwrap();
        assert!(acquire_pos < reopen_pos);
        assert!(reopen_pos < copy_pos);
        assert!(reopen_pos < install_pos);
    }

    #[test]
    fn excluded_features_are_not_emitted() {
        let mut feature = script_feature("helloworld");
        feature.included = false;
        let set = FeatureSet {
            source_information: SourceInformation::LocalCache,
            features: vec![feature],
            dst_folder: PathBuf::from("/tmp/dst/local-cache"),
        };
        let config = FeaturesConfig {
            feature_sets: vec![set],
            dst_folder: PathBuf::from("/tmp/dst"),
        };
        let recipe = synthesize_recipe("ubuntu:22.04", &config, BackendMode::Advanced, None, |_, _| {
            InstallStyle::Script
        });
        assert!(recipe.stanzas.iter().all(|s| !matches!(s, Stanza::FeatureLayer { .. })));
    }

    #[test]
    fn container_env_is_emitted_per_feature_skipping_empty_values() {
        let mut feature = script_feature("node");
        feature
            .container_env
            .insert("NODE_HOME".to_string(), "/usr/local/node".to_string());
        feature
            .container_env
            .insert("EMPTY".to_string(), String::new());
        let set = FeatureSet {
            source_information: SourceInformation::LocalCache,
            features: vec![feature],
            dst_folder: PathBuf::from("/tmp/dst/local-cache"),
        };
        let config = FeaturesConfig {
            feature_sets: vec![set],
            dst_folder: PathBuf::from("/tmp/dst"),
        };
        let recipe = synthesize_recipe("ubuntu:22.04", &config, BackendMode::Advanced, None, |_, _| {
            InstallStyle::Script
        });
        let text = recipe.render();
        assert!(text.contains("ENV NODE_HOME=/usr/local/node"));
        assert!(!text.contains("ENV EMPTY="));
    }

    #[test]
    fn build_arg_env_file_includes_presence_flag_and_options() {
        let mut feature = script_feature("node");
        feature
            .options
            .insert("version".to_string(), crate::features::OptionValue::String("18".to_string()));
        let content = build_arg_env_file(&feature, None);
        assert!(content.contains("_BUILD_ARG_NODE_VERSION=\"18\""));
        assert!(content.contains("_BUILD_ARG_NODE=true"));
    }

    #[test]
    fn build_arg_env_file_includes_legacy_build_arg_from_scalar_value() {
        let mut feature = script_feature("node");
        feature.build_arg = Some("NODE_VERSION".to_string());
        feature.value = FeatureValue::Scalar("18".to_string());
        let content = build_arg_env_file(&feature, None);
        assert!(content.contains("NODE_VERSION=18"));
    }

    #[test]
    fn build_arg_env_file_includes_targetpath_for_staged_features() {
        let feature = script_feature("docker-in-docker");
        let content = build_arg_env_file(
            &feature,
            Some("/usr/local/devcontainer-features/local-cache/docker-in-docker"),
        );
        assert!(content.contains(
            "_BUILD_ARG_DOCKER_IN_DOCKER_TARGETPATH=/usr/local/devcontainer-features/local-cache/docker-in-docker"
        ));
    }

    #[test]
    fn determinism_two_identical_configs_produce_equal_typed_recipes() {
        let config_a = FeaturesConfig {
            feature_sets: vec![feature_set("helloworld")],
            dst_folder: PathBuf::from("/tmp/dst"),
        };
        let config_b = FeaturesConfig {
            feature_sets: vec![feature_set("helloworld")],
            dst_folder: PathBuf::from("/tmp/other-dst"),
        };
        let a = synthesize_recipe("ubuntu:22.04", &config_a, BackendMode::Advanced, None, |_, _| {
            InstallStyle::Script
        });
        let b = synthesize_recipe("ubuntu:22.04", &config_b, BackendMode::Advanced, None, |_, _| {
            InstallStyle::Script
        });
        assert_eq!(a, b);
    }
}
