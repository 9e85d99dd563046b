//! `devfeat build`: resolve -> fetch -> assemble -> merge -> synthesize -> drive.
//!
//! Grounded on the inherited `deacon` bin crate's command-module style
//! (`anyhow::Context` at every fallible step, tracing for progress), wiring
//! together every `devfeat_core` stage named in the architecture overview.

use anyhow::{bail, Context, Result};
use devfeat_core::assemble::{assemble_features_config, Feature, FeatureSet};
use devfeat_core::build::driver::{backend_for, build_content_image, BuildContext, DriveRequest};
use devfeat_core::build::recipe::{
    detect_install_style, synthesize_recipe, write_env_files, InstallStyle, BASE_IMAGE_ARG,
    CONTENT_BUILD_DOCKERFILE, FEATURE_CONTENT_SOURCE_ARG, IMAGE_USER_ARG,
};
use devfeat_core::build::{BackendMode, BuildOptions, BuildRequest};
use devfeat_core::config::ConfigLoader;
use devfeat_core::features::parse_feature_metadata_file;
use devfeat_core::fetch::{fetch_all, FetchConfig};
use devfeat_core::identifier::{
    resolve_identifier, ResolvedIdentifier, SourceInfoKey, SourceInformation,
};
use devfeat_core::merge::merge_configs;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

use crate::cli::BuildArgs;

pub fn run(args: &BuildArgs) -> Result<i32> {
    if !args.workspace_folder.is_dir() {
        bail!(
            "workspace folder {} does not exist",
            args.workspace_folder.display()
        );
    }

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => ConfigLoader::discover_config(&args.workspace_folder)
            .context("discovering devcontainer.json")?
            .path()
            .to_path_buf(),
    };
    let loaded = ConfigLoader::load_from_path(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // No parent document is exposed on the CLI surface (no --extends flag),
    // so the merge step runs against an empty parent; see DESIGN.md.
    let merged = merge_configs(&serde_json::json!({}), &loaded.raw, &HashMap::new())
        .context("merging devcontainer configuration")?;
    let effective: devfeat_core::config::DevContainerConfig =
        serde_json::from_value(merged).context("reading effective configuration")?;

    let base_image = effective
        .image
        .clone()
        .ok_or_else(|| anyhow::anyhow!("devcontainer.json has no 'image' field"))?;

    let features_map = effective.features_map();
    let sources = distinct_sources(&features_map);

    let dst_folder = build_dst_folder();
    std::fs::create_dir_all(&dst_folder)
        .with_context(|| format!("creating build folder {}", dst_folder.display()))?;

    let fetch_config = FetchConfig::new(local_cache_source()?, args.workspace_folder.clone());
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let fetched = runtime
        .block_on(fetch_all(&sources, &dst_folder, &fetch_config))
        .context("fetching feature sources")?;

    let metadata_for = |key: &SourceInfoKey| {
        fetched.get(key).and_then(|path| {
            parse_feature_metadata_file(&path.join("devcontainer-features.json")).ok()
        })
    };
    let features_config =
        assemble_features_config(&features_map, &dst_folder, metadata_for, |_| true);

    let install_style_of = |set: &FeatureSet, feature: &Feature| -> InstallStyle {
        fetched
            .get(&set.source_info_string())
            .map(|root| root.join("features").join(&feature.id))
            .and_then(|root| detect_install_style(&root).ok())
            .unwrap_or(InstallStyle::Script)
    };
    write_env_files(&features_config, &dst_folder, install_style_of)
        .context("writing feature build-arg env files")?;

    let backend: BackendMode = args.backend.into();
    let options = BuildOptions {
        no_cache: args.no_cache,
        cache_from: args.cache_from.clone(),
        cache_to: args.cache_to.clone(),
        builder: args.builder.clone(),
    };

    let request = BuildRequest {
        workspace_folder: args.workspace_folder.clone(),
        config_file: args.config.clone(),
        image_names: image_tags(args),
        backend,
        options: options.clone(),
    };
    request.validate().context("validating build request")?;

    let content_image = if backend == BackendMode::Legacy {
        let content_dockerfile = dst_folder.join("Dockerfile.content");
        std::fs::write(&content_dockerfile, CONTENT_BUILD_DOCKERFILE)?;
        Some(
            build_content_image("docker", &content_dockerfile, &dst_folder)
                .context("building legacy feature content image")?,
        )
    } else {
        None
    };

    let recipe = synthesize_recipe(
        &base_image,
        &features_config,
        backend,
        content_image,
        install_style_of,
    );
    let recipe_path = dst_folder.join("Dockerfile");
    std::fs::write(&recipe_path, recipe.render())
        .with_context(|| format!("writing recipe to {}", recipe_path.display()))?;

    let build_contexts = if backend == BackendMode::Advanced {
        vec![BuildContext {
            name: "dev_containers_feature_content_source".to_string(),
            dir: dst_folder.clone(),
        }]
    } else {
        Vec::new()
    };

    let build_args = vec![
        (BASE_IMAGE_ARG.to_string(), base_image.clone()),
        (
            IMAGE_USER_ARG.to_string(),
            effective
                .remote_user
                .clone()
                .unwrap_or_else(|| "root".to_string()),
        ),
        (
            FEATURE_CONTENT_SOURCE_ARG.to_string(),
            "dev_containers_feature_content_source".to_string(),
        ),
    ];

    let drive_request = DriveRequest {
        recipe_path,
        context_dir: dst_folder.clone(),
        image_tags: request.image_names.clone(),
        build_args,
        build_contexts,
        options,
    };

    info!(image = %base_image, tags = ?drive_request.image_tags, "driving build");
    backend_for(backend)
        .build(&drive_request, "docker")
        .context("running container build")?;

    Ok(0)
}

fn distinct_sources(features_map: &IndexMap<String, serde_json::Value>) -> Vec<SourceInformation> {
    let mut seen: IndexMap<SourceInfoKey, SourceInformation> = IndexMap::new();
    for id in features_map.keys() {
        if let ResolvedIdentifier::Resolved { source, .. } = resolve_identifier(id) {
            seen.entry(source.source_info_string()).or_insert(source);
        }
    }
    seen.into_values().collect()
}

fn image_tags(args: &BuildArgs) -> Vec<String> {
    if args.image_name.is_empty() {
        let name = args
            .workspace_folder
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("workspace");
        vec![format!("devfeat-{name}:latest")]
    } else {
        args.image_name.clone()
    }
}

/// Root a bundled `local-cache` feature tree next to the binary, overridable
/// for development/testing via `DEVFEAT_LOCAL_CACHE_DIR`.
fn local_cache_source() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DEVFEAT_LOCAL_CACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let exe = std::env::current_exe().context("locating running executable")?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("executable has no parent directory"))?;
    Ok(dir.join("local-cache"))
}

fn build_dst_folder() -> PathBuf {
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir()
        .join("vsch")
        .join("container-features-build")
        .join(format!("{pid:x}{:x}", nanos as u64))
}
