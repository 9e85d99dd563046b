//! Build domain types: cache/builder options threaded through the recipe
//! synthesizer and driver, plus a validated build request.
//!
//! Grounded on the inherited `build/mod.rs`'s `BuildOptions`/`BuildRequest`
//! design (immutable-after-construction, validated at construction time),
//! trimmed to the fields an `devfeat build` invocation actually carries.
//! `FeatureManifest`/`FeatureRef`/`FeatureLockfile`/`ValidationEvent` and
//! the standalone `buildkit.rs`/`metadata.rs` submodules had no counterpart
//! in the transformed engine and were dropped (DESIGN.md).

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod driver;
pub mod recipe;

pub use recipe::BackendMode;

/// Cache and builder options common to both the advanced and legacy
/// backends (spec §4.6).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    pub no_cache: bool,
    pub cache_from: Vec<String>,
    pub cache_to: Option<String>,
    pub builder: Option<String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `cache_from`/`cache_to`/`builder` require buildx; only the advanced
    /// backend can honor them.
    pub fn requires_buildkit(&self) -> bool {
        !self.cache_from.is_empty() || self.cache_to.is_some() || self.builder.is_some()
    }

    pub fn is_default(&self) -> bool {
        !self.no_cache
            && self.cache_from.is_empty()
            && self.cache_to.is_none()
            && self.builder.is_none()
    }

    /// Docker CLI arguments for these options, in a fixed order.
    pub fn to_docker_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.no_cache {
            args.push("--no-cache".to_string());
        }
        for cache_source in &self.cache_from {
            args.push("--cache-from".to_string());
            args.push(cache_source.clone());
        }
        if let Some(cache_dest) = &self.cache_to {
            args.push("--cache-to".to_string());
            args.push(cache_dest.clone());
        }
        if let Some(builder) = &self.builder {
            args.push("--builder".to_string());
            args.push(builder.clone());
        }

        args
    }
}

/// A validated `devfeat build` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub workspace_folder: PathBuf,
    pub config_file: Option<PathBuf>,
    pub image_names: Vec<String>,
    pub backend: BackendMode,
    pub options: BuildOptions,
}

impl BuildRequest {
    /// `config_file`, when given, must be named `devcontainer.json` or
    /// `.devcontainer.json`; a backend that can't honor the requested cache
    /// options is a validation error, not a silent downgrade.
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(config_file) = &self.config_file {
            let filename = config_file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("");
            if filename != "devcontainer.json" && filename != ".devcontainer.json" {
                return Err(EngineError::Config(crate::errors::ConfigError::Validation(
                    format!(
                        "configuration file must be named 'devcontainer.json' or '.devcontainer.json', got '{filename}'"
                    ),
                )));
            }
        }

        if self.backend == BackendMode::Legacy && self.options.requires_buildkit() {
            return Err(EngineError::Config(crate::errors::ConfigError::Validation(
                "--cache-from/--cache-to/--builder require the advanced backend".to_string(),
            )));
        }

        Ok(())
    }
}
