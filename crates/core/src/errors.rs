//! Unified error taxonomy for the feature composition engine.
//!
//! Every fallible operation in this crate returns [`EngineError`] (or a
//! `Result<T, EngineError>` aliased as [`Result`]). Identifier rejection is
//! deliberately *not* a variant here: a rejected identifier is a normal,
//! loggable outcome (see [`crate::identifier::ResolvedIdentifier`]), not a
//! failure.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// The kind of failure behind a [`EngineError::Fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Network,
    Timeout,
    HttpStatus,
    Auth,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::HttpStatus => "http-status",
            FetchErrorKind::Auth => "auth",
        };
        f.write_str(s)
    }
}

/// Top-level error type returned by every public operation in this crate.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("fetch failed ({kind}) for {source_info}: {message}")]
    Fetch {
        kind: FetchErrorKind,
        source_info: String,
        message: String,
    },

    #[error("failed to extract archive for {source_info}: {message}")]
    Extract { source_info: String, message: String },

    #[error("payload for {source_info} is missing expected path {expected:?}")]
    Payload {
        source_info: String,
        expected: PathBuf,
    },

    #[error("cannot merge key {key:?}: {message}")]
    MergeType { key: String, message: String },

    #[error("build failed with exit code {exit_code:?}\n{stderr}")]
    Build {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("host I/O error: {0}")]
    HostIo(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failure modes of the configuration-loading layer.
///
/// This is an ambient addition (the distilled engine spec treats
/// configuration loading as a given); it mirrors the failure modes that
/// `ConfigLoader` in the inherited `config.rs` already distinguished.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no devcontainer.json found under {0}")]
    NotFound(PathBuf),

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid devcontainer.json: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
