//! Materializes a [`SourceInformation`] into a local directory containing
//! the feature's payload — the Feature Fetcher (spec §4.2).
//!
//! Concurrency is modeled on the inherited `feature_installer.rs`'s
//! `Semaphore` + `tokio::spawn`-per-item pattern: the bound is the number of
//! distinct source-info strings being fetched in one build (spec §5), not a
//! host CPU count.

use crate::errors::{EngineError, FetchErrorKind};
use crate::identifier::{SourceInfoKey, SourceInformation};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

/// Default per-fetch network deadline (spec §5).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable overriding the fetch fan-out bound, for tests.
/// Mirrors the inherited `DEACON_FEATURE_INSTALL_CONCURRENCY` convention.
pub const FETCH_CONCURRENCY_ENV: &str = "DEVFEAT_FETCH_CONCURRENCY";

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Root of the tool's bundled `local-cache` feature tree.
    pub local_cache_source: PathBuf,
    /// Base directory relative `file-path` sources are resolved against.
    pub workspace_root: PathBuf,
    /// Optional `GITHUB_TOKEN`-style bearer token for authenticated requests.
    pub github_token: Option<String>,
    pub timeout: Duration,
}

impl FetchConfig {
    pub fn new(local_cache_source: PathBuf, workspace_root: PathBuf) -> Self {
        Self {
            local_cache_source,
            workspace_root,
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Fetches every source in `sources`, fanned out with a concurrency bound
/// equal to the number of distinct sources (or `DEVFEAT_FETCH_CONCURRENCY`
/// if set and valid).
#[instrument(skip(sources, config))]
pub async fn fetch_all(
    sources: &[SourceInformation],
    dst_folder: &Path,
    config: &FetchConfig,
) -> Result<HashMap<SourceInfoKey, PathBuf>, EngineError> {
    let limit = concurrency_limit(sources.len());
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));

    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        let semaphore = Arc::clone(&semaphore);
        let source = source.clone();
        let dst_folder = dst_folder.to_path_buf();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let key = source.source_info_string();
            let path = fetch_source(&source, &dst_folder, &config).await?;
            Ok::<_, EngineError>((key, path))
        }));
    }

    let mut results = HashMap::with_capacity(handles.len());
    for handle in handles {
        let (key, path) = handle
            .await
            .map_err(|e| EngineError::Fetch {
                kind: FetchErrorKind::Network,
                source_info: "<join>".to_string(),
                message: format!("fetch task panicked: {e}"),
            })??;
        results.insert(key, path);
    }
    Ok(results)
}

fn concurrency_limit(distinct_sources: usize) -> usize {
    if let Ok(raw) = std::env::var(FETCH_CONCURRENCY_ENV) {
        if let Ok(parsed) = raw.parse::<usize>() {
            if parsed > 0 {
                return parsed;
            }
        }
        warn!(value = %raw, "ignoring invalid {FETCH_CONCURRENCY_ENV} value");
    }
    distinct_sources
}

/// Fetches a single source into `dst_folder/<source-info-string>/`.
pub async fn fetch_source(
    source: &SourceInformation,
    dst_folder: &Path,
    config: &FetchConfig,
) -> Result<PathBuf, EngineError> {
    let key = source.source_info_string();
    let target = dst_folder.join(&key.0);

    match source {
        SourceInformation::LocalCache => {
            copy_dir_all(&config.local_cache_source, &target)?;
        }
        SourceInformation::FilePath { file_path, .. } => {
            let resolved = if file_path.is_absolute() {
                file_path.clone()
            } else {
                config.workspace_root.join(file_path)
            };
            if !resolved.exists() {
                return Err(EngineError::Fetch {
                    kind: FetchErrorKind::Network,
                    source_info: key.0.clone(),
                    message: format!("path {} does not exist", resolved.display()),
                });
            }
            copy_dir_all(&resolved, &target)?;
        }
        SourceInformation::DirectTarball { tarball_uri } => {
            download_and_extract(tarball_uri, &target, config, &key).await?;
        }
        SourceInformation::GithubRepo {
            unauthenticated_uri,
            ..
        } => {
            download_and_extract(unauthenticated_uri, &target, config, &key).await?;
        }
    }

    verify_payload(&target, &key)?;
    Ok(target)
}

async fn download_and_extract(
    url: &str,
    target: &Path,
    config: &FetchConfig,
    key: &SourceInfoKey,
) -> Result<(), EngineError> {
    debug!(url, target = %target.display(), "downloading feature tarball");

    let client = reqwest::Client::new();
    let mut request = client.get(url);
    if let Some(token) = &config.github_token {
        request = request.bearer_auth(token);
    }

    let response = tokio::time::timeout(config.timeout, request.send())
        .await
        .map_err(|_| EngineError::Fetch {
            kind: FetchErrorKind::Timeout,
            source_info: key.0.clone(),
            message: format!("timed out after {:?} fetching {url}", config.timeout),
        })?
        .map_err(|e| EngineError::Fetch {
            kind: FetchErrorKind::Network,
            source_info: key.0.clone(),
            message: e.to_string(),
        })?;

    if !response.status().is_success() {
        let kind = if response.status().as_u16() == 401 || response.status().as_u16() == 403 {
            FetchErrorKind::Auth
        } else {
            FetchErrorKind::HttpStatus
        };
        return Err(EngineError::Fetch {
            kind,
            source_info: key.0.clone(),
            message: format!("unexpected status {} fetching {url}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(|e| EngineError::Fetch {
        kind: FetchErrorKind::Network,
        source_info: key.0.clone(),
        message: e.to_string(),
    })?;

    let target = target.to_path_buf();
    let key_for_blocking = key.clone();
    tokio::task::spawn_blocking(move || extract_tar_gz(&bytes, &target, &key_for_blocking))
        .await
        .map_err(|e| EngineError::Extract {
            source_info: key.0.clone(),
            message: format!("extraction task panicked: {e}"),
        })??;

    Ok(())
}

fn extract_tar_gz(bytes: &[u8], target: &Path, key: &SourceInfoKey) -> Result<(), EngineError> {
    std::fs::create_dir_all(target)?;
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(target).map_err(|e| EngineError::Extract {
        source_info: key.0.clone(),
        message: format!("malformed tar+gzip archive: {e}"),
    })?;
    Ok(())
}

fn verify_payload(target: &Path, key: &SourceInfoKey) -> Result<(), EngineError> {
    let features_dir = target.join("features");
    if !features_dir.is_dir() {
        return Err(EngineError::Payload {
            source_info: key.0.clone(),
            expected: features_dir,
        });
    }
    Ok(())
}

fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}
