//! Parses a feature identifier string into a [`SourceInformation`] plus a
//! feature id, or a typed rejection.
//!
//! ```
//! use devfeat_core::identifier::{resolve_identifier, ResolvedIdentifier, SourceInformation};
//!
//! match resolve_identifier("helloworld") {
//!     ResolvedIdentifier::Resolved { source, feature_id } => {
//!         assert_eq!(source, SourceInformation::LocalCache);
//!         assert_eq!(feature_id, "helloworld");
//!     }
//!     ResolvedIdentifier::Rejected { .. } => unreachable!(),
//! }
//! ```
//!
//! # Detection rules
//!
//! Evaluated in this order; the first matching rule wins and later rules are
//! never consulted (so e.g. a string containing `://` either becomes a
//! `direct-tarball` or is rejected outright, it never falls through to the
//! github-repo rule):
//!
//! 1. `<url>.tgz#<id>` where the URL contains `://` → [`SourceInformation::DirectTarball`].
//! 2. `./…`, `../…`, or `/…` → [`SourceInformation::FilePath`].
//! 3. `<owner>/<repo>/<id>(@<tag>)?` (exactly three slash-separated segments) → [`SourceInformation::GithubRepo`].
//! 4. A bare valid id → [`SourceInformation::LocalCache`].
//! 5. Anything else is rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// `[A-Za-z0-9_][A-Za-z0-9_-]*`
static VALID_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*$").unwrap());

/// A stable, collision-resistant key derived from a [`SourceInformation`].
///
/// Newtype wrapper so call sites cannot accidentally index a feature-set
/// table with a raw, un-derived string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceInfoKey(pub String);

impl std::fmt::Display for SourceInfoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The resolved origin of a feature, tagged by variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInformation {
    /// Payload ships bundled with the tool.
    LocalCache,
    /// A GitHub release (tagged or latest).
    GithubRepo {
        owner: String,
        repo: String,
        tag: Option<String>,
        is_latest: bool,
        api_uri: String,
        unauthenticated_uri: String,
    },
    /// A directly addressable tar+gzip archive.
    DirectTarball { tarball_uri: String },
    /// A path on the local filesystem, relative or absolute.
    FilePath { file_path: PathBuf, is_relative: bool },
}

impl SourceInformation {
    /// The canonical, injective directory/stage-name prefix for this source.
    ///
    /// # Examples
    ///
    /// ```
    /// use devfeat_core::identifier::SourceInformation;
    ///
    /// let gh = SourceInformation::GithubRepo {
    ///     owner: "bob".into(),
    ///     repo: "mobileapp".into(),
    ///     tag: None,
    ///     is_latest: true,
    ///     api_uri: String::new(),
    ///     unauthenticated_uri: String::new(),
    /// };
    /// assert_eq!(gh.source_info_string().0, "github-bob-mobileapp-latest");
    /// ```
    pub fn source_info_string(&self) -> SourceInfoKey {
        let s = match self {
            SourceInformation::LocalCache => "local-cache".to_string(),
            SourceInformation::GithubRepo {
                owner, repo, tag, ..
            } => format!(
                "github-{owner}-{repo}-{}",
                tag.as_deref().unwrap_or("latest")
            ),
            SourceInformation::DirectTarball { tarball_uri } => {
                let mut hasher = Sha256::new();
                hasher.update(tarball_uri.as_bytes());
                let digest = hasher.finalize();
                format!("tarball-{:x}", digest)[..("tarball-".len() + 16)].to_string()
            }
            SourceInformation::FilePath { file_path, .. } => {
                format!("file-{}", slugify_path(file_path))
            }
        };
        SourceInfoKey(s)
    }
}

fn slugify_path(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// The outcome of [`resolve_identifier`]. A rejection is not an error: it is
/// a normal, loggable "not recognized" result (spec §4.1, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIdentifier {
    Resolved {
        source: SourceInformation,
        feature_id: String,
    },
    Rejected {
        reason: String,
    },
}

fn reject(reason: impl Into<String>) -> ResolvedIdentifier {
    ResolvedIdentifier::Rejected {
        reason: reason.into(),
    }
}

/// Parses `raw` per the rules documented on the module.
pub fn resolve_identifier(raw: &str) -> ResolvedIdentifier {
    if raw.contains("://") {
        return classify_tarball(raw);
    }
    if raw.starts_with("./") || raw.starts_with("../") || raw.starts_with('/') {
        return classify_file_path(raw);
    }
    if let Some(resolved) = classify_github_repo(raw) {
        return resolved;
    }
    if VALID_ID.is_match(raw) {
        return ResolvedIdentifier::Resolved {
            source: SourceInformation::LocalCache,
            feature_id: raw.to_string(),
        };
    }
    reject(format!("identifier {raw:?} matched no known grammar"))
}

fn classify_tarball(raw: &str) -> ResolvedIdentifier {
    let Some(hash_pos) = raw.rfind('#') else {
        return reject("tarball reference is missing a '#<id>' suffix");
    };
    let url = &raw[..hash_pos];
    let id = &raw[hash_pos + 1..];

    if id.is_empty() {
        return reject("tarball reference has an empty id after '#'");
    }
    if !VALID_ID.is_match(id) {
        return reject(format!("tarball id {id:?} is not a valid identifier"));
    }
    if url.ends_with('/') {
        return reject("tarball URL must not end with a trailing slash");
    }
    if !url.ends_with(".tgz") {
        return reject("tarball URL must end with '.tgz' before the '#<id>' suffix");
    }

    ResolvedIdentifier::Resolved {
        source: SourceInformation::DirectTarball {
            tarball_uri: url.to_string(),
        },
        feature_id: id.to_string(),
    }
}

/// See `DESIGN.md`'s Open Question decision #1: the trailing path segment is
/// kept verbatim as the feature id rather than rewritten to the literal
/// string `features`.
fn classify_file_path(raw: &str) -> ResolvedIdentifier {
    let path = PathBuf::from(raw);
    let Some(feature_id) = path.file_name().and_then(|n| n.to_str()) else {
        return reject(format!("path {raw:?} has no trailing segment to use as an id"));
    };
    let is_relative = !raw.starts_with('/');
    ResolvedIdentifier::Resolved {
        source: SourceInformation::FilePath {
            file_path: path.clone(),
            is_relative,
        },
        feature_id: feature_id.to_string(),
    }
}

fn classify_github_repo(raw: &str) -> Option<ResolvedIdentifier> {
    let (path_part, tag) = match raw.split_once('@') {
        Some((p, t)) => (p, Some(t)),
        None => (raw, None),
    };
    let segments: Vec<&str> = path_part.split('/').collect();
    if segments.len() != 3 {
        return None;
    }
    let [owner, repo, id] = [segments[0], segments[1], segments[2]];
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    if !VALID_ID.is_match(id) {
        return Some(reject(format!(
            "github feature id {id:?} is not a valid identifier"
        )));
    }
    if let Some(tag) = tag {
        if tag.is_empty() {
            return Some(reject("github reference has an empty tag after '@'"));
        }
    }

    let is_latest = tag.is_none();
    let (api_uri, unauthenticated_uri) = match tag {
        Some(tag) => (
            format!("https://api.github.com/repos/{owner}/{repo}/releases/tags/{tag}"),
            format!(
                "https://github.com/{owner}/{repo}/releases/download/{tag}/devcontainer-features.tgz"
            ),
        ),
        None => (
            format!("https://api.github.com/repos/{owner}/{repo}/releases/latest"),
            format!(
                "https://github.com/{owner}/{repo}/releases/latest/download/devcontainer-features.tgz"
            ),
        ),
    };

    Some(ResolvedIdentifier::Resolved {
        source: SourceInformation::GithubRepo {
            owner: owner.to_string(),
            repo: repo.to_string(),
            tag: tag.map(str::to_string),
            is_latest,
            api_uri,
            unauthenticated_uri,
        },
        feature_id: id.to_string(),
    })
}
