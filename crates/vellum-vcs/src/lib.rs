//! Version-control repository adapter for the Vellum wiki storage engine.
//!
//! Translates page-store operations into version-control primitives:
//! - Commit a change (content write or removal)
//! - Read a blob at a revision
//! - List the revisions of a path, newest first
//! - Compute the common ancestor of two revisions
//! - List the paths changed between two revisions
//!
//! Two backends implement the [`Repository`] trait: git ([`git::GitRepo`],
//! via libgit2 plumbing) and mercurial ([`hg::HgRepo`], via the `hg` CLI).
//! They behave identically from the store's perspective: same history
//! ordering, same commit atomicity, no line-ending translation. Nothing
//! above this crate branches on backend identity.

#![forbid(unsafe_code)]

pub mod git;
pub mod hg;

use std::collections::BTreeSet;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use vellum_core::{ChangeKind, VcsBackend, WikiConfig};

/// Backend revision identifier (git/hg commit hash).
pub type RevId = String;

/// Bounded retries for transient backend failures (lock contention).
const MAX_RETRIES: usize = 5;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("mercurial error: {0}")]
    Hg(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid repository path: {0}")]
    InvalidPath(String),

    #[error("unparseable backend output: {0}")]
    Parse(String),

    #[error("{what} still failing after {attempts} retries: {message}")]
    Unavailable {
        what: String,
        attempts: usize,
        message: String,
    },
}

impl VcsError {
    /// Transient failures are worth retrying with backoff: lock files held
    /// briefly by a concurrent committer, or a head that moved between
    /// building a commit and updating the ref. A retry re-reads the head
    /// and commits on top of it.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Git(err) => {
                let message = err.message().to_lowercase();
                err.code() == git2::ErrorCode::Locked
                    || err.code() == git2::ErrorCode::Modified
                    || message.contains("index.lock")
                    || message.contains("failed to lock")
                    || message.contains("lock at")
                    || message.contains("current tip is not the first parent")
            }
            Self::Hg(message) => {
                let message = message.to_lowercase();
                message.contains("lock held") || message.contains("waiting for lock")
            }
            _ => false,
        }
    }
}

impl From<VcsError> for vellum_core::Error {
    fn from(err: VcsError) -> Self {
        match err {
            VcsError::NotFound(what) => Self::PageNotFound(what),
            VcsError::InvalidPath(path) => Self::SandboxViolation(path),
            VcsError::Io(io) => Self::Io(io),
            other => Self::StorageUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, VcsError>;

/// Metadata of one commit, as far as the backend knows it. The store adds
/// the page title and per-page sequence number on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    pub rev: RevId,
    pub author: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
}

/// Uniform interface over the version-control backends.
///
/// All paths are repository-root-relative with forward slashes. Content is
/// raw bytes; backends never translate line endings.
pub trait Repository: Send + Sync {
    /// Commit new content for `path` (`None` removes the file). Either
    /// fully succeeds, returning the new revision, or leaves the previous
    /// head untouched. Transient lock contention is retried internally
    /// with exponential backoff before surfacing.
    fn commit(
        &self,
        path: &str,
        content: Option<&[u8]>,
        author: &str,
        comment: &str,
        kind: ChangeKind,
    ) -> Result<RevId>;

    /// Read the content of `path` at `rev`, or at the current head when
    /// `rev` is `None`.
    fn read(&self, path: &str, rev: Option<&str>) -> Result<Vec<u8>>;

    /// All revisions that touched `path`, newest first. Empty when the
    /// path never existed.
    fn history(&self, path: &str) -> Result<Vec<CommitMeta>>;

    /// Common ancestor of two revisions.
    fn merge_base(&self, a: &str, b: &str) -> Result<RevId>;

    /// Paths changed between `from` (exclusive) and `to` (inclusive).
    /// With `from = None`, every path present at `to`.
    fn changed_paths(&self, from: Option<&str>, to: &str) -> Result<BTreeSet<String>>;

    /// Current head revision, `None` for an empty repository.
    fn head(&self) -> Result<Option<RevId>>;

    /// All tracked file paths at the current head.
    fn list_paths(&self) -> Result<Vec<String>>;

    /// Every commit in the repository, newest first, with the paths each
    /// one changed. Feeds the wiki-wide changelog.
    fn global_history(&self) -> Result<Vec<(CommitMeta, Vec<String>)>>;
}

/// Open the backend selected by the configuration.
pub fn open_repository(config: &WikiConfig) -> Result<Arc<dyn Repository>> {
    match config.backend {
        VcsBackend::Git => Ok(Arc::new(git::GitRepo::open_or_init(&config.pages_path)?)),
        VcsBackend::Mercurial => Ok(Arc::new(hg::HgRepo::open_or_init(&config.pages_path)?)),
    }
}

/// Encode the commit message: user comment as the summary line, change
/// kind as a trailer.
#[must_use]
pub fn encode_message(comment: &str, kind: ChangeKind) -> String {
    format!("{comment}\n\nChange-Kind: {}\n", kind.as_str())
}

/// Decode a commit message back into (comment, kind). Commits made outside
/// the engine have no trailer and come back as [`ChangeKind::Changed`].
#[must_use]
pub fn decode_message(message: &str) -> (String, ChangeKind) {
    let comment = message.lines().next().unwrap_or_default().to_string();
    let kind = message
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix("Change-Kind: "))
        .map_or(ChangeKind::Changed, ChangeKind::parse);
    (comment, kind)
}

/// Cheap lexical re-validation of a repo-relative path, run by both
/// backends before touching the filesystem. The sandbox performs the full
/// check earlier; the adapter still refuses obviously hostile paths so it
/// is safe even when called directly.
pub(crate) fn validate_rel_path(raw: &str) -> Result<&str> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(VcsError::InvalidPath("empty path".to_string()));
    }
    if s.contains('\\') || s.contains('\0') {
        return Err(VcsError::InvalidPath(raw.to_string()));
    }
    for component in Path::new(s).components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(VcsError::InvalidPath(raw.to_string())),
        }
    }
    Ok(s)
}

/// Remove now-empty directories between a deleted file and the root.
pub(crate) fn prune_empty_dirs(root: &Path, mut dir: Option<&Path>) {
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) {
            break;
        }
        if std::fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}

/// Run `attempt` with bounded exponential backoff on transient errors.
///
/// Backoff schedule: 100 ms, 200 ms, 400 ms, 800 ms, 1600 ms. Exhaustion
/// converts into [`VcsError::Unavailable`], which the store surfaces as
/// `StorageUnavailable`.
pub(crate) fn with_retry<T>(what: &str, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
    let mut last_message = String::new();
    for n in 0..=MAX_RETRIES {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                last_message = err.to_string();
                if n < MAX_RETRIES {
                    let delay_ms = 100 * (1u64 << n.min(4));
                    tracing::debug!(
                        "[vcs] {what}: transient failure on attempt {}, backing off {delay_ms}ms: {err}",
                        n + 1
                    );
                    std::thread::sleep(Duration::from_millis(delay_ms));
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(VcsError::Unavailable {
        what: what.to_string(),
        attempts: MAX_RETRIES,
        message: last_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let message = encode_message("fixed typo", ChangeKind::Modified);
        let (comment, kind) = decode_message(&message);
        assert_eq!(comment, "fixed typo");
        assert_eq!(kind, ChangeKind::Modified);
    }

    #[test]
    fn test_decode_external_message() {
        let (comment, kind) = decode_message("hand-made commit\n\nmore text");
        assert_eq!(comment, "hand-made commit");
        assert_eq!(kind, ChangeKind::Changed);
    }

    #[test]
    fn test_validate_rel_path() {
        assert!(validate_rel_path("Home").is_ok());
        assert!(validate_rel_path("Sub/Page").is_ok());
        assert!(validate_rel_path("../x").is_err());
        assert!(validate_rel_path("/abs").is_err());
        assert!(validate_rel_path("").is_err());
        assert!(validate_rel_path("a\\b").is_err());
    }

    #[test]
    fn test_retry_gives_up_after_bound() {
        let mut calls = 0;
        let result: Result<()> = with_retry("test op", || {
            calls += 1;
            Err(VcsError::Hg("waiting for lock on repository".to_string()))
        });
        assert_eq!(calls, MAX_RETRIES + 1);
        match result {
            Err(VcsError::Unavailable { attempts, .. }) => assert_eq!(attempts, MAX_RETRIES),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_retry_passes_through_permanent_errors() {
        let mut calls = 0;
        let result: Result<()> = with_retry("test op", || {
            calls += 1;
            Err(VcsError::NotFound("X".to_string()))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(VcsError::NotFound(_))));
    }

    #[test]
    fn test_unavailable_converts_to_storage_unavailable() {
        let err: vellum_core::Error = VcsError::Unavailable {
            what: "commit".to_string(),
            attempts: 5,
            message: "lock held".to_string(),
        }
        .into();
        assert_eq!(err.error_type(), "STORAGE_UNAVAILABLE");
    }
}
