//! Path sandbox for the Vellum wiki storage engine.
//!
//! Every page file name is validated here before it reaches the repository
//! adapter. The invariant is absolute: no path outside the configured
//! repository root is ever read or written. Validation never partially
//! succeeds: a path is either fully inside the sandbox or rejected.

#![forbid(unsafe_code)]

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Why a path was rejected.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("path {0:?} escapes the repository root")]
    Escape(String),

    #[error("invalid path {0:?}: {1}")]
    InvalidPath(String, &'static str),

    #[error("path {} passes through a symbolic link", .0.display())]
    Symlink(PathBuf),

    #[error("path {} is a directory, not a page file", .0.display())]
    IsDirectory(PathBuf),

    #[error("cannot establish repository root: {0}")]
    Root(std::io::Error),
}

impl From<SandboxError> for vellum_core::Error {
    fn from(err: SandboxError) -> Self {
        Self::SandboxViolation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Validates repository-relative page paths against a canonicalized root.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    subdirectories: bool,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`, creating and canonicalizing the
    /// directory. All symlinks in the root itself are resolved once here so
    /// later descendant checks compare real paths.
    pub fn new(root: &Path, subdirectories: bool) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(SandboxError::Root)?;
        let root = root.canonicalize().map_err(SandboxError::Root)?;
        Ok(Self {
            root,
            subdirectories,
        })
    }

    /// The canonicalized repository root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a repository-relative file path lexically: non-empty,
    /// forward slashes only, no NUL, only normal components (no `.`, `..`,
    /// absolute prefixes), and no hidden components that could target
    /// repository internals (`.git`, `.hg`, the index cache).
    pub fn validate_rel<'a>(&self, rel: &'a str) -> Result<&'a str> {
        let s = rel.trim();
        if s.is_empty() {
            return Err(SandboxError::InvalidPath(rel.to_string(), "empty path"));
        }
        if s.contains('\\') {
            return Err(SandboxError::InvalidPath(
                rel.to_string(),
                "must use forward slashes",
            ));
        }
        if s.contains('\0') {
            return Err(SandboxError::InvalidPath(
                rel.to_string(),
                "must not contain NUL",
            ));
        }

        for component in Path::new(s).components() {
            match component {
                Component::Normal(part) => {
                    if part.to_string_lossy().starts_with('.') {
                        return Err(SandboxError::InvalidPath(
                            rel.to_string(),
                            "hidden path components are reserved",
                        ));
                    }
                }
                Component::CurDir | Component::ParentDir => {
                    return Err(SandboxError::Escape(rel.to_string()));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::InvalidPath(
                        rel.to_string(),
                        "must be relative to the repository root",
                    ));
                }
            }
        }
        Ok(s)
    }

    /// Resolve a repository-relative file path to an absolute path,
    /// verifying it stays a strict descendant of the root and that no
    /// component on the way is a symbolic link. The final component may be
    /// a directory only in subdirectory-pages mode (a directory page).
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let rel = self.validate_rel(rel)?;

        let mut resolved = self.root.clone();
        for component in Path::new(rel).components() {
            resolved.push(component);
            if let Ok(meta) = resolved.symlink_metadata() {
                if meta.file_type().is_symlink() {
                    tracing::warn!("[sandbox] rejecting symlink component {}", resolved.display());
                    return Err(SandboxError::Symlink(resolved));
                }
            }
        }

        // Root is canonical and every component is plain and link-free, so
        // the result cannot leave the root; keep a final guard anyway.
        if !resolved.starts_with(&self.root) {
            return Err(SandboxError::Escape(rel.to_string()));
        }

        if resolved.is_dir() && !self.subdirectories {
            return Err(SandboxError::IsDirectory(resolved));
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(subdirectories: bool) -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), subdirectories).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn test_accepts_plain_names() {
        let (_dir, sb) = sandbox(false);
        assert!(sb.resolve("Home").is_ok());
        assert!(sb.resolve("Front%20Page").is_ok());
    }

    #[test]
    fn test_rejects_parent_components() {
        let (_dir, sb) = sandbox(false);
        for path in ["../escape", "a/../../b", "..", "a/.."] {
            assert!(
                matches!(sb.resolve(path), Err(SandboxError::Escape(_))),
                "{path:?} should be rejected as escape"
            );
        }
    }

    #[test]
    fn test_rejects_absolute_and_empty() {
        let (_dir, sb) = sandbox(false);
        assert!(matches!(
            sb.resolve("/etc/passwd"),
            Err(SandboxError::InvalidPath(..))
        ));
        assert!(matches!(
            sb.resolve(""),
            Err(SandboxError::InvalidPath(..))
        ));
        assert!(matches!(
            sb.resolve("  "),
            Err(SandboxError::InvalidPath(..))
        ));
    }

    #[test]
    fn test_rejects_hidden_components() {
        let (_dir, sb) = sandbox(true);
        for path in [".git/config", ".hg/store", "a/.hidden"] {
            assert!(
                matches!(sb.resolve(path), Err(SandboxError::InvalidPath(..))),
                "{path:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_backslash_and_nul() {
        let (_dir, sb) = sandbox(false);
        assert!(matches!(
            sb.resolve("a\\b"),
            Err(SandboxError::InvalidPath(..))
        ));
        assert!(matches!(
            sb.resolve("a\0b"),
            Err(SandboxError::InvalidPath(..))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_components() {
        let (dir, sb) = sandbox(true);
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert!(matches!(
            sb.resolve("link"),
            Err(SandboxError::Symlink(_))
        ));
        assert!(matches!(
            sb.resolve("link/page"),
            Err(SandboxError::Symlink(_))
        ));
    }

    #[test]
    fn test_directory_target_depends_on_mode() {
        let (dir, flat) = sandbox(false);
        std::fs::create_dir(dir.path().join("Section")).unwrap();
        assert!(matches!(
            flat.resolve("Section"),
            Err(SandboxError::IsDirectory(_))
        ));

        let subdir_sandbox = Sandbox::new(dir.path(), true).unwrap();
        assert!(subdir_sandbox.resolve("Section").is_ok());
    }

    #[test]
    fn test_error_converts_to_sandbox_violation() {
        let (_dir, sb) = sandbox(false);
        let err: vellum_core::Error = sb.resolve("../x").unwrap_err().into();
        assert_eq!(err.error_type(), "SANDBOX_VIOLATION");
    }
}
