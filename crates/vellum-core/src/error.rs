//! Error taxonomy for the Vellum storage engine.
//!
//! Every failure that crosses the public `PageStore` boundary is one of
//! these variants; the per-crate source errors (vcs, sandbox, index) are
//! converted in before they reach a caller.

use thiserror::Error;

/// Result type alias for Vellum operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Public error taxonomy of the storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A page name or file path escaped the repository root, passed through
    /// a symbolic link, or otherwise failed sandbox validation. Security
    /// critical: rejected immediately, never retried.
    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),

    /// The requested page or revision has no committed content.
    #[error("Page not found: {0}")]
    PageNotFound(String),

    /// The repository backend kept failing after bounded retries.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The store is configured read-only; all writes are rejected before
    /// any sandbox or conflict work happens.
    #[error("Wiki is in read-only mode")]
    ReadOnlyMode,

    /// A concurrent edit could not be merged cleanly. The conflicting
    /// revision was still committed (no edit is lost); the author has to
    /// resolve the marked-up regions manually.
    #[error("Edit conflict requires manual resolution: {0}")]
    ConflictUnresolved(String),

    /// Index state disagreed irreconcilably with repository content.
    /// Triggers a reindex of the affected titles; never silently ignored.
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable error code string, for callers that render or log failures
    /// without matching on variants.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::SandboxViolation(_) => "SANDBOX_VIOLATION",
            Self::PageNotFound(_) => "PAGE_NOT_FOUND",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::ReadOnlyMode => "READ_ONLY",
            Self::ConflictUnresolved(_) => "CONFLICT_UNRESOLVED",
            Self::IndexCorruption(_) => "INDEX_CORRUPTION",
            Self::Io(_) => "OS_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether the caller can reasonably recover: offer page creation for
    /// a missing page, retry later for an unavailable backend, or follow
    /// up with a manual edit for an unresolved conflict.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PageNotFound(_)
                | Self::StorageUnavailable(_)
                | Self::ConflictUnresolved(_)
                | Self::IndexCorruption(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exhaustive test: every variant maps to the correct `error_type` code.
    #[test]
    fn test_error_type_mapping_exhaustive() {
        let cases: Vec<(Error, &str)> = vec![
            (Error::SandboxViolation("x".into()), "SANDBOX_VIOLATION"),
            (Error::PageNotFound("x".into()), "PAGE_NOT_FOUND"),
            (Error::StorageUnavailable("x".into()), "STORAGE_UNAVAILABLE"),
            (Error::ReadOnlyMode, "READ_ONLY"),
            (Error::ConflictUnresolved("x".into()), "CONFLICT_UNRESOLVED"),
            (Error::IndexCorruption("x".into()), "INDEX_CORRUPTION"),
            (Error::Io(std::io::Error::other("x")), "OS_ERROR"),
            (Error::Internal("x".into()), "INTERNAL"),
        ];

        for (err, expected) in &cases {
            assert_eq!(
                err.error_type(),
                *expected,
                "Error {err:?} should map to {expected}"
            );
        }
    }

    #[test]
    fn test_recoverable_classification() {
        let recoverable = vec![
            Error::PageNotFound("x".into()),
            Error::StorageUnavailable("x".into()),
            Error::ConflictUnresolved("x".into()),
            Error::IndexCorruption("x".into()),
        ];
        for err in &recoverable {
            assert!(err.is_recoverable(), "Error {err:?} should be recoverable");
        }

        let fatal = vec![
            Error::SandboxViolation("x".into()),
            Error::ReadOnlyMode,
            Error::Io(std::io::Error::other("x")),
            Error::Internal("x".into()),
        ];
        for err in &fatal {
            assert!(
                !err.is_recoverable(),
                "Error {err:?} should NOT be recoverable"
            );
        }
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::ReadOnlyMode.to_string(),
            "Wiki is in read-only mode"
        );
        assert_eq!(
            Error::PageNotFound("Home".into()).to_string(),
            "Page not found: Home"
        );
    }
}
