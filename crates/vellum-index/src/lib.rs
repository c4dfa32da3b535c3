//! Derived indices for the Vellum wiki storage engine.
//!
//! Two per-page artifacts are maintained here, both always derivable from
//! the latest committed revision:
//! - an inverted full-text index over page titles and bodies
//!   ([`SearchIndex`])
//! - the inter-page link graph with its backlink inverse ([`LinkGraph`])
//!
//! The [`IndexCoordinator`] is the single authority deciding when either
//! is refreshed: synchronously on every store write, and via a bounded
//! catch-up pass when the repository was modified outside the running
//! process. Both indices persist together in one JSON snapshot under the
//! cache path.

#![forbid(unsafe_code)]

pub mod coordinator;
pub mod links;
pub mod search;
pub mod snapshot;
pub mod tokenize;

use thiserror::Error;

pub use coordinator::IndexCoordinator;
pub use links::{LinkEdge, LinkGraph, LinkKind, extract_links};
pub use search::{SearchHit, SearchIndex};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("index snapshot disagrees with repository: {0}")]
    Corrupt(String),
}

impl From<IndexError> for vellum_core::Error {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Io(io) => Self::Io(io),
            IndexError::Corrupt(message) => Self::IndexCorruption(message),
            IndexError::Json(json) => Self::IndexCorruption(json.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_to_taxonomy() {
        let err: vellum_core::Error =
            IndexError::Corrupt("postings disagree with repository".to_string()).into();
        assert_eq!(err.error_type(), "INDEX_CORRUPTION");

        let err: vellum_core::Error = IndexError::Io(std::io::Error::other("disk")).into();
        assert_eq!(err.error_type(), "OS_ERROR");
    }
}
