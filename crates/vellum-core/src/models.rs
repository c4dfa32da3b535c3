//! Revision and page models shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What kind of change a revision records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// First revision of a text page.
    Created,
    /// Regular edit of an existing text page.
    Modified,
    /// Binary content stored for the page.
    Uploaded,
    /// Any other repository change (deletion tombstones, external edits).
    Changed,
    /// Result of merging a concurrent edit, clean or conflict-marked.
    Merge,
}

impl ChangeKind {
    /// Wire form used in the `Change-Kind:` commit-message trailer.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Uploaded => "uploaded",
            Self::Changed => "changed",
            Self::Merge => "merge",
        }
    }

    /// Parse the trailer form back; unknown values map to `Changed` so
    /// externally-made commits still get usable history entries.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "created" => Self::Created,
            "modified" => Self::Modified,
            "uploaded" => Self::Uploaded,
            "merge" => Self::Merge,
            _ => Self::Changed,
        }
    }
}

/// Immutable metadata of one page revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMeta {
    /// Title of the page this revision belongs to.
    pub title: String,
    /// Per-page sequence number, strictly increasing and contiguous from 1.
    pub number: u64,
    /// Backend commit identifier (git/hg hash).
    pub rev: String,
    pub author: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
}

/// Result of a successful `write`.
///
/// A conflicted merge still commits (no edit is silently lost), so the
/// conflict is surfaced as data here rather than as a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// The newly created revision.
    pub revision: RevisionMeta,
    /// True when the write went through the conflict resolver at all
    /// (the declared base was no longer the current revision).
    pub merged: bool,
    /// True when the committed content contains conflict markers that
    /// need manual resolution.
    pub conflict: bool,
}

impl WriteOutcome {
    /// Treat an unresolved conflict as an error, for edit layers that
    /// prefer the taxonomy over inspecting flags.
    pub fn into_result(self) -> Result<RevisionMeta> {
        if self.conflict {
            Err(Error::ConflictUnresolved(self.revision.title))
        } else {
            Ok(self.revision)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kind_round_trip() {
        for kind in [
            ChangeKind::Created,
            ChangeKind::Modified,
            ChangeKind::Uploaded,
            ChangeKind::Changed,
            ChangeKind::Merge,
        ] {
            assert_eq!(ChangeKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_change_kind_unknown_maps_to_changed() {
        assert_eq!(ChangeKind::parse("refactor"), ChangeKind::Changed);
        assert_eq!(ChangeKind::parse(""), ChangeKind::Changed);
    }

    fn meta(conflict_title: &str) -> RevisionMeta {
        RevisionMeta {
            title: conflict_title.to_string(),
            number: 2,
            rev: "abc123".to_string(),
            author: "alice".to_string(),
            comment: "edit".to_string(),
            timestamp: Utc::now(),
            kind: ChangeKind::Modified,
        }
    }

    #[test]
    fn test_write_outcome_into_result() {
        let clean = WriteOutcome {
            revision: meta("Home"),
            merged: false,
            conflict: false,
        };
        assert!(clean.into_result().is_ok());

        let conflicted = WriteOutcome {
            revision: meta("Home"),
            merged: true,
            conflict: true,
        };
        match conflicted.into_result() {
            Err(Error::ConflictUnresolved(title)) => assert_eq!(title, "Home"),
            other => panic!("expected ConflictUnresolved, got {other:?}"),
        }
    }

    #[test]
    fn test_revision_meta_serde_round_trip() {
        let meta = meta("Home");
        let json = serde_json::to_string(&meta).unwrap();
        let back: RevisionMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
