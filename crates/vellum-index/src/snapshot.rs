//! On-disk persistence for the derived indices.
//!
//! One JSON document under the cache path holds the per-document postings,
//! the forward link map, the set of existing pages, and the last-indexed
//! repository revision. The write goes through a temporary file and an
//! atomic rename so a crash can at worst lose the latest snapshot, never
//! corrupt it halfway.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::links::LinkEdge;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Repository head revision the indices were last synchronized to.
    pub last_indexed: Option<String>,
    /// Per-document token counts (the search index's source of truth).
    pub documents: BTreeMap<String, BTreeMap<String, u64>>,
    /// Forward link map (the link graph's source of truth).
    pub links: BTreeMap<String, Vec<LinkEdge>>,
    /// Every existing page title, text and binary alike.
    pub pages: BTreeSet<String>,
}

impl IndexSnapshot {
    /// Load a snapshot; `Ok(None)` when none was written yet. A present
    /// but unparseable file is an error (index corruption, handled by the
    /// coordinator with a full rebuild).
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Write the snapshot atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkKind;

    #[test]
    fn test_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = IndexSnapshot::load(&dir.path().join("index.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("index.json");

        let mut snapshot = IndexSnapshot {
            last_indexed: Some("abc123".to_string()),
            ..Default::default()
        };
        snapshot
            .documents
            .entry("Home".to_string())
            .or_default()
            .insert("hello".to_string(), 2);
        snapshot.links.insert(
            "Home".to_string(),
            vec![LinkEdge {
                target: "World".to_string(),
                kind: LinkKind::WikiLink,
            }],
        );
        snapshot.pages.insert("Home".to_string());

        snapshot.save(&path).unwrap();
        let loaded = IndexSnapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded.last_indexed.as_deref(), Some("abc123"));
        assert_eq!(loaded.documents["Home"]["hello"], 2);
        assert_eq!(loaded.links["Home"][0].target, "World");
        assert!(loaded.pages.contains("Home"));
    }

    #[test]
    fn test_garbage_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, b"not json at all").unwrap();
        assert!(IndexSnapshot::load(&path).is_err());
    }
}
