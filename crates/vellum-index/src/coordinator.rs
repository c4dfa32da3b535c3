//! The single authority over index refreshes.
//!
//! Owns exclusive write access to the search index and link graph. Two
//! update paths exist:
//! - `note_write`, called synchronously on every page-store write before
//!   the write returns, so readers never observe a committed revision
//!   with a stale index (read-your-writes);
//! - `catch_up`, which reconciles with repository changes made outside
//!   the running process by reindexing exactly the paths the adapter
//!   reports as changed since the last-indexed revision.
//!
//! The coordinator is an explicitly constructed component passed by handle
//! to the page store, so tests can run any number of independent
//! instances.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use vellum_core::{WikiConfig, file_to_title, is_text_mime, page_mime};
use vellum_vcs::{Repository, VcsError};

use crate::links::{LinkGraph, extract_links};
use crate::search::{SearchHit, SearchIndex};
use crate::snapshot::IndexSnapshot;

struct State {
    search: SearchIndex,
    links: LinkGraph,
    pages: BTreeSet<String>,
    last_indexed: Option<String>,
}

impl State {
    fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            search: SearchIndex::from_document_map(snapshot.documents),
            links: LinkGraph::from_forward_map(snapshot.links),
            pages: snapshot.pages,
            last_indexed: snapshot.last_indexed,
        }
    }

    fn empty() -> Self {
        Self {
            search: SearchIndex::default(),
            links: LinkGraph::default(),
            pages: BTreeSet::new(),
            last_indexed: None,
        }
    }

    fn clear(&mut self) {
        self.search = SearchIndex::default();
        self.links = LinkGraph::default();
        self.pages.clear();
        self.last_indexed = None;
    }

    fn to_snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            last_indexed: self.last_indexed.clone(),
            documents: self.search.to_document_map(),
            links: self.links.to_forward_map(),
            pages: self.pages.clone(),
        }
    }
}

/// Keeps the search index and link graph synchronized with repository
/// state.
pub struct IndexCoordinator {
    repo: Arc<dyn Repository>,
    config: WikiConfig,
    state: RwLock<State>,
    /// Serializes catch-up passes against each other; the in-band
    /// per-write path synchronizes through the state lock.
    catch_up_lock: Mutex<()>,
}

impl IndexCoordinator {
    /// Load (or recover) the persisted indices and reconcile them with the
    /// current repository head.
    pub fn open(repo: Arc<dyn Repository>, config: &WikiConfig) -> vellum_core::Result<Self> {
        let snapshot_path = config.index_snapshot_path();
        let state = match IndexSnapshot::load(&snapshot_path) {
            Ok(Some(snapshot)) => State::from_snapshot(snapshot),
            Ok(None) => State::empty(),
            Err(err) => {
                // Corrupt snapshot: never silently ignored, never fatal;
                // drop it and rebuild from the repository.
                tracing::warn!(
                    "[index] corrupt snapshot at {}: {err}; rebuilding",
                    snapshot_path.display()
                );
                State::empty()
            }
        };

        let coordinator = Self {
            repo,
            config: config.clone(),
            state: RwLock::new(state),
            catch_up_lock: Mutex::new(()),
        };
        coordinator.catch_up()?;
        Ok(coordinator)
    }

    /// In-band index update for a just-committed write. `content` is the
    /// newly committed body (`None` for a deletion); `rev` the new head
    /// revision. Runs before the store's write call returns.
    pub fn note_write(&self, title: &str, content: Option<&[u8]>, rev: &str) {
        let mut state = self.write_state();
        apply_update(&mut state, title, content);
        state.last_indexed = Some(rev.to_string());
        self.persist(&state);
    }

    /// Reconcile with repository changes made outside this process.
    ///
    /// Computes the changed paths between the last-indexed revision and
    /// the current head and reindexes exactly those pages, so the cost is
    /// bounded by the size of the external change. An unknown last-indexed
    /// revision (history rewritten underneath us) is index corruption:
    /// logged and resolved with a full rebuild.
    pub fn catch_up(&self) -> vellum_core::Result<()> {
        let _guard = self
            .catch_up_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let head = self.repo.head().map_err(vellum_core::Error::from)?;
        let last_indexed = self.read_state().last_indexed.clone();
        if head == last_indexed {
            return Ok(());
        }

        let Some(head) = head else {
            // Repository is empty (or was replaced by an empty one).
            let mut state = self.write_state();
            state.clear();
            self.persist(&state);
            return Ok(());
        };

        let changed = match &last_indexed {
            None => self.repo.changed_paths(None, &head),
            Some(last) => match self.repo.changed_paths(Some(last.as_str()), &head) {
                Ok(changed) => Ok(changed),
                Err(err) => {
                    tracing::warn!(
                        "[index] last-indexed revision {last} unusable ({err}); \
                         falling back to full reindex"
                    );
                    let mut state = self.write_state();
                    state.clear();
                    drop(state);
                    self.repo.changed_paths(None, &head)
                }
            },
        }
        .map_err(vellum_core::Error::from)?;

        tracing::info!("[index] catch-up pass over {} changed path(s)", changed.len());

        let mut state = self.write_state();
        for path in &changed {
            let Some(title) = file_to_title(
                path,
                self.config.subdirectories,
                self.config.extension.as_deref(),
            ) else {
                continue;
            };
            let content = match self.repo.read(path, None) {
                Ok(bytes) => Some(bytes),
                Err(VcsError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            };
            apply_update(&mut state, &title, content.as_deref());
        }
        state.last_indexed = Some(head);
        self.persist(&state);
        Ok(())
    }

    /// Cheap staleness probe: compare the repository head against the
    /// last-indexed revision and run a catch-up pass only on mismatch.
    /// Query paths call this so externally-made commits become visible.
    pub fn sync_if_stale(&self) -> vellum_core::Result<()> {
        let head = self.repo.head().map_err(vellum_core::Error::from)?;
        if head == self.read_state().last_indexed {
            return Ok(());
        }
        self.catch_up()
    }

    /// Ranked full-text search over titles and bodies.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.read_state().search.search(query)
    }

    /// Pages whose content links to `target`.
    #[must_use]
    pub fn backlinks_of(&self, target: &str) -> BTreeSet<String> {
        self.read_state().links.backlinks_of(target)
    }

    /// Existing pages nothing links to.
    #[must_use]
    pub fn orphaned_pages(&self) -> Vec<String> {
        let state = self.read_state();
        state.links.orphaned_pages(&state.pages)
    }

    /// Link targets with no corresponding page, with reference counts.
    #[must_use]
    pub fn wanted_pages(&self) -> Vec<(String, usize)> {
        let state = self.read_state();
        state.links.wanted_pages(&state.pages)
    }

    /// Every existing page title known to the index.
    #[must_use]
    pub fn pages(&self) -> BTreeSet<String> {
        self.read_state().pages.clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index persistence failures never fail the write that triggered
    /// them: the commit already landed; the snapshot is rebuilt state.
    fn persist(&self, state: &State) {
        let path = self.config.index_snapshot_path();
        if let Err(err) = state.to_snapshot().save(&path) {
            tracing::warn!("[index] failed to persist snapshot to {}: {err}", path.display());
        }
    }
}

/// Apply one page's new content (or deletion) to both indices.
fn apply_update(state: &mut State, title: &str, content: Option<&[u8]>) {
    match content {
        None => {
            state.search.remove(title);
            state.links.remove(title);
            state.pages.remove(title);
        }
        Some(bytes) => {
            state.pages.insert(title.to_string());
            if is_text_mime(page_mime(title)) {
                let text = String::from_utf8_lossy(bytes);
                state.search.update(title, &text);
                state.links.update(title, extract_links(&text));
            } else {
                // Binary pages exist but are never indexed.
                state.search.remove(title);
                state.links.remove(title);
            }
        }
    }
}
