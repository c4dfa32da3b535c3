//! The page store: the public surface of the Vellum wiki storage engine.
//!
//! Orchestrates every read/write/history/undo/delete operation:
//! a write is rejected first when the store is read-only, then validated by
//! the path sandbox, then merged against the page's current revision when
//! its declared base is stale, then committed through the repository
//! adapter, and finally folded into the search index and link graph before
//! the call returns, so readers never observe a committed revision with a
//! stale index.
//!
//! Writes to the same title are strictly serialized in arrival order
//! through a per-title lock registry; writes to different titles proceed
//! concurrently.

#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use vellum_core::{
    ChangeKind, Error, Result, RevisionMeta, WikiConfig, WriteOutcome, is_text_mime, page_mime,
    title::{INDEX_PAGE, title_to_file},
};
use vellum_index::IndexCoordinator;
use vellum_merge::{binary_conflict, merge3};
use vellum_sandbox::Sandbox;
use vellum_vcs::{Repository, VcsError, open_repository};

/// Comment recorded on a conflict-free automatic merge.
const MERGE_CLEAN_COMMENT: &str = "merge of edit conflict";
/// Comment recorded when the merge left conflict markers behind.
const MERGE_FAILED_COMMENT: &str = "failed merge of edit conflict";
/// Author recorded on merge commits the engine makes on its own.
const MERGE_AUTHOR: &str = "<wiki>";

/// One full-text search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    /// Short plain-text excerpt around the first query term.
    pub snippet: String,
    pub score: u64,
}

/// Version-controlled page store with synchronized derived indices.
pub struct PageStore {
    config: WikiConfig,
    sandbox: Sandbox,
    repo: Arc<dyn Repository>,
    index: Arc<IndexCoordinator>,
    title_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PageStore {
    /// Open (or create) the store described by `config`: repository,
    /// sandbox, and indices, including the startup index catch-up pass.
    pub fn open(config: WikiConfig) -> Result<Self> {
        let sandbox = Sandbox::new(&config.pages_path, config.subdirectories)?;
        let repo = open_repository(&config)?;
        let index = Arc::new(IndexCoordinator::open(Arc::clone(&repo), &config)?);
        Ok(Self {
            config,
            sandbox,
            repo,
            index,
            title_locks: Mutex::new(HashMap::new()),
        })
    }

    /// The engine configuration this store was built with.
    #[must_use]
    pub fn config(&self) -> &WikiConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Read a page: its current content, or the content at `revision`
    /// (per-page sequence number). A tombstone revision reads as empty
    /// content; a page with no revisions at all is `PageNotFound`.
    pub fn read(&self, title: &str, revision: Option<u64>) -> Result<(Vec<u8>, RevisionMeta)> {
        let path = self.page_path(title)?;
        let revisions = self.page_revisions(title, &path)?;
        let Some(current) = revisions.first() else {
            return Err(Error::PageNotFound(title.to_string()));
        };

        match revision {
            None => {
                let content = match self.repo.read(&path, None) {
                    Ok(bytes) => bytes,
                    Err(VcsError::NotFound(_)) => {
                        // Deleted at head: the page no longer exists.
                        return Err(Error::PageNotFound(title.to_string()));
                    }
                    Err(err) => return Err(err.into()),
                };
                Ok((content, current.clone()))
            }
            Some(number) => {
                let meta = revisions
                    .iter()
                    .find(|r| r.number == number)
                    .cloned()
                    .ok_or_else(|| {
                        Error::PageNotFound(format!("{title} revision {number}"))
                    })?;
                let content = match self.repo.read(&path, Some(&meta.rev)) {
                    Ok(bytes) => bytes,
                    // The revision exists but holds no content: tombstone.
                    Err(VcsError::NotFound(_)) => Vec::new(),
                    Err(err) => return Err(err.into()),
                };
                Ok((content, meta))
            }
        }
    }

    /// Whether the page currently exists (has readable content at head).
    #[must_use]
    pub fn exists(&self, title: &str) -> bool {
        self.read(title, None).is_ok()
    }

    /// Revision metadata of a page, newest first.
    pub fn history(&self, title: &str) -> Result<Vec<RevisionMeta>> {
        let path = self.page_path(title)?;
        let revisions = self.page_revisions(title, &path)?;
        if revisions.is_empty() {
            return Err(Error::PageNotFound(title.to_string()));
        }
        Ok(revisions)
    }

    /// Revision metadata across the whole wiki, newest first.
    pub fn global_history(&self) -> Result<Vec<RevisionMeta>> {
        let log = self.repo.global_history().map_err(Error::from)?;

        // Per-page sequence numbers are assigned oldest-first.
        let mut counters: HashMap<String, u64> = HashMap::new();
        let mut entries: Vec<RevisionMeta> = Vec::new();
        for (commit, paths) in log.into_iter().rev() {
            for path in paths {
                let Some(title) = self.title_of(&path) else {
                    continue;
                };
                let number = counters.entry(title.clone()).or_insert(0);
                *number += 1;
                entries.push(RevisionMeta {
                    title,
                    number: *number,
                    rev: commit.rev.clone(),
                    author: commit.author.clone(),
                    comment: commit.comment.clone(),
                    timestamp: commit.timestamp,
                    kind: commit.kind,
                });
            }
        }
        entries.reverse();
        Ok(entries)
    }

    /// Titles of every existing page, sorted.
    pub fn all_pages(&self) -> Result<Vec<String>> {
        self.index.sync_if_stale()?;
        Ok(self.index.pages().into_iter().collect())
    }

    /// Titles changed since the given repository revision.
    pub fn changed_since(&self, rev: &str) -> Result<Vec<String>> {
        let Some(head) = self.repo.head().map_err(Error::from)? else {
            return Ok(Vec::new());
        };
        let paths = self
            .repo
            .changed_paths(Some(rev), &head)
            .map_err(Error::from)?;
        Ok(paths.iter().filter_map(|p| self.title_of(p)).collect())
    }

    // -----------------------------------------------------------------
    // Queries served from the derived indices
    // -----------------------------------------------------------------

    /// Ranked full-text search; every query term must match.
    pub fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.index.sync_if_stale()?;
        let hits = self.index.search(query);
        let first_term: Option<String> = vellum_index::tokenize::tokens(query).next();

        Ok(hits
            .into_iter()
            .map(|hit| {
                let snippet = self
                    .page_path(&hit.title)
                    .ok()
                    .and_then(|path| self.repo.read(&path, None).ok())
                    .map(|content| {
                        make_snippet(
                            &String::from_utf8_lossy(&content),
                            first_term.as_deref().unwrap_or_default(),
                        )
                    })
                    .unwrap_or_default();
                SearchResult {
                    title: hit.title,
                    snippet,
                    score: hit.score,
                }
            })
            .collect())
    }

    /// Pages whose content links to `title`.
    pub fn backlinks_of(&self, title: &str) -> Result<BTreeSet<String>> {
        self.index.sync_if_stale()?;
        Ok(self.index.backlinks_of(title))
    }

    /// Existing pages with zero incoming links, title-sorted.
    pub fn orphaned_pages(&self) -> Result<Vec<String>> {
        self.index.sync_if_stale()?;
        Ok(self.index.orphaned_pages())
    }

    /// Link targets with no page yet, with reference counts.
    pub fn wanted_pages(&self) -> Result<Vec<(String, usize)>> {
        self.index.sync_if_stale()?;
        Ok(self.index.wanted_pages())
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Write new page content.
    ///
    /// `base_revision` is the per-page revision number the edit was
    /// authored against (`None` skips conflict detection). When the base
    /// is no longer current, the conflict resolver merges the two
    /// versions; a conflicted merge still commits (marked up, flagged in
    /// the outcome) so no edit is ever lost.
    pub fn write(
        &self,
        title: &str,
        base_revision: Option<u64>,
        content: &[u8],
        author: &str,
        comment: &str,
    ) -> Result<WriteOutcome> {
        if self.config.read_only {
            return Err(Error::ReadOnlyMode);
        }
        let path = self.page_path(title)?;
        let lock = self.title_lock(title);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let text_page = is_text_mime(page_mime(title));
        let proposed = self.normalize_content(content, text_page);

        let revisions = self.page_revisions(title, &path)?;
        let current_number = revisions.first().map_or(0, |r| r.number);
        let current = match self.repo.read(&path, None) {
            Ok(bytes) => Some(bytes),
            Err(VcsError::NotFound(_)) => None,
            Err(err) => return Err(err.into()),
        };

        let author = self.config.author_or_default(author).to_string();
        let comment = self.config.comment_or_default(comment).to_string();

        let plan = match (&current, base_revision) {
            // New page (or recreation over a tombstone): nothing to merge.
            (None, _) => WritePlan {
                content: proposed,
                author,
                comment,
                kind: if text_page {
                    ChangeKind::Created
                } else {
                    ChangeKind::Uploaded
                },
                merged: false,
                conflict: false,
            },
            // No declared base, or a base that is still current.
            (Some(_), None) => WritePlan {
                content: proposed,
                author,
                comment,
                kind: if text_page {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Uploaded
                },
                merged: false,
                conflict: false,
            },
            (Some(_), Some(base)) if base == current_number => WritePlan {
                content: proposed,
                author,
                comment,
                kind: if text_page {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Uploaded
                },
                merged: false,
                conflict: false,
            },
            // Concurrent edit: the declared base is no longer current.
            (Some(current), Some(base)) => {
                self.merge_plan(title, &path, &revisions, base, current, proposed, text_page)?
            }
        };

        // Identical content needs no new revision; both backends then
        // behave the same for no-op writes.
        if let Some(current) = &current {
            if *current == plan.content {
                let revision = revisions[0].clone();
                return Ok(WriteOutcome {
                    revision,
                    merged: plan.merged,
                    conflict: plan.conflict,
                });
            }
        }

        if plan.conflict {
            tracing::warn!(
                "[store] edit conflict on {title:?} needs manual resolution (base {base_revision:?}, current {current_number})"
            );
        }

        if self.config.subdirectories {
            self.ensure_directory_ancestors(&path)?;
        }

        let rev = self
            .repo
            .commit(&path, Some(&plan.content), &plan.author, &plan.comment, plan.kind)
            .map_err(Error::from)?;

        // In-band index update: complete before this call returns.
        self.index.note_write(title, Some(&plan.content), &rev);

        let revision = self.committed_revision(title, &path, &rev)?;
        Ok(WriteOutcome {
            revision,
            merged: plan.merged,
            conflict: plan.conflict,
        })
    }

    /// Re-commit the content of `target_revision` as a fresh revision
    /// based on the current one, going through the same conflict path as
    /// any other write.
    pub fn undo(&self, title: &str, target_revision: u64, author: &str) -> Result<WriteOutcome> {
        if self.config.read_only {
            return Err(Error::ReadOnlyMode);
        }
        let (content, _) = self.read(title, Some(target_revision))?;
        let current = self.history(title)?[0].number;
        let comment = format!("undo of change {target_revision}");
        self.write(title, Some(current), &content, author, &comment)
    }

    /// Append a tombstone revision: the page stops existing, its history
    /// stays.
    pub fn delete(&self, title: &str, author: &str, comment: &str) -> Result<RevisionMeta> {
        if self.config.read_only {
            return Err(Error::ReadOnlyMode);
        }
        let path = self.page_path(title)?;
        let lock = self.title_lock(title);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if matches!(self.repo.read(&path, None), Err(VcsError::NotFound(_))) {
            return Err(Error::PageNotFound(title.to_string()));
        }

        let author = self.config.author_or_default(author).to_string();
        let comment = self.config.comment_or_default(comment).to_string();
        let rev = self
            .repo
            .commit(&path, None, &author, &comment, ChangeKind::Changed)
            .map_err(Error::from)?;

        self.index.note_write(title, None, &rev);
        self.committed_revision(title, &path, &rev)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Map a title to its sandbox-validated repository-relative path.
    fn page_path(&self, title: &str) -> Result<String> {
        if title.trim().is_empty() {
            return Err(Error::SandboxViolation("empty page title".to_string()));
        }
        let mut rel = title_to_file(title, self.config.subdirectories, None);

        // A directory page stores its content in an index file.
        if self.config.subdirectories {
            let probe = self.sandbox.resolve(&rel)?;
            if probe.is_dir() {
                rel.push('/');
                rel.push_str(INDEX_PAGE);
            }
        }
        if page_mime(title) == "text/x-wiki" {
            if let Some(ext) = &self.config.extension {
                rel.push_str(ext);
            }
        }

        self.sandbox.resolve(&rel)?;
        Ok(rel)
    }

    fn title_of(&self, path: &str) -> Option<String> {
        vellum_core::file_to_title(
            path,
            self.config.subdirectories,
            self.config.extension.as_deref(),
        )
    }

    /// Page history with per-page sequence numbers assigned (newest
    /// first; the oldest revision is number 1).
    fn page_revisions(&self, title: &str, path: &str) -> Result<Vec<RevisionMeta>> {
        let commits = self.repo.history(path).map_err(Error::from)?;
        let total = commits.len() as u64;
        Ok(commits
            .into_iter()
            .enumerate()
            .map(|(i, commit)| RevisionMeta {
                title: title.to_string(),
                number: total - i as u64,
                rev: commit.rev,
                author: commit.author,
                comment: commit.comment,
                timestamp: commit.timestamp,
                kind: commit.kind,
            })
            .collect())
    }

    /// Metadata of the revision a commit just created.
    fn committed_revision(&self, title: &str, path: &str, rev: &str) -> Result<RevisionMeta> {
        self.page_revisions(title, path)?
            .into_iter()
            .find(|r| r.rev == rev)
            .ok_or_else(|| {
                Error::Internal(format!("commit {rev} missing from history of {title:?}"))
            })
    }

    /// Build the content/metadata for a concurrent-edit write.
    #[allow(clippy::too_many_arguments)]
    fn merge_plan(
        &self,
        title: &str,
        path: &str,
        revisions: &[RevisionMeta],
        base: u64,
        current: &[u8],
        proposed: Vec<u8>,
        text_page: bool,
    ) -> Result<WritePlan> {
        if !text_page {
            // Binary content cannot be merged; keep both bodies so no
            // edit is lost and let the author sort it out.
            return Ok(WritePlan {
                content: binary_conflict(current, &proposed),
                author: MERGE_AUTHOR.to_string(),
                comment: MERGE_FAILED_COMMENT.to_string(),
                kind: ChangeKind::Merge,
                merged: true,
                conflict: true,
            });
        }

        // Base 0 means the page did not exist when the edit started.
        let base_content = if base == 0 {
            Vec::new()
        } else {
            let base_meta = revisions
                .iter()
                .find(|r| r.number == base)
                .ok_or_else(|| Error::PageNotFound(format!("{title} revision {base}")))?;
            match self.repo.read(path, Some(&base_meta.rev)) {
                Ok(bytes) => bytes,
                Err(VcsError::NotFound(_)) => Vec::new(),
                Err(err) => return Err(err.into()),
            }
        };

        let merged = merge3(
            &String::from_utf8_lossy(&base_content),
            &String::from_utf8_lossy(current),
            &String::from_utf8_lossy(&proposed),
        );
        let clean = merged.is_clean();
        Ok(WritePlan {
            content: merged.render().into_bytes(),
            author: MERGE_AUTHOR.to_string(),
            comment: if clean {
                MERGE_CLEAN_COMMENT.to_string()
            } else {
                MERGE_FAILED_COMMENT.to_string()
            },
            kind: ChangeKind::Merge,
            merged: true,
            conflict: !clean,
        })
    }

    /// In subdirectory mode a flat page can become the parent of a
    /// subpage. Each ancestor that currently is a page file turns into a
    /// directory page: its content moves into the directory's index file.
    fn ensure_directory_ancestors(&self, path: &str) -> Result<()> {
        let components: Vec<&str> = path.split('/').collect();
        for depth in 1..components.len() {
            let ancestor = components[..depth].join("/");
            if !self.sandbox.root().join(&ancestor).is_file() {
                continue;
            }
            let content = match self.repo.read(&ancestor, None) {
                Ok(bytes) => bytes,
                // Untracked stray file; committing the subpage will fail
                // on the directory creation, which is the right error.
                Err(VcsError::NotFound(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            tracing::info!("[store] turning page {ancestor:?} into a directory page");
            self.repo
                .commit(
                    &ancestor,
                    None,
                    MERGE_AUTHOR,
                    "made subdirectory page",
                    ChangeKind::Changed,
                )
                .map_err(Error::from)?;
            let index_rel = format!("{ancestor}/{INDEX_PAGE}");
            self.repo
                .commit(
                    &index_rel,
                    Some(&content),
                    MERGE_AUTHOR,
                    "made subdirectory page",
                    ChangeKind::Changed,
                )
                .map_err(Error::from)?;
        }
        Ok(())
    }

    fn normalize_content(&self, content: &[u8], text_page: bool) -> Vec<u8> {
        if text_page && self.config.unix_eol {
            let text = String::from_utf8_lossy(content);
            text.replace("\r\n", "\n").into_bytes()
        } else {
            content.to_vec()
        }
    }

    /// Per-title lock registry: writes to one title serialize in arrival
    /// order, writes to different titles run concurrently.
    fn title_lock(&self, title: &str) -> Arc<Mutex<()>> {
        let mut map = self
            .title_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(title.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Everything a write commits, decided before touching the repository.
struct WritePlan {
    content: Vec<u8>,
    author: String,
    comment: String,
    kind: ChangeKind,
    merged: bool,
    conflict: bool,
}

/// Short plain-text excerpt around the first occurrence of `term`.
fn make_snippet(text: &str, term: &str) -> String {
    const BEFORE: usize = 40;
    const AFTER: usize = 80;

    let lower = text.to_lowercase();
    let pos = if !term.is_empty() && lower.len() == text.len() {
        lower
            .find(term)
            .filter(|&p| text.is_char_boundary(p))
            .unwrap_or(0)
    } else {
        0
    };

    let start = boundary_at_or_before(text, pos.saturating_sub(BEFORE));
    let end = boundary_at_or_after(text, (pos + AFTER).min(text.len()));

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(text[start..end].trim().replace('\n', " ").as_str());
    if end < text.len() {
        snippet.push_str("...");
    }
    snippet
}

fn boundary_at_or_before(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn boundary_at_or_after(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
