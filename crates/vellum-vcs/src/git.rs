//! Git backend for the repository adapter.
//!
//! Commits are built with plumbing operations only (blob, treebuilder,
//! commit on `HEAD`), so the git index is never read or written and the
//! only contention point is the ref lock, which the retry loop covers.
//! The working tree is kept in sync with every commit so the on-disk
//! directory mirrors the repository head.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{ErrorCode, ObjectType, Oid, Signature, TreeWalkMode, TreeWalkResult};

use vellum_core::ChangeKind;

use crate::{CommitMeta, Repository, Result, RevId, VcsError, decode_message, encode_message,
            prune_empty_dirs, validate_rel_path, with_retry};

/// Committer email recorded on every engine-made commit; authors are
/// free-form display names without addresses.
const COMMIT_EMAIL: &str = "wiki@localhost";

/// Git-backed page repository.
///
/// `git2::Repository` handles are not `Sync`, so one is opened per
/// operation; the struct itself only carries the root path.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Open the repository at `root`, initializing a fresh one when the
    /// directory is not a git repository yet.
    pub fn open_or_init(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        match git2::Repository::open(root) {
            Ok(_) => {}
            Err(_) => {
                tracing::info!("[vcs-git] initializing repository at {}", root.display());
                git2::Repository::init(root)?;
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn open(&self) -> Result<git2::Repository> {
        Ok(git2::Repository::open(&self.root)?)
    }

    fn commit_once(
        &self,
        path: &str,
        content: Option<&[u8]>,
        author: &str,
        comment: &str,
        kind: ChangeKind,
    ) -> Result<RevId> {
        let repo = self.open()?;

        // Mirror the change into the working tree first, so the directory
        // on disk matches the new head.
        let full = self.root.join(path);
        match content {
            Some(bytes) => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&full, bytes)?;
            }
            None => {
                let _ = fs::remove_file(&full);
                prune_empty_dirs(&self.root, full.parent());
            }
        }

        let sig = Signature::now(author, COMMIT_EMAIL)?;
        let parent = head_commit(&repo)?;
        let base_tree = parent.as_ref().map(git2::Commit::tree).transpose()?;

        let blob = content.map(|bytes| repo.blob(bytes)).transpose()?;
        let updates = [(path.to_string(), blob)];
        let tree_oid = build_tree_with_updates(&repo, base_tree.as_ref(), &updates)?;
        let tree = repo.find_tree(tree_oid)?;

        let message = encode_message(comment, kind);
        let oid = match parent {
            Some(ref p) => repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[p])?,
            None => repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])?,
        };
        Ok(oid.to_string())
    }
}

impl Repository for GitRepo {
    fn commit(
        &self,
        path: &str,
        content: Option<&[u8]>,
        author: &str,
        comment: &str,
        kind: ChangeKind,
    ) -> Result<RevId> {
        let path = validate_rel_path(path)?;
        with_retry("git commit", || {
            self.commit_once(path, content, author, comment, kind)
        })
    }

    fn read(&self, path: &str, rev: Option<&str>) -> Result<Vec<u8>> {
        let path = validate_rel_path(path)?;
        let repo = self.open()?;
        let commit = match rev {
            Some(rev) => repo.find_commit(parse_oid(rev)?)?,
            None => head_commit(&repo)?.ok_or_else(|| VcsError::NotFound(path.to_string()))?,
        };
        let tree = commit.tree()?;
        let entry = tree
            .get_path(Path::new(path))
            .map_err(|_| VcsError::NotFound(path.to_string()))?;
        let blob = repo
            .find_blob(entry.id())
            .map_err(|_| VcsError::NotFound(path.to_string()))?;
        Ok(blob.content().to_vec())
    }

    fn history(&self, path: &str) -> Result<Vec<CommitMeta>> {
        let path = validate_rel_path(path)?;
        let repo = self.open()?;
        if head_commit(&repo)?.is_none() {
            return Ok(Vec::new());
        }

        let mut revwalk = repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.set_sorting(git2::Sort::TIME)?;

        let target = Path::new(path);
        let mut commits = Vec::new();
        for oid in revwalk {
            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            if commit_touches_path(&commit, target)? {
                commits.push(commit_meta(&commit));
            }
        }
        Ok(commits)
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<RevId> {
        let repo = self.open()?;
        let oid = repo.merge_base(parse_oid(a)?, parse_oid(b)?)?;
        Ok(oid.to_string())
    }

    fn changed_paths(&self, from: Option<&str>, to: &str) -> Result<BTreeSet<String>> {
        let repo = self.open()?;
        let to_tree = repo.find_commit(parse_oid(to)?)?.tree()?;

        let mut paths = BTreeSet::new();
        match from {
            None => {
                collect_blob_paths(&to_tree, &mut |p| {
                    paths.insert(p);
                });
            }
            Some(from) => {
                let from_tree = repo.find_commit(parse_oid(from)?)?.tree()?;
                let diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;
                for delta in diff.deltas() {
                    for file in [delta.old_file(), delta.new_file()] {
                        if let Some(p) = file.path() {
                            paths.insert(p.to_string_lossy().into_owned());
                        }
                    }
                }
            }
        }
        Ok(paths)
    }

    fn head(&self) -> Result<Option<RevId>> {
        let repo = self.open()?;
        Ok(head_commit(&repo)?.map(|c| c.id().to_string()))
    }

    fn list_paths(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let Some(commit) = head_commit(&repo)? else {
            return Ok(Vec::new());
        };
        let tree = commit.tree()?;
        let mut paths = Vec::new();
        collect_blob_paths(&tree, &mut |p| paths.push(p));
        Ok(paths)
    }

    fn global_history(&self) -> Result<Vec<(CommitMeta, Vec<String>)>> {
        let repo = self.open()?;
        if head_commit(&repo)?.is_none() {
            return Ok(Vec::new());
        }

        let mut revwalk = repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.set_sorting(git2::Sort::TIME)?;

        let mut log = Vec::new();
        for oid in revwalk {
            let commit = repo.find_commit(oid?)?;
            let tree = commit.tree()?;

            let mut changed = BTreeSet::new();
            if commit.parent_count() == 0 {
                collect_blob_paths(&tree, &mut |p| {
                    changed.insert(p);
                });
            } else {
                let parent_tree = commit.parent(0)?.tree()?;
                let diff = repo.diff_tree_to_tree(Some(&parent_tree), Some(&tree), None)?;
                for delta in diff.deltas() {
                    for file in [delta.old_file(), delta.new_file()] {
                        if let Some(p) = file.path() {
                            changed.insert(p.to_string_lossy().into_owned());
                        }
                    }
                }
            }
            log.push((commit_meta(&commit), changed.into_iter().collect()));
        }
        Ok(log)
    }
}

fn parse_oid(rev: &str) -> Result<Oid> {
    Oid::from_str(rev).map_err(|_| VcsError::Parse(format!("bad git revision {rev:?}")))
}

/// Current head commit, `None` while the repository has no commits yet.
fn head_commit(repo: &git2::Repository) -> Result<Option<git2::Commit<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn commit_meta(commit: &git2::Commit<'_>) -> CommitMeta {
    let author = commit.author();
    let (comment, kind) = decode_message(commit.message().unwrap_or_default());
    CommitMeta {
        rev: commit.id().to_string(),
        author: author.name().unwrap_or("unknown").to_string(),
        comment,
        timestamp: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        kind,
    }
}

/// Whether a commit changed `path` relative to its first parent (for the
/// root commit: whether the path exists in its tree). Presence or blob id
/// differences both count, so deletions are included.
fn commit_touches_path(commit: &git2::Commit<'_>, path: &Path) -> Result<bool> {
    let entry_id = |tree: &git2::Tree<'_>| tree.get_path(path).ok().map(|e| e.id());

    let current = entry_id(&commit.tree()?);
    if commit.parent_count() == 0 {
        return Ok(current.is_some());
    }
    let parent = commit.parent(0)?;
    let previous = entry_id(&parent.tree()?);
    Ok(current != previous)
}

/// Recursively rebuild a tree with blob updates applied (`None` removes
/// the entry). Subtrees that end up empty are dropped, matching how git
/// forgets empty directories.
fn build_tree_with_updates(
    repo: &git2::Repository,
    base: Option<&git2::Tree<'_>>,
    updates: &[(String, Option<Oid>)],
) -> Result<Oid> {
    let mut direct: Vec<(&str, Option<Oid>)> = Vec::new();
    let mut by_prefix: HashMap<String, Vec<(String, Option<Oid>)>> = HashMap::new();

    for (path, oid) in updates {
        if let Some(slash) = path.find('/') {
            by_prefix
                .entry(path[..slash].to_string())
                .or_default()
                .push((path[slash + 1..].to_string(), *oid));
        } else {
            direct.push((path.as_str(), *oid));
        }
    }

    let mut builder = repo.treebuilder(base)?;

    for (name, oid) in &direct {
        match oid {
            Some(oid) => {
                builder.insert(*name, *oid, 0o100_644)?;
            }
            None => {
                if builder.get(*name)?.is_some() {
                    builder.remove(*name)?;
                }
            }
        }
    }

    for (prefix, sub_updates) in &by_prefix {
        let sub_tree = base
            .and_then(|t| t.get_name(prefix))
            .filter(|e| e.kind() == Some(ObjectType::Tree))
            .and_then(|e| repo.find_tree(e.id()).ok());

        let new_sub = build_tree_with_updates(repo, sub_tree.as_ref(), sub_updates)?;
        if repo.find_tree(new_sub)?.is_empty() {
            if builder.get(prefix)?.is_some() {
                builder.remove(prefix)?;
            }
        } else {
            builder.insert(prefix, new_sub, 0o040_000)?;
        }
    }

    Ok(builder.write()?)
}

fn collect_blob_paths(tree: &git2::Tree<'_>, out: &mut impl FnMut(String)) {
    let _ = tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(ObjectType::Blob) {
            if let Some(name) = entry.name() {
                out(format!("{dir}{name}"));
            }
        }
        TreeWalkResult::Ok
    });
}
