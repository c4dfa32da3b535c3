//! Mercurial backend for the repository adapter.
//!
//! Drives the `hg` executable with `HGPLAIN` set and template-based
//! machine-readable output (unit/record separator characters), so the
//! parsing never depends on locale or user configuration. Mercurial's own
//! store lock provides commit atomicity; an additional in-process mutex
//! serializes commit + revision-query pairs so the returned revision is
//! always the one this call created.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use vellum_core::ChangeKind;

use crate::{CommitMeta, Repository, Result, RevId, VcsError, decode_message, encode_message,
            prune_empty_dirs, validate_rel_path, with_retry};

/// Field separator in log templates.
const UNIT_SEP: char = '\u{1f}';
/// Record separator in log templates.
const RECORD_SEP: char = '\u{1e}';
/// Separator between file names inside one log record.
const FILE_SEP: char = '\u{1d}';

/// True when the `hg` executable can be invoked. Tests use this to skip
/// mercurial coverage on machines without it.
#[must_use]
pub fn hg_available() -> bool {
    Command::new("hg")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Mercurial-backed page repository.
pub struct HgRepo {
    root: PathBuf,
    /// Serializes commit + head-query pairs within this process.
    commit_lock: Mutex<()>,
}

impl HgRepo {
    /// Open the repository at `root`, running `hg init` when the directory
    /// is not a mercurial repository yet.
    pub fn open_or_init(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        if !root.join(".hg").exists() {
            tracing::info!("[vcs-hg] initializing repository at {}", root.display());
            run_hg(root, &["init", "."])?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            commit_lock: Mutex::new(()),
        })
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        run_hg(&self.root, args)
    }

    fn run_text(&self, args: &[&str]) -> Result<String> {
        let stdout = self.run(args)?;
        String::from_utf8(stdout)
            .map_err(|_| VcsError::Parse("non-UTF-8 output from hg".to_string()))
    }

    fn commit_once(
        &self,
        path: &str,
        content: Option<&[u8]>,
        author: &str,
        comment: &str,
        kind: ChangeKind,
    ) -> Result<RevId> {
        let _guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let full = self.root.join(path);
        match content {
            Some(bytes) => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&full, bytes)?;
                self.run(&["add", path])?;
            }
            None => {
                // On a retry the file may already be gone with the removal
                // staged; running `hg remove` again would fail.
                if full.exists() {
                    self.run(&["remove", "--force", path])?;
                    prune_empty_dirs(&self.root, full.parent());
                }
            }
        }

        let message = encode_message(comment, kind);
        self.run(&["commit", "-u", author, "-m", &message, path])?;
        // "." is the working directory parent, i.e. the commit just made;
        // the lock above keeps it ours.
        let rev = self.run_text(&["log", "-r", ".", "--template", "{node}"])?;
        let rev = rev.trim();
        if rev.is_empty() {
            return Err(VcsError::Parse("hg log returned no node for new commit".to_string()));
        }
        Ok(rev.to_string())
    }
}

impl Repository for HgRepo {
    fn commit(
        &self,
        path: &str,
        content: Option<&[u8]>,
        author: &str,
        comment: &str,
        kind: ChangeKind,
    ) -> Result<RevId> {
        let path = validate_rel_path(path)?;
        with_retry("hg commit", || {
            self.commit_once(path, content, author, comment, kind)
        })
    }

    fn read(&self, path: &str, rev: Option<&str>) -> Result<Vec<u8>> {
        let path = validate_rel_path(path)?;
        let rev = rev.unwrap_or("tip");
        match self.run(&["cat", "-r", rev, path]) {
            Ok(bytes) => Ok(bytes),
            Err(VcsError::Hg(message)) if is_missing(&message) => {
                Err(VcsError::NotFound(path.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    fn history(&self, path: &str) -> Result<Vec<CommitMeta>> {
        let path = validate_rel_path(path)?;
        let template = format!("{{node}}{UNIT_SEP}{{author}}{UNIT_SEP}{{date|hgdate}}{UNIT_SEP}{{desc}}{RECORD_SEP}");
        let output = match self.run_text(&["log", "--template", &template, path]) {
            Ok(output) => output,
            // A path that never existed is an empty history, not an error.
            Err(VcsError::Hg(message)) if is_missing(&message) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        output
            .split(RECORD_SEP)
            .filter(|record| !record.trim().is_empty())
            .map(parse_log_record)
            .collect()
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<RevId> {
        let revset = format!("ancestor({a},{b})");
        let node = self.run_text(&["log", "-r", &revset, "--template", "{node}"])?;
        let node = node.trim();
        if node.is_empty() {
            return Err(VcsError::Parse(format!("no common ancestor of {a} and {b}")));
        }
        Ok(node.to_string())
    }

    fn changed_paths(&self, from: Option<&str>, to: &str) -> Result<BTreeSet<String>> {
        let from = from.unwrap_or("null");
        let output = self.run_text(&["status", "--rev", from, "--rev", to, "--no-status"])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn head(&self) -> Result<Option<RevId>> {
        let output = self.run_text(&["log", "-l", "1", "--template", "{node}"])?;
        let node = output.trim();
        if node.is_empty() {
            Ok(None)
        } else {
            Ok(Some(node.to_string()))
        }
    }

    fn list_paths(&self) -> Result<Vec<String>> {
        match self.head()? {
            None => Ok(Vec::new()),
            Some(head) => Ok(self.changed_paths(None, &head)?.into_iter().collect()),
        }
    }

    fn global_history(&self) -> Result<Vec<(CommitMeta, Vec<String>)>> {
        let template = format!(
            "{{node}}{UNIT_SEP}{{author}}{UNIT_SEP}{{date|hgdate}}{UNIT_SEP}{{join(files,'{FILE_SEP}')}}{UNIT_SEP}{{desc}}{RECORD_SEP}"
        );
        let output = self.run_text(&["log", "--template", &template])?;
        output
            .split(RECORD_SEP)
            .filter(|record| !record.trim().is_empty())
            .map(parse_global_record)
            .collect()
    }
}

fn run_hg(root: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("hg")
        .arg("--cwd")
        .arg(root)
        .args(args)
        .env("HGPLAIN", "1")
        .env("HGENCODING", "utf-8")
        .output()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                VcsError::Hg("mercurial executable not found".to_string())
            } else {
                VcsError::Io(err)
            }
        })?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(VcsError::Hg(format!(
            "hg {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )))
    }
}

/// Stderr patterns for "the thing you asked about does not exist".
fn is_missing(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("no such file")
        || message.contains("not found")
        || message.contains("unknown revision")
        || message.contains("empty revision")
        || message.contains("cannot follow")
}

/// Authors from external commits may carry "Name <email>"; the engine
/// records bare names.
fn parse_author(raw: &str) -> String {
    raw.split('<').next().unwrap_or_default().trim().to_string()
}

/// hgdate is "<epoch seconds> <tz offset>".
fn parse_epoch(raw: &str) -> Result<i64> {
    raw.split_whitespace()
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| VcsError::Parse(format!("bad hgdate: {raw:?}")))
}

fn parse_log_record(record: &str) -> Result<CommitMeta> {
    let mut fields = record.splitn(4, UNIT_SEP);
    let node = fields
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VcsError::Parse(format!("bad hg log record: {record:?}")))?;
    let author = parse_author(fields.next().unwrap_or_default());
    let epoch = parse_epoch(fields.next().unwrap_or_default())?;
    let desc = fields.next().unwrap_or_default();

    let (comment, kind) = decode_message(desc);
    Ok(CommitMeta {
        rev: node.to_string(),
        author,
        comment,
        timestamp: DateTime::<Utc>::from_timestamp(epoch, 0).unwrap_or_default(),
        kind,
    })
}

fn parse_global_record(record: &str) -> Result<(CommitMeta, Vec<String>)> {
    let mut fields = record.splitn(5, UNIT_SEP);
    let node = fields
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VcsError::Parse(format!("bad hg log record: {record:?}")))?;
    let author = parse_author(fields.next().unwrap_or_default());
    let epoch = parse_epoch(fields.next().unwrap_or_default())?;
    let files: Vec<String> = fields
        .next()
        .unwrap_or_default()
        .split(FILE_SEP)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    let desc = fields.next().unwrap_or_default();

    let (comment, kind) = decode_message(desc);
    Ok((
        CommitMeta {
            rev: node.to_string(),
            author,
            comment,
            timestamp: DateTime::<Utc>::from_timestamp(epoch, 0).unwrap_or_default(),
            kind,
        },
        files,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_record() {
        let record = format!(
            "abc123{UNIT_SEP}alice <alice@example.org>{UNIT_SEP}1700000000 0{UNIT_SEP}edit\n\nChange-Kind: modified\n"
        );
        let meta = parse_log_record(&record).unwrap();
        assert_eq!(meta.rev, "abc123");
        assert_eq!(meta.author, "alice");
        assert_eq!(meta.comment, "edit");
        assert_eq!(meta.kind, ChangeKind::Modified);
        assert_eq!(meta.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_log_record_rejects_garbage() {
        assert!(parse_log_record("no separators here, no date").is_err());
    }

    #[test]
    fn test_is_missing_patterns() {
        assert!(is_missing("abort: Home: no such file in rev abcdef"));
        assert!(is_missing("abort: unknown revision 'tip'"));
        assert!(!is_missing("abort: lock held by another process"));
    }

    // End-to-end coverage for this backend lives in the shared parity
    // suite (tests/backend_parity.rs), which probes for the hg binary.
}
