//! Configuration for the Vellum storage engine.
//!
//! Configuration is an immutable value built at startup, either
//! programmatically (tests, embedding applications) or from `VELLUM_*`
//! environment variables.

use std::env;
use std::path::PathBuf;

/// Which version-control backend stores the pages.
///
/// Both backends expose identical behavior through the repository adapter;
/// nothing outside the adapter ever branches on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VcsBackend {
    #[default]
    Git,
    Mercurial,
}

impl VcsBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "git" => Some(Self::Git),
            "hg" | "mercurial" => Some(Self::Mercurial),
            _ => None,
        }
    }
}

/// Immutable engine configuration.
#[derive(Debug, Clone)]
pub struct WikiConfig {
    /// Repository root; every page file lives under this directory.
    pub pages_path: PathBuf,
    /// Directory for derived state (the search/link index snapshot).
    pub cache_path: PathBuf,
    /// Version-control backend selection.
    pub backend: VcsBackend,
    /// When set, every write is rejected with `ReadOnlyMode`.
    pub read_only: bool,
    /// Store `Parent/Child` titles as real subdirectories with an `Index`
    /// file per directory page.
    pub subdirectories: bool,
    /// Author recorded when the caller passes an empty author string.
    pub default_author: String,
    /// Comment recorded when the caller passes an empty comment string.
    pub default_comment: String,
    /// Optional file extension appended to wiki-text page files
    /// (e.g. `.txt`), hidden from titles.
    pub extension: Option<String>,
    /// Normalize CRLF to LF in text pages before committing.
    pub unix_eol: bool,
}

impl WikiConfig {
    /// Configuration rooted at `pages_path` with defaults for everything
    /// else. The cache directory defaults to `<pages_path>/.cache`.
    #[must_use]
    pub fn new(pages_path: impl Into<PathBuf>) -> Self {
        let pages_path = pages_path.into();
        let cache_path = pages_path.join(".cache");
        Self {
            pages_path,
            cache_path,
            backend: VcsBackend::default(),
            read_only: false,
            subdirectories: false,
            default_author: "anon".to_string(),
            default_comment: "comment".to_string(),
            extension: None,
            unix_eol: false,
        }
    }

    /// Build configuration from `VELLUM_*` environment variables.
    ///
    /// Recognized keys: `VELLUM_PAGES_DIR`, `VELLUM_CACHE_DIR`,
    /// `VELLUM_BACKEND` (`git`/`hg`), `VELLUM_READ_ONLY`,
    /// `VELLUM_SUBDIRECTORIES`, `VELLUM_DEFAULT_AUTHOR`,
    /// `VELLUM_DEFAULT_COMMENT`, `VELLUM_EXTENSION`, `VELLUM_UNIX_EOL`.
    /// Unset keys fall back to the same defaults as [`WikiConfig::new`].
    #[must_use]
    pub fn from_env() -> Self {
        let pages = env_value("VELLUM_PAGES_DIR").unwrap_or_else(|| "pages".to_string());
        let mut config = Self::new(PathBuf::from(pages));

        if let Some(cache) = env_value("VELLUM_CACHE_DIR") {
            config.cache_path = PathBuf::from(cache);
        }
        if let Some(backend) = env_value("VELLUM_BACKEND").and_then(|v| VcsBackend::parse(&v)) {
            config.backend = backend;
        }
        config.read_only = env_bool("VELLUM_READ_ONLY", config.read_only);
        config.subdirectories = env_bool("VELLUM_SUBDIRECTORIES", config.subdirectories);
        if let Some(author) = env_value("VELLUM_DEFAULT_AUTHOR") {
            config.default_author = author;
        }
        if let Some(comment) = env_value("VELLUM_DEFAULT_COMMENT") {
            config.default_comment = comment;
        }
        config.extension = env_value("VELLUM_EXTENSION").filter(|v| !v.is_empty());
        config.unix_eol = env_bool("VELLUM_UNIX_EOL", config.unix_eol);

        config
    }

    #[must_use]
    pub fn with_cache_path(mut self, cache_path: impl Into<PathBuf>) -> Self {
        self.cache_path = cache_path.into();
        self
    }

    #[must_use]
    pub const fn with_backend(mut self, backend: VcsBackend) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub const fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub const fn with_subdirectories(mut self, subdirectories: bool) -> Self {
        self.subdirectories = subdirectories;
        self
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    #[must_use]
    pub const fn with_unix_eol(mut self, unix_eol: bool) -> Self {
        self.unix_eol = unix_eol;
        self
    }

    /// The author string to record for a write: the caller's value, or the
    /// configured default when empty/whitespace.
    #[must_use]
    pub fn author_or_default<'a>(&'a self, author: &'a str) -> &'a str {
        if author.trim().is_empty() {
            &self.default_author
        } else {
            author
        }
    }

    /// The comment string to record for a write, defaulted like the author.
    #[must_use]
    pub fn comment_or_default<'a>(&'a self, comment: &'a str) -> &'a str {
        if comment.trim().is_empty() {
            &self.default_comment
        } else {
            comment
        }
    }

    /// Index snapshot location under the cache directory.
    #[must_use]
    pub fn index_snapshot_path(&self) -> PathBuf {
        self.cache_path.join("index.json")
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => true,
        "0" | "false" | "f" | "no" | "n" | "off" => false,
        _ => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env_value(key).map_or(default, |v| parse_bool(&v, default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WikiConfig::new("/tmp/wiki");
        assert_eq!(config.pages_path, PathBuf::from("/tmp/wiki"));
        assert_eq!(config.cache_path, PathBuf::from("/tmp/wiki/.cache"));
        assert_eq!(config.backend, VcsBackend::Git);
        assert!(!config.read_only);
        assert!(!config.subdirectories);
        assert_eq!(config.default_author, "anon");
        assert_eq!(config.default_comment, "comment");
        assert!(config.extension.is_none());
        assert!(!config.unix_eol);
    }

    #[test]
    fn test_builder_chain() {
        let config = WikiConfig::new("/tmp/wiki")
            .with_cache_path("/tmp/cache")
            .with_backend(VcsBackend::Mercurial)
            .with_read_only(true)
            .with_subdirectories(true)
            .with_extension(".txt")
            .with_unix_eol(true);

        assert_eq!(config.cache_path, PathBuf::from("/tmp/cache"));
        assert_eq!(config.backend, VcsBackend::Mercurial);
        assert!(config.read_only);
        assert!(config.subdirectories);
        assert_eq!(config.extension.as_deref(), Some(".txt"));
        assert!(config.unix_eol);
    }

    #[test]
    fn test_author_and_comment_defaults() {
        let config = WikiConfig::new("/tmp/wiki");
        assert_eq!(config.author_or_default(""), "anon");
        assert_eq!(config.author_or_default("   "), "anon");
        assert_eq!(config.author_or_default("alice"), "alice");
        assert_eq!(config.comment_or_default(""), "comment");
        assert_eq!(config.comment_or_default("fixed typo"), "fixed typo");
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(VcsBackend::parse("git"), Some(VcsBackend::Git));
        assert_eq!(VcsBackend::parse("GIT"), Some(VcsBackend::Git));
        assert_eq!(VcsBackend::parse("hg"), Some(VcsBackend::Mercurial));
        assert_eq!(VcsBackend::parse("mercurial"), Some(VcsBackend::Mercurial));
        assert_eq!(VcsBackend::parse("svn"), None);
    }

    #[test]
    fn test_parse_bool_values() {
        assert!(parse_bool("1", false));
        assert!(parse_bool("Yes", false));
        assert!(parse_bool(" on ", false));
        assert!(!parse_bool("0", true));
        assert!(!parse_bool("off", true));
        // Unrecognized keeps the default.
        assert!(parse_bool("maybe", true));
        assert!(!parse_bool("maybe", false));
    }

    #[test]
    fn test_index_snapshot_path() {
        let config = WikiConfig::new("/tmp/wiki");
        assert_eq!(
            config.index_snapshot_path(),
            PathBuf::from("/tmp/wiki/.cache/index.json")
        );
    }
}
