//! Title ↔ repository file name mapping and MIME classification.
//!
//! Titles are case- and Unicode-normalization-sensitive: two titles that
//! differ only in normal form are different pages, so no folding happens
//! here. The mapping percent-encodes titles into safe repository-relative
//! file names and escapes names that collide with Windows device files or
//! dotfiles.

use std::borrow::Cow;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// File name used for a directory page in subdirectory mode.
pub const INDEX_PAGE: &str = "Index";

/// Flat mode keeps only the unreserved characters unescaped.
const FLAT_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// Subdirectory mode additionally keeps slashes and spaces.
const SUBDIR_ESCAPE: &AsciiSet = &FLAT_ESCAPE.remove(b'/').remove(b' ');

/// Reserved device file names on Windows.
const WINDOWS_DEVICE_FILES: &[&str] = &[
    "CON", "AUX", "COM1", "COM2", "COM3", "COM4", "LPT1", "LPT2", "LPT3", "PRN", "NUL",
];

/// Guess the MIME type of a page from its title.
///
/// Titles without a recognized file extension are wiki text
/// (`text/x-wiki`).
#[must_use]
pub fn page_mime(title: &str) -> &'static str {
    mime_guess::from_path(title)
        .first_raw()
        .unwrap_or("text/x-wiki")
}

/// Whether content with this MIME type is treated as mergeable text.
#[must_use]
pub fn is_text_mime(mime: &str) -> bool {
    mime == "text/x-wiki" || mime.starts_with("text/")
}

/// Map a page title to its repository-relative file name.
///
/// Flat mode percent-encodes everything outside the unreserved set;
/// subdirectory mode keeps slashes and spaces so subpages become real
/// directory entries, escaping leading dots and empty path segments
/// instead. Wiki-text pages get the configured extension appended.
#[must_use]
pub fn title_to_file(title: &str, subdirectories: bool, extension: Option<&str>) -> String {
    let title = title.trim();
    let mut filename = if subdirectories {
        escape_path_boundaries(&utf8_percent_encode(title, SUBDIR_ESCAPE).to_string())
    } else {
        let escaped = utf8_percent_encode(title, FLAT_ESCAPE).to_string();
        if needs_underscore_escape(&escaped) {
            format!("_{escaped}")
        } else {
            escaped
        }
    };
    if page_mime(title) == "text/x-wiki" {
        if let Some(ext) = extension {
            filename.push_str(ext);
        }
    }
    filename
}

/// Inverse of [`title_to_file`]: recover the title from a repository file
/// path. Returns `None` for paths that cannot name a page (e.g. invalid
/// percent-encoding).
#[must_use]
pub fn file_to_title(path: &str, subdirectories: bool, extension: Option<&str>) -> Option<String> {
    let mut name: &str = path;
    if subdirectories {
        if let Some(dir) = name.strip_suffix(&format!("/{INDEX_PAGE}")) {
            name = dir;
        } else if name == INDEX_PAGE {
            name = "";
        }
    }
    if !subdirectories && name.len() > 1 && name.starts_with('_') {
        name = &name[1..];
    }
    if let Some(ext) = extension {
        if let Some(stripped) = name.strip_suffix(ext) {
            name = stripped;
        }
    }
    match percent_decode_str(name).decode_utf8() {
        Ok(Cow::Borrowed(s)) => Some(s.to_string()),
        Ok(Cow::Owned(s)) => Some(s),
        Err(_) => None,
    }
}

/// File names that would collide with Windows device files, dotfiles, or
/// the underscore escape itself get an `_` prefix.
fn needs_underscore_escape(filename: &str) -> bool {
    if filename.starts_with('_') || filename.starts_with('.') {
        return true;
    }
    let stem = filename.split('.').next().unwrap_or(filename);
    WINDOWS_DEVICE_FILES.contains(&stem.to_ascii_uppercase().as_str())
}

/// Escape a `.` or `/` appearing at the start of the path or right after a
/// slash, so no path segment is empty, relative, or hidden.
fn escape_path_boundaries(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut prev: Option<char> = None;
    for c in escaped.chars() {
        let at_boundary = prev.is_none() || prev == Some('/');
        match c {
            '.' if at_boundary => out.push_str("%2E"),
            '/' if at_boundary => out.push_str("%2F"),
            _ => out.push(c),
        }
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_mime_guesses() {
        assert_eq!(page_mime("SomePage"), "text/x-wiki");
        assert_eq!(page_mime("something.txt"), "text/plain");
        assert_eq!(page_mime("image.png"), "image/png");
        assert_eq!(page_mime("style.css"), "text/css");
        assert_eq!(page_mime("ąęśUnicodePage"), "text/x-wiki");
    }

    #[test]
    fn test_is_text_mime() {
        assert!(is_text_mime("text/x-wiki"));
        assert!(is_text_mime("text/plain"));
        assert!(is_text_mime("text/css"));
        assert!(!is_text_mime("image/png"));
        assert!(!is_text_mime("application/gzip"));
    }

    #[test]
    fn test_flat_escaping_round_trip() {
        for title in [
            "Home",
            "Front Page",
            "50% done",
            "a/b",
            "ąęś",
            "_leading",
            ".hidden",
            "CON",
            "con.txt",
            "semi;colon",
        ] {
            let file = title_to_file(title, false, None);
            assert!(!file.contains('/'), "flat file {file:?} must be one segment");
            assert_eq!(
                file_to_title(&file, false, None).as_deref(),
                Some(title),
                "round trip failed for {title:?}"
            );
        }
    }

    #[test]
    fn test_flat_device_name_escapes() {
        assert_eq!(title_to_file("CON", false, None), "_CON");
        assert_eq!(title_to_file("nul.txt", false, None), "_nul.txt");
        assert_eq!(title_to_file("_x", false, None), "__x");
        assert_eq!(title_to_file(".profile", false, None), "_.profile");
        // Normal names are untouched.
        assert_eq!(title_to_file("Console", false, None), "Console");
    }

    #[test]
    fn test_extension_only_for_wiki_text() {
        assert_eq!(title_to_file("Home", false, Some(".txt")), "Home.txt");
        // Titles with a recognized extension keep their own name.
        assert_eq!(title_to_file("image.png", false, Some(".txt")), "image.png");
        assert_eq!(
            file_to_title("Home.txt", false, Some(".txt")).as_deref(),
            Some("Home")
        );
    }

    #[test]
    fn test_subdirectory_mode_keeps_slashes() {
        assert_eq!(title_to_file("Sub/Page", true, None), "Sub/Page");
        assert_eq!(title_to_file("With Space/Page", true, None), "With Space/Page");
        assert_eq!(
            file_to_title("Sub/Page", true, None).as_deref(),
            Some("Sub/Page")
        );
    }

    #[test]
    fn test_subdirectory_mode_escapes_boundaries() {
        // Leading slash, double slash, and leading dots cannot produce
        // empty / relative path segments.
        assert_eq!(title_to_file("/abs", true, None), "%2Fabs");
        assert_eq!(title_to_file("a//b", true, None), "a/%2Fb");
        assert_eq!(title_to_file("../up", true, None), "%2E./up");
        assert_eq!(title_to_file("a/.hidden", true, None), "a/%2Ehidden");

        for title in ["/abs", "a//b", "../up", "a/.hidden"] {
            let file = title_to_file(title, true, None);
            assert_eq!(file_to_title(&file, true, None).as_deref(), Some(title));
        }
    }

    #[test]
    fn test_subdirectory_index_maps_to_directory_title() {
        assert_eq!(
            file_to_title("Sub/Index", true, None).as_deref(),
            Some("Sub")
        );
        assert_eq!(file_to_title("Index", true, None).as_deref(), Some(""));
    }

    #[test]
    fn test_file_to_title_rejects_bad_encoding() {
        assert!(file_to_title("%ff%fe", false, None).is_none());
    }
}
