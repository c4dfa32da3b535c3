//! Word tokenization for the search index.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Words are three or more word-ish characters; `-`, `~` and `&` may
/// appear inside a word (so "e-mail" and "AT&T" index as single tokens).
fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w[-~&\w]+\w").expect("static regex"))
}

/// Case-folded tokens of `text`, in document order.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    word_re()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
}

/// Token occurrence counts for one document.
#[must_use]
pub fn count_tokens(text: &str) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    for token in tokens(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_case_folded() {
        let words: Vec<String> = tokens("Hello World HELLO").collect();
        assert_eq!(words, vec!["hello", "world", "hello"]);
    }

    #[test]
    fn test_short_words_are_skipped() {
        let words: Vec<String> = tokens("a an the cat").collect();
        assert_eq!(words, vec!["the", "cat"]);
    }

    #[test]
    fn test_inner_punctuation_kept() {
        let words: Vec<String> = tokens("e-mail AT&T foo~bar").collect();
        assert_eq!(words, vec!["e-mail", "at&t", "foo~bar"]);
    }

    #[test]
    fn test_unicode_words() {
        let words: Vec<String> = tokens("Zażółć gęślą jaźń").collect();
        assert_eq!(words, vec!["zażółć", "gęślą", "jaźń"]);
    }

    #[test]
    fn test_count_tokens() {
        let counts = count_tokens("wiki wiki word");
        assert_eq!(counts.get("wiki"), Some(&2));
        assert_eq!(counts.get("word"), Some(&1));
    }
}
