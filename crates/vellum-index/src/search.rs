//! Inverted full-text index over page titles and bodies.

use std::collections::{BTreeMap, HashMap};

use crate::tokenize::{count_tokens, tokens};

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    /// Deterministic frequency-based score; higher is better.
    pub score: u64,
}

/// Token → per-title occurrence counts, plus the per-document counts
/// needed to replace postings idempotently.
#[derive(Debug, Default, Clone)]
pub struct SearchIndex {
    postings: HashMap<String, HashMap<String, u64>>,
    documents: HashMap<String, HashMap<String, u64>>,
}

impl SearchIndex {
    /// Replace the postings of `title` with those derived from `body`.
    /// Title words count toward the page as well, so pages match searches
    /// for their own name.
    pub fn update(&mut self, title: &str, body: &str) {
        self.remove(title);

        let mut counts = count_tokens(body);
        for token in tokens(title) {
            *counts.entry(token).or_insert(0) += 1;
        }

        for (token, count) in &counts {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(title.to_string(), *count);
        }
        self.documents.insert(title.to_string(), counts);
    }

    /// Delete all postings of `title`.
    pub fn remove(&mut self, title: &str) {
        let Some(counts) = self.documents.remove(title) else {
            return;
        };
        for token in counts.keys() {
            if let Some(titles) = self.postings.get_mut(token) {
                titles.remove(title);
                if titles.is_empty() {
                    self.postings.remove(token);
                }
            }
        }
    }

    /// Search for pages containing **all** words of `query`.
    ///
    /// Each term contributes its in-page count weighted inversely by the
    /// term's total corpus count, so rare terms dominate; the sum is
    /// scaled to an integer. Ties break by title, lexical order.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let terms: Vec<String> = tokens(query).collect();
        if terms.is_empty() {
            return Vec::new();
        }

        // Corpus-wide count per term; any zero means no results at all.
        let mut ranked: Vec<(u64, &str)> = Vec::with_capacity(terms.len());
        for term in &terms {
            let Some(titles) = self.postings.get(term) else {
                return Vec::new();
            };
            ranked.push((titles.values().sum(), term.as_str()));
        }
        // Start from the rarest term: smallest candidate set first.
        ranked.sort();

        let (first_rank, first_term) = ranked[0];
        let candidates = &self.postings[first_term];

        let mut hits = Vec::new();
        'candidates: for (title, first_count) in candidates {
            let mut score = *first_count as f64 / first_rank as f64;
            for (rank, term) in &ranked[1..] {
                match self.postings[*term].get(title) {
                    Some(count) => score += *count as f64 / *rank as f64,
                    // Boolean AND: missing any term disqualifies the page.
                    None => continue 'candidates,
                }
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let score = (score * 100.0).round() as u64;
            hits.push(SearchHit {
                title: title.clone(),
                score,
            });
        }

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.title.cmp(&b.title)));
        hits
    }

    /// Whether `title` has postings.
    #[must_use]
    pub fn contains(&self, title: &str) -> bool {
        self.documents.contains_key(title)
    }

    /// Snapshot form of the per-document counts (ordered for stable
    /// serialization).
    #[must_use]
    pub fn to_document_map(&self) -> BTreeMap<String, BTreeMap<String, u64>> {
        self.documents
            .iter()
            .map(|(title, counts)| {
                (
                    title.clone(),
                    counts.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                )
            })
            .collect()
    }

    /// Rebuild from a snapshot's document map.
    #[must_use]
    pub fn from_document_map(map: BTreeMap<String, BTreeMap<String, u64>>) -> Self {
        let mut index = Self::default();
        for (title, counts) in map {
            let counts: HashMap<String, u64> = counts.into_iter().collect();
            for (token, count) in &counts {
                index
                    .postings
                    .entry(token.clone())
                    .or_default()
                    .insert(title.clone(), *count);
            }
            index.documents.insert(title, counts);
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SearchIndex {
        let mut index = SearchIndex::default();
        index.update("Home", "welcome to the wiki wiki");
        index.update("Syntax", "wiki markup syntax guide");
        index.update("About", "about this site");
        index
    }

    #[test]
    fn test_search_single_term() {
        let index = index();
        let hits = index.search("wiki");
        assert_eq!(hits.len(), 2);
        // "Home" has two occurrences of "wiki", "Syntax" one.
        assert_eq!(hits[0].title, "Home");
        assert_eq!(hits[1].title, "Syntax");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_search_requires_all_terms() {
        let index = index();
        assert_eq!(index.search("wiki syntax").len(), 1);
        assert_eq!(index.search("wiki syntax")[0].title, "Syntax");
        assert!(index.search("wiki nonexistent").is_empty());
    }

    #[test]
    fn test_search_matches_title_words() {
        let index = index();
        let hits = index.search("about");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "About");
    }

    #[test]
    fn test_search_is_case_folded() {
        let index = index();
        assert_eq!(index.search("WIKI").len(), 2);
    }

    #[test]
    fn test_tie_breaks_by_title() {
        let mut index = SearchIndex::default();
        index.update("Beta", "same words here");
        index.update("Alpha", "same words here");
        let hits = index.search("same words");
        assert_eq!(hits[0].title, "Alpha");
        assert_eq!(hits[1].title, "Beta");
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut once = SearchIndex::default();
        once.update("Home", "hello world");

        let mut twice = SearchIndex::default();
        twice.update("Home", "hello world");
        twice.update("Home", "hello world");

        assert_eq!(once.to_document_map(), twice.to_document_map());
        assert_eq!(once.search("hello"), twice.search("hello"));
    }

    #[test]
    fn test_update_replaces_postings() {
        let mut index = SearchIndex::default();
        index.update("Home", "old content");
        index.update("Home", "new content");
        assert!(index.search("old").is_empty());
        assert_eq!(index.search("new").len(), 1);
    }

    #[test]
    fn test_remove_deletes_postings() {
        let mut index = index();
        index.remove("Home");
        assert!(!index.contains("Home"));
        let hits = index.search("wiki");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Syntax");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let index = index();
        let restored = SearchIndex::from_document_map(index.to_document_map());
        assert_eq!(restored.search("wiki"), index.search("wiki"));
        assert_eq!(restored.to_document_map(), index.to_document_map());
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let index = index();
        assert!(index.search("").is_empty());
        assert!(index.search("a ;;").is_empty());
    }
}
