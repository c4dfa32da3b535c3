//! Link extraction and the inter-page link graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a page references another page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Ordinary `[[Target]]` wiki link.
    WikiLink,
    /// `#REDIRECT [[Target]]` directive on the first line.
    Redirect,
}

/// A directed link from one page to a target title. The target may not
/// exist yet; dangling edges feed the wanted-pages query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub target: String,
    pub kind: LinkKind,
}

/// `[[Target]]` or `[[Target|Label]]`.
fn wikilink_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]|]+)(?:\|[^\[\]]*)?\]\]").expect("static regex"))
}

/// Extract the link edges from a page body, in document order.
///
/// A `#REDIRECT [[Target]]` directive on the first line marks that one
/// link as a redirect; everything else is a plain wiki link. External
/// targets (anything with a URL scheme) are not page links.
#[must_use]
pub fn extract_links(text: &str) -> Vec<LinkEdge> {
    let first_line = text.lines().next().unwrap_or_default();
    let redirect_target = first_line
        .strip_prefix("#REDIRECT")
        .and_then(|rest| wikilink_re().captures(rest))
        .map(|caps| caps[1].trim().to_string());

    let mut edges = Vec::new();
    for caps in wikilink_re().captures_iter(text) {
        let target = caps[1].trim();
        if target.is_empty() || target.contains("://") || target.starts_with("mailto:") {
            continue;
        }
        let kind = if redirect_target.as_deref() == Some(target) && edges.is_empty() {
            LinkKind::Redirect
        } else {
            LinkKind::WikiLink
        };
        edges.push(LinkEdge {
            target: target.to_string(),
            kind,
        });
    }
    edges
}

/// Forward and inverse link maps over the whole wiki.
///
/// Updates apply only the delta between the previously recorded link set
/// and the new one, so cost is proportional to the number of changed
/// links rather than total page count.
#[derive(Debug, Default, Clone)]
pub struct LinkGraph {
    forward: HashMap<String, Vec<LinkEdge>>,
    inverse: HashMap<String, BTreeSet<String>>,
}

impl LinkGraph {
    /// Replace the outgoing links of `source` with `edges`.
    pub fn update(&mut self, source: &str, edges: Vec<LinkEdge>) {
        let old_targets: BTreeSet<String> = self
            .forward
            .get(source)
            .map(|edges| edges.iter().map(|e| e.target.clone()).collect())
            .unwrap_or_default();
        let new_targets: BTreeSet<String> =
            edges.iter().map(|e| e.target.clone()).collect();

        for removed in old_targets.difference(&new_targets) {
            if let Some(sources) = self.inverse.get_mut(removed) {
                sources.remove(source);
                if sources.is_empty() {
                    self.inverse.remove(removed);
                }
            }
        }
        for added in new_targets.difference(&old_targets) {
            self.inverse
                .entry(added.clone())
                .or_default()
                .insert(source.to_string());
        }

        if edges.is_empty() {
            self.forward.remove(source);
        } else {
            self.forward.insert(source.to_string(), edges);
        }
    }

    /// Drop a deleted page's outgoing links. Incoming links from other
    /// pages stay; the title simply becomes a wanted page again.
    pub fn remove(&mut self, source: &str) {
        self.update(source, Vec::new());
    }

    /// Outgoing link edges of a page, in document order.
    #[must_use]
    pub fn links_of(&self, source: &str) -> &[LinkEdge] {
        self.forward.get(source).map_or(&[], Vec::as_slice)
    }

    /// Pages whose content links to `target`, title-sorted.
    #[must_use]
    pub fn backlinks_of(&self, target: &str) -> BTreeSet<String> {
        self.inverse.get(target).cloned().unwrap_or_default()
    }

    /// Existing pages nothing links to, title-sorted.
    #[must_use]
    pub fn orphaned_pages(&self, pages: &BTreeSet<String>) -> Vec<String> {
        pages
            .iter()
            .filter(|title| {
                self.inverse
                    .get(*title)
                    .is_none_or(|sources| sources.is_empty())
            })
            .cloned()
            .collect()
    }

    /// Link targets with no corresponding page, with the number of pages
    /// referencing each, most-wanted first (ties title-sorted).
    #[must_use]
    pub fn wanted_pages(&self, pages: &BTreeSet<String>) -> Vec<(String, usize)> {
        let mut wanted: Vec<(String, usize)> = self
            .inverse
            .iter()
            .filter(|(target, sources)| !pages.contains(*target) && !sources.is_empty())
            .map(|(target, sources)| (target.clone(), sources.len()))
            .collect();
        wanted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        wanted
    }

    /// Snapshot form of the forward map (ordered for stable serialization).
    #[must_use]
    pub fn to_forward_map(&self) -> BTreeMap<String, Vec<LinkEdge>> {
        self.forward
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Rebuild from a snapshot's forward map.
    #[must_use]
    pub fn from_forward_map(map: BTreeMap<String, Vec<LinkEdge>>) -> Self {
        let mut graph = Self::default();
        for (source, edges) in map {
            graph.update(&source, edges);
        }
        graph
    }
}
