//! Three-way line merge for concurrent page edits.
//!
//! Given a common ancestor and two divergent versions, hunks changed on
//! only one side are taken from that side; hunks changed identically on
//! both sides merge cleanly; genuinely divergent hunks become conflict
//! regions carrying both variants. The merge result stays structured
//! ([`Merged`], a list of [`Hunk`]s) until it is serialized for persistence
//! with explicit conflict delimiters.
//!
//! Hunk boundaries come from line-level LCS alignment of ancestor→ours and
//! ancestor→theirs computed independently (diff3 style), so two sides
//! making the same edit never produce a spurious conflict.

#![forbid(unsafe_code)]

use similar::{DiffOp, TextDiff};

/// Conflict region opener, marking the stored (local) variant.
pub const MARKER_LOCAL: &str = "<<<<<<< local";
/// Separator between the two variants of a conflict region.
pub const MARKER_MID: &str = "=======";
/// Conflict region closer, marking the incoming (other) variant.
pub const MARKER_OTHER: &str = ">>>>>>> other";

/// One region of merge output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hunk {
    /// Lines identical in the ancestor and both sides, or taken wholesale
    /// from the one side that changed them.
    Resolved(Vec<String>),
    /// Both sides changed the same ancestor region in different ways.
    Conflict {
        ours: Vec<String>,
        theirs: Vec<String>,
    },
}

/// Structured merge result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    hunks: Vec<Hunk>,
}

impl Merged {
    /// True when no hunk needed manual resolution.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.hunks
            .iter()
            .all(|h| matches!(h, Hunk::Resolved(_)))
    }

    /// The merge regions, in document order.
    #[must_use]
    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    /// Serialize to text, embedding conflict regions between explicit
    /// delimiters. This is the only place the marked-up form exists.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for hunk in &self.hunks {
            match hunk {
                Hunk::Resolved(lines) => {
                    for line in lines {
                        out.push_str(line);
                    }
                }
                Hunk::Conflict { ours, theirs } => {
                    push_marker(&mut out, MARKER_LOCAL);
                    for line in ours {
                        out.push_str(line);
                    }
                    push_marker(&mut out, MARKER_MID);
                    for line in theirs {
                        out.push_str(line);
                    }
                    push_marker(&mut out, MARKER_OTHER);
                }
            }
        }
        out
    }
}

/// Merge two descendants of a common ancestor.
///
/// `ours` is the currently stored version, `theirs` the proposed edit.
#[must_use]
pub fn merge3(base: &str, ours: &str, theirs: &str) -> Merged {
    let base_lines = split_lines(base);
    let our_lines = split_lines(ours);
    let their_lines = split_lines(theirs);

    let our_blocks = matching_blocks(&base_lines, &our_lines);
    let their_blocks = matching_blocks(&base_lines, &their_lines);
    let mut sync = intersect_blocks(&our_blocks, &their_blocks);
    // Zero-length terminal region flushes whatever trails the last match.
    sync.push(SyncRegion {
        base_start: base_lines.len(),
        base_len: 0,
        ours_start: our_lines.len(),
        theirs_start: their_lines.len(),
    });

    let mut hunks: Vec<Hunk> = Vec::new();
    let (mut iz, mut ia, mut ib) = (0usize, 0usize, 0usize);
    for region in sync {
        if iz < region.base_start || ia < region.ours_start || ib < region.theirs_start {
            let base_seg = &base_lines[iz..region.base_start];
            let our_seg = &our_lines[ia..region.ours_start];
            let their_seg = &their_lines[ib..region.theirs_start];

            let ours_unchanged = our_seg == base_seg;
            let theirs_unchanged = their_seg == base_seg;
            if ours_unchanged && !theirs_unchanged {
                push_resolved(&mut hunks, their_seg);
            } else if theirs_unchanged && !ours_unchanged {
                push_resolved(&mut hunks, our_seg);
            } else if our_seg == their_seg {
                // Both sides made the same change (or neither changed).
                push_resolved(&mut hunks, our_seg);
            } else {
                hunks.push(Hunk::Conflict {
                    ours: to_owned_lines(our_seg),
                    theirs: to_owned_lines(their_seg),
                });
            }
        }
        if region.base_len > 0 {
            push_resolved(
                &mut hunks,
                &base_lines[region.base_start..region.base_start + region.base_len],
            );
        }
        iz = region.base_start + region.base_len;
        ia = region.ours_start + region.base_len;
        ib = region.theirs_start + region.base_len;
    }

    Merged { hunks }
}

/// Conflict document for content that cannot be line-merged (binary
/// pages): both full bodies, juxtaposed between the usual delimiters.
#[must_use]
pub fn binary_conflict(current: &[u8], proposed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(current.len() + proposed.len() + 64);
    out.extend_from_slice(MARKER_LOCAL.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(current);
    if !current.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(MARKER_MID.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(proposed);
    if !proposed.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(MARKER_OTHER.as_bytes());
    out.push(b'\n');
    out
}

/// A run of lines matching in the ancestor and one side.
#[derive(Debug, Clone, Copy)]
struct Block {
    base: usize,
    other: usize,
    len: usize,
}

/// A run of lines matching in the ancestor and both sides.
#[derive(Debug, Clone, Copy)]
struct SyncRegion {
    base_start: usize,
    base_len: usize,
    ours_start: usize,
    theirs_start: usize,
}

fn matching_blocks(base: &[&str], other: &[&str]) -> Vec<Block> {
    TextDiff::from_slices(base, other)
        .ops()
        .iter()
        .filter_map(|op| match *op {
            DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => Some(Block {
                base: old_index,
                other: new_index,
                len,
            }),
            _ => None,
        })
        .collect()
}

/// Intersect the two per-side block lists into regions stable in all
/// three versions.
fn intersect_blocks(ours: &[Block], theirs: &[Block]) -> Vec<SyncRegion> {
    let mut regions = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < ours.len() && j < theirs.len() {
        let a_lo = ours[i].base;
        let a_hi = a_lo + ours[i].len;
        let b_lo = theirs[j].base;
        let b_hi = b_lo + theirs[j].len;

        let lo = a_lo.max(b_lo);
        let hi = a_hi.min(b_hi);
        if lo < hi {
            regions.push(SyncRegion {
                base_start: lo,
                base_len: hi - lo,
                ours_start: ours[i].other + (lo - ours[i].base),
                theirs_start: theirs[j].other + (lo - theirs[j].base),
            });
        }

        if a_hi <= b_hi {
            i += 1;
        }
        if b_hi <= a_hi {
            j += 1;
        }
    }
    regions
}

fn push_resolved(hunks: &mut Vec<Hunk>, lines: &[&str]) {
    if lines.is_empty() {
        return;
    }
    // Coalesce adjacent resolved regions for a flat hunk list.
    if let Some(Hunk::Resolved(existing)) = hunks.last_mut() {
        existing.extend(lines.iter().map(|s| (*s).to_string()));
    } else {
        hunks.push(Hunk::Resolved(to_owned_lines(lines)));
    }
}

fn to_owned_lines(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|s| (*s).to_string()).collect()
}

/// Split keeping line terminators, so rendering is byte-faithful.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices('\n') {
        lines.push(&text[start..=idx]);
        start = idx + 1;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

fn push_marker(out: &mut String, marker: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(marker);
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_change_either_side() {
        let merged = merge3("a\nb\n", "a\nb\n", "a\nb\n");
        assert!(merged.is_clean());
        assert_eq!(merged.render(), "a\nb\n");
    }

    #[test]
    fn test_one_side_change_taken() {
        let merged = merge3("a\nb\n", "a\nb\n", "a\nB\n");
        assert!(merged.is_clean());
        assert_eq!(merged.render(), "a\nB\n");

        let merged = merge3("a\nb\n", "A\nb\n", "a\nb\n");
        assert!(merged.is_clean());
        assert_eq!(merged.render(), "A\nb\n");
    }

    #[test]
    fn test_disjoint_changes_both_applied() {
        let base = "one\ntwo\nthree\nfour\n";
        let ours = "ONE\ntwo\nthree\nfour\n";
        let theirs = "one\ntwo\nthree\nFOUR\n";
        let merged = merge3(base, ours, theirs);
        assert!(merged.is_clean());
        assert_eq!(merged.render(), "ONE\ntwo\nthree\nFOUR\n");
    }

    #[test]
    fn test_spec_example_append_and_edit() {
        // Stored side appended a line; incoming side edited the first line.
        let base = "line1\nline2\n";
        let ours = "line1\nline2\nline3\n";
        let theirs = "lineX\nline2\n";
        let merged = merge3(base, ours, theirs);
        assert!(merged.is_clean());
        assert_eq!(merged.render(), "lineX\nline2\nline3\n");
    }

    #[test]
    fn test_same_line_divergence_conflicts() {
        let base = "a\nb\nc\n";
        let ours = "a\nOURS\nc\n";
        let theirs = "a\nTHEIRS\nc\n";
        let merged = merge3(base, ours, theirs);
        assert!(!merged.is_clean());
        assert_eq!(
            merged.render(),
            "a\n<<<<<<< local\nOURS\n=======\nTHEIRS\n>>>>>>> other\nc\n"
        );
    }

    #[test]
    fn test_identical_change_both_sides_is_clean() {
        let base = "a\nb\nc\n";
        let ours = "a\nSAME\nc\n";
        let theirs = "a\nSAME\nc\n";
        let merged = merge3(base, ours, theirs);
        assert!(merged.is_clean());
        assert_eq!(merged.render(), "a\nSAME\nc\n");
    }

    #[test]
    fn test_one_side_deletes_other_keeps() {
        let base = "a\nb\nc\n";
        let ours = "a\nc\n";
        let theirs = "a\nb\nc\n";
        let merged = merge3(base, ours, theirs);
        assert!(merged.is_clean());
        assert_eq!(merged.render(), "a\nc\n");
    }

    #[test]
    fn test_delete_vs_edit_conflicts() {
        let base = "a\nb\nc\n";
        let ours = "a\nc\n";
        let theirs = "a\nB!\nc\n";
        let merged = merge3(base, ours, theirs);
        assert!(!merged.is_clean());
        let rendered = merged.render();
        assert!(rendered.contains(MARKER_LOCAL));
        assert!(rendered.contains("B!\n"));
    }

    #[test]
    fn test_both_add_different_content_to_empty_base() {
        let merged = merge3("", "mine\n", "yours\n");
        assert!(!merged.is_clean());
        assert_eq!(
            merged.render(),
            "<<<<<<< local\nmine\n=======\nyours\n>>>>>>> other\n"
        );
    }

    #[test]
    fn test_missing_trailing_newline_before_marker() {
        let merged = merge3("a\nb", "a\nB", "a\nC");
        assert!(!merged.is_clean());
        // The unterminated final line still gets its own line before the
        // separator markers.
        assert_eq!(
            merged.render(),
            "a\n<<<<<<< local\nB\n=======\nC\n>>>>>>> other\n"
        );
    }

    #[test]
    fn test_binary_conflict_document() {
        let doc = binary_conflict(b"OLD", b"NEW\n");
        let text = String::from_utf8(doc).unwrap();
        assert_eq!(
            text,
            "<<<<<<< local\nOLD\n=======\nNEW\n>>>>>>> other\n"
        );
    }

    #[test]
    fn test_adjacent_resolved_hunks_coalesce() {
        let merged = merge3("a\nb\nc\n", "A\nb\nc\n", "a\nb\nC\n");
        assert!(merged.is_clean());
        // One-sided hunks plus unchanged middle collapse into a single
        // resolved run.
        assert_eq!(merged.hunks().len(), 1);
    }
}
