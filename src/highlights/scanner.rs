//! Marker scanning for `==highlight==` and `%%comment%%` pairs.
//!
//! Each delimiter syntax sits behind its own recognizer so that exclusion and
//! adjacency handling can be tested without the patterns.

use once_cell::sync::Lazy;
use regex::Regex;

use super::footnotes::{footnote_syntax_end, skip_gap};
use super::regions::RegionIndex;

static HIGHLIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"==((?:[^=]|=[^=])+?)==").unwrap());
static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"%%((?:[^%]|%[^%])+?)%%").unwrap());

const DELIMITER_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Highlight,
    Comment,
}

impl MarkerKind {
    pub fn delimiter(&self) -> char {
        match self {
            MarkerKind::Highlight => '=',
            MarkerKind::Comment => '%',
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            MarkerKind::Highlight => &HIGHLIGHT_RE,
            MarkerKind::Comment => &COMMENT_RE,
        }
    }
}

/// A raw delimiter-pair match. `start..end` covers both delimiters,
/// `inner_start..inner_end` the captured body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerMatch {
    pub kind: MarkerKind,
    pub start: usize,
    pub end: usize,
    pub inner_start: usize,
    pub inner_end: usize,
}

impl MarkerMatch {
    pub fn inner<'t>(&self, text: &'t str) -> &'t str {
        &text[self.inner_start..self.inner_end]
    }
}

/// A comment folded into the highlight before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedComment {
    pub position: usize,
    pub content: String,
}

/// A surviving marker, ready for footnote resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedMarker {
    pub kind: MarkerKind,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub attached_comment: Option<AttachedComment>,
}

/// All non-overlapping matches of one delimiter syntax. Bodies that are empty
/// or whitespace-only are rejected.
pub fn recognize_markers(text: &str, kind: MarkerKind) -> Vec<MarkerMatch> {
    kind.pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let inner = caps.get(1)?;
            if inner.as_str().trim().is_empty() {
                return None;
            }
            Some(MarkerMatch {
                kind,
                start: whole.start(),
                end: whole.end(),
                inner_start: inner.start(),
                inner_end: inner.end(),
            })
        })
        .collect()
}

/// Whether a match survives the exclusion regions and the doubled-delimiter
/// rule.
pub fn is_admissible(text: &str, regions: &RegionIndex, m: &MarkerMatch) -> bool {
    if regions.overlaps_code(m.start, m.end) {
        return false;
    }

    let opening_in_url = regions.overlaps_link_url(m.start, m.start + DELIMITER_LEN);
    let closing_in_url = regions.overlaps_link_url(m.end - DELIMITER_LEN, m.end);
    if opening_in_url || closing_in_url {
        return false;
    }

    let delimiter = m.kind.delimiter();
    !(text[..m.start].ends_with(delimiter) || text[m.end..].starts_with(delimiter))
}

/// A comment attaches to the highlight before it when only footnote syntax
/// and gaps separate them. Gaps follow the footnote chain's rule, so a blank
/// line breaks the attachment.
pub fn comment_attaches(text: &str, highlight_end: usize, comment_start: usize) -> bool {
    if comment_start < highlight_end {
        return false;
    }

    let mut pos = highlight_end;
    loop {
        pos = skip_gap(&text[..comment_start], pos);
        if pos >= comment_start {
            return true;
        }
        match footnote_syntax_end(text, pos) {
            Some(end) if end <= comment_start => pos = end,
            _ => return false,
        }
    }
}

/// Scans `text` for highlight and comment markers in document order.
///
/// A comment that trails a highlight is folded into it and not emitted on
/// its own. The output is deterministic for a given text.
pub fn scan_markers(text: &str, regions: &RegionIndex) -> Vec<ScannedMarker> {
    let mut matches: Vec<MarkerMatch> = recognize_markers(text, MarkerKind::Highlight)
        .into_iter()
        .chain(recognize_markers(text, MarkerKind::Comment))
        .filter(|m| is_admissible(text, regions, m))
        .collect();
    matches.sort_by_key(|m| (m.start, m.end));

    let mut consumed = vec![false; matches.len()];
    let mut markers = Vec::with_capacity(matches.len());

    for i in 0..matches.len() {
        if consumed[i] {
            continue;
        }
        let current = matches[i];

        let attached_comment = match matches.get(i + 1) {
            Some(next)
                if current.kind == MarkerKind::Highlight
                    && next.kind == MarkerKind::Comment
                    && comment_attaches(text, current.end, next.start) =>
            {
                consumed[i + 1] = true;
                Some(AttachedComment {
                    position: next.start,
                    content: next.inner(text).trim().to_string(),
                })
            }
            _ => None,
        };

        let body = current.inner(text);
        let text = match current.kind {
            MarkerKind::Highlight => body.to_string(),
            MarkerKind::Comment => body.trim().to_string(),
        };

        markers.push(ScannedMarker {
            kind: current.kind,
            start: current.start,
            end: current.end,
            text,
            attached_comment,
        });
    }

    markers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<ScannedMarker> {
        scan_markers(text, &RegionIndex::build(text))
    }

    #[test]
    fn test_recognize_highlight_allows_single_equals() {
        let text = "==a=b== and ==c==";
        let found = recognize_markers(text, MarkerKind::Highlight);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].inner(text), "a=b");
        assert_eq!(found[1].inner(text), "c");
    }

    #[test]
    fn test_recognize_rejects_blank_body() {
        assert!(recognize_markers("==   ==", MarkerKind::Highlight).is_empty());
        assert!(recognize_markers("%% %%", MarkerKind::Comment).is_empty());
    }

    #[test]
    fn test_single_highlight() {
        let markers = scan("==ok==");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].text, "ok");
        assert_eq!((markers[0].start, markers[0].end), (0, 6));
    }

    #[test]
    fn test_doubled_delimiters_suppressed() {
        assert!(scan("===strict===").is_empty());
        assert!(scan("====text====").is_empty());
        assert!(scan("%%%x%%%").is_empty());
    }

    #[test]
    fn test_inline_code_suppresses() {
        assert!(scan("`==not a highlight==`").is_empty());
    }

    #[test]
    fn test_fenced_code_suppresses() {
        let markers = scan("```\n==inside==\n```\n==outside==");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].text, "outside");
    }

    #[test]
    fn test_link_url_suppresses() {
        assert!(scan("[link](==weird==)").is_empty());
    }

    #[test]
    fn test_link_after_highlight_is_kept() {
        let markers = scan("==kept==[a](b)");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].text, "kept");
    }

    #[test]
    fn test_adjacent_comment_merges() {
        let markers = scan("==main idea==%% aside %%");
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].kind, MarkerKind::Highlight);
        let attached = markers[0].attached_comment.as_ref().unwrap();
        assert_eq!(attached.content, "aside");
        assert_eq!(attached.position, 13);
    }

    #[test]
    fn test_comment_after_footnotes_and_newline_merges() {
        let markers = scan("==idea== ^[note] [^a]\n%% aside %%");
        assert_eq!(markers.len(), 1);
        assert!(markers[0].attached_comment.is_some());
    }

    #[test]
    fn test_blank_line_breaks_adjacency() {
        let markers = scan("==main idea==\n\n%% aside %%");
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].kind, MarkerKind::Highlight);
        assert!(markers[0].attached_comment.is_none());
        assert_eq!(markers[1].kind, MarkerKind::Comment);
        assert_eq!(markers[1].text, "aside");
    }

    #[test]
    fn test_prose_between_breaks_adjacency() {
        let markers = scan("==idea== then %%aside%%");
        assert_eq!(markers.len(), 2);
    }

    #[test]
    fn test_comment_attaches_rejects_overlap() {
        assert!(!comment_attaches("abc", 2, 1));
        assert!(comment_attaches("ab  cd", 2, 4));
    }
}
