//! Exclusion regions: code (fenced and inline) and Markdown links.
//!
//! All ranges are half-open byte ranges into the scanned snapshot.

use once_cell::sync::Lazy;
use regex::Regex;

static INLINE_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").unwrap());
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[.*?\]\(.*?\)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, pos: usize) -> bool {
        pos >= self.start && pos < self.end
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && end > self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A `[text](url)` link and the URL part inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRange {
    pub span: Range,
    pub url: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fence {
    Backtick,
    Tilde,
}

impl Fence {
    /// Fences only open or close at the very start of a line.
    fn recognize(line: &str) -> Option<Self> {
        if line.starts_with("```") {
            Some(Fence::Backtick)
        } else if line.starts_with("~~~") {
            Some(Fence::Tilde)
        } else {
            None
        }
    }
}

/// Ranges covered by fenced code blocks.
///
/// A fence line opens a block of its own type; only a fence of the same type
/// closes it. An unclosed block runs to the end of the text.
pub fn fenced_code_ranges(text: &str) -> Vec<Range> {
    let mut ranges = Vec::new();
    let mut open: Option<(Fence, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let Some(fence) = Fence::recognize(line) else {
            continue;
        };

        match open {
            None => open = Some((fence, line_start)),
            Some((open_fence, start)) if open_fence == fence => {
                ranges.push(Range::new(start, offset));
                open = None;
            }
            Some(_) => {}
        }
    }

    if let Some((_, start)) = open {
        ranges.push(Range::new(start, text.len()));
    }

    ranges
}

/// Single-backtick spans on one line, found regardless of fence state.
pub fn inline_code_ranges(text: &str) -> Vec<Range> {
    INLINE_CODE_RE
        .find_iter(text)
        .map(|m| Range::new(m.start(), m.end()))
        .collect()
}

pub fn link_ranges(text: &str) -> Vec<LinkRange> {
    LINK_RE
        .find_iter(text)
        .filter_map(|m| {
            let sep = m.as_str().find("](")?;
            let url = Range::new(m.start() + sep + 2, m.end() - 1);
            Some(LinkRange {
                span: Range::new(m.start(), m.end()),
                url,
            })
        })
        .collect()
}

/// Sorts ranges and folds overlapping or touching ones together.
pub fn merge_ranges(mut ranges: Vec<Range>) -> Vec<Range> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_by_key(|r| (r.start, r.end));

    let mut merged: Vec<Range> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// Per-snapshot exclusion index. Rebuilt on every parse, never persisted.
#[derive(Debug, Clone, Default)]
pub struct RegionIndex {
    pub code: Vec<Range>,
    pub links: Vec<LinkRange>,
}

impl RegionIndex {
    pub fn build(text: &str) -> Self {
        let mut code = fenced_code_ranges(text);
        code.extend(inline_code_ranges(text));

        Self {
            code: merge_ranges(code),
            links: link_ranges(text),
        }
    }

    pub fn overlaps_code(&self, start: usize, end: usize) -> bool {
        self.code.iter().any(|r| r.overlaps(start, end))
    }

    pub fn in_code(&self, pos: usize) -> bool {
        self.code.iter().any(|r| r.contains(pos))
    }

    pub fn overlaps_link_url(&self, start: usize, end: usize) -> bool {
        self.links.iter().any(|l| l.url.overlaps(start, end))
    }
}
