//! Footnotes attached to a highlight.
//!
//! Two dialects are recognised:
//!
//! - inline footnotes, `^[content]`, written directly after the highlight
//! - standard references, `[^key]`, resolved against `[^key]: content`
//!   definitions anywhere in the document
//!
//! Only the uninterrupted chain that starts right after a highlight belongs to
//! it. Footnotes may be separated by whitespace, including single line
//! breaks; a blank line or any other text ends the chain.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::regions::RegionIndex;

static FOOTNOTE_DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\^([^\]\s]+)\]:[ \t]*(.*)$").unwrap());
static FOOTNOTE_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[\^([^\]\s]+)\]").unwrap());

/// One footnote with the byte position it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootnoteEntry {
    pub position: usize,
    pub content: String,
}

/// Document-wide `[^key]: content` definitions.
#[derive(Debug, Clone, Default)]
pub struct FootnoteDefinitions {
    entries: HashMap<String, String>,
}

impl FootnoteDefinitions {
    /// Line scan over the document. A definition continues over the indented
    /// lines that follow it and ends at the first blank or unindented line.
    /// Definitions inside code blocks are ignored; the first definition of a
    /// key wins; definitions with empty content are dropped.
    pub fn build(text: &str, regions: &RegionIndex) -> Self {
        let mut defs = Self::default();
        let mut current: Option<(String, Vec<String>)> = None;
        let mut offset = 0;

        for raw in text.split_inclusive('\n') {
            let line_start = offset;
            offset += raw.len();
            let line = raw.trim_end_matches(['\n', '\r']);

            if regions.in_code(line_start) {
                defs.flush(current.take());
                continue;
            }

            if let Some(caps) = FOOTNOTE_DEF_RE.captures(line) {
                defs.flush(current.take());
                current = Some((caps[1].to_string(), vec![caps[2].trim().to_string()]));
                continue;
            }

            if let Some((_, parts)) = current.as_mut() {
                if is_indented(line) && !line.trim().is_empty() {
                    parts.push(line.trim().to_string());
                    continue;
                }
            }

            defs.flush(current.take());
        }

        defs.flush(current);
        defs
    }

    fn flush(&mut self, pending: Option<(String, Vec<String>)>) {
        let Some((key, parts)) = pending else {
            return;
        };
        let content = parts.join("\n").trim().to_string();
        if content.is_empty() {
            return;
        }
        self.entries.entry(key).or_insert(content);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_indented(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t')
}

/// Skips whitespace from `pos`, stopping before the line break that would
/// complete a blank line.
pub fn skip_gap(text: &str, pos: usize) -> usize {
    let mut seen_newline = false;
    for (i, c) in text[pos..].char_indices() {
        if c == '\n' {
            if seen_newline {
                return pos + i;
            }
            seen_newline = true;
        } else if !c.is_whitespace() {
            return pos + i;
        }
    }
    text.len()
}

/// Recognises one `^[...]` footnote at `pos`. Brackets nest; the footnote
/// may not cross a line break. Returns the end offset and the raw content.
pub fn recognize_inline_footnote(text: &str, pos: usize) -> Option<(usize, &str)> {
    let rest = text.get(pos..)?;
    if !rest.starts_with("^[") {
        return None;
    }

    let body_start = pos + 2;
    let mut depth = 1usize;
    for (i, c) in text[body_start..].char_indices() {
        match c {
            '\n' => return None,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    let close = body_start + i;
                    return Some((close + 1, &text[body_start..close]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Recognises one `[^key]` reference at `pos`. A `[^key]:` definition is not a
/// reference. Returns the end offset and the key.
pub fn recognize_footnote_ref(text: &str, pos: usize) -> Option<(usize, &str)> {
    let rest = text.get(pos..)?;
    let caps = FOOTNOTE_REF_RE.captures(rest)?;
    let whole = caps.get(0)?;
    let end = pos + whole.end();
    if text[end..].starts_with(':') {
        return None;
    }
    let key = caps.get(1)?.as_str();
    Some((end, key))
}

/// How many leading bytes of `text` are taken up by zero or more
/// inline footnotes, allowing a gap between them. Returns 0 when none follow.
pub fn inline_footnotes_len(text: &str) -> usize {
    let mut consumed = 0;
    loop {
        let at = skip_gap(text, consumed);
        match recognize_inline_footnote(text, at) {
            Some((end, _)) => consumed = end,
            None => return consumed,
        }
    }
}

/// End offset of any footnote syntax (inline or reference) starting at `pos`.
pub fn footnote_syntax_end(text: &str, pos: usize) -> Option<usize> {
    recognize_inline_footnote(text, pos)
        .map(|(end, _)| end)
        .or_else(|| recognize_footnote_ref(text, pos).map(|(end, _)| end))
}

/// Walks the footnote chain that starts at `from` (the end of a highlight).
///
/// References to unknown keys are dropped but do not break the chain.
pub fn footnote_chain(text: &str, from: usize, defs: &FootnoteDefinitions) -> Vec<FootnoteEntry> {
    let mut entries = Vec::new();
    let mut pos = from;

    loop {
        let at = skip_gap(text, pos);

        let inline_len = inline_footnotes_len(&text[at..]);
        if inline_len > 0 {
            let mut cursor = at;
            while cursor < at + inline_len {
                let start = skip_gap(text, cursor);
                let Some((end, content)) = recognize_inline_footnote(text, start) else {
                    break;
                };
                entries.push(FootnoteEntry {
                    position: start,
                    content: content.trim().to_string(),
                });
                cursor = end;
            }
            pos = at + inline_len;
            continue;
        }

        if let Some((end, key)) = recognize_footnote_ref(text, at) {
            match defs.get(key) {
                Some(content) => entries.push(FootnoteEntry {
                    position: at,
                    content: content.to_string(),
                }),
                None => tracing::trace!(key, "dropping unresolved footnote reference"),
            }
            pos = end;
            continue;
        }

        break;
    }

    entries
}

/// Orders entries by source position and keeps the non-empty contents.
pub fn project_contents(mut entries: Vec<FootnoteEntry>) -> Vec<String> {
    entries.sort_by_key(|e| e.position);
    entries
        .into_iter()
        .map(|e| e.content)
        .filter(|c| !c.is_empty())
        .collect()
}
