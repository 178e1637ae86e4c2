//! Highlights Module
//!
//! Detects `==highlight==` and `%%comment%%` markers in a plain-text document
//! and keeps their identity stable across edits.
//!
//! # Pipeline
//!
//! - `regions`: code blocks, inline code and links to exclude from scanning
//! - `scanner`: delimiter matching, exclusion filtering, comment merging
//! - `footnotes`: inline and standard footnotes bound to each highlight
//! - `reconcile`: three-tier identity matching against stored records
//! - `changes`: decides whether a reconciled list differs from the stored one
//!
//! # Usage
//!
//! ```rust,ignore
//! use marginalia::highlights::{self, ScanSettings};
//!
//! let parsed = highlights::parse_document("notes/a.md", &text, mtime_ms, &stored, &ScanSettings::default());
//! if highlights::changes::has_changed(&stored, &parsed.records) {
//!     // persist parsed.records
//! }
//! ```

pub mod changes;
pub mod footnotes;
pub mod position;
pub mod reconcile;
pub mod regions;
pub mod scanner;

use crate::model::HighlightRecord;
use footnotes::{FootnoteDefinitions, FootnoteEntry, footnote_chain, project_contents};
use position::PositionIndex;
use reconcile::{DEFAULT_FUZZY_WINDOW, Occurrence, ReconcileStats, dedupe_created_at, reconcile};
use regions::RegionIndex;
use scanner::{MarkerKind, ScannedMarker, scan_markers};

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub fuzzy_window: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            fuzzy_window: DEFAULT_FUZZY_WINDOW,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub records: Vec<HighlightRecord>,
    pub stats: ReconcileStats,
    pub timestamps_adjusted: usize,
}

fn resolve_footnotes(text: &str, marker: &ScannedMarker, defs: &FootnoteDefinitions) -> Vec<String> {
    if marker.kind == MarkerKind::Comment {
        return vec![marker.text.clone()];
    }

    let mut entries = footnote_chain(text, marker.end, defs);
    if let Some(comment) = &marker.attached_comment {
        entries.push(FootnoteEntry {
            position: comment.position,
            content: comment.content.clone(),
        });
    }
    project_contents(entries)
}

/// Scans a document snapshot into occurrences, in document order.
pub fn scan_document(text: &str) -> Vec<Occurrence> {
    let regions = RegionIndex::build(text);
    let defs = FootnoteDefinitions::build(text, &regions);
    let positions = PositionIndex::new(text);

    scan_markers(text, &regions)
        .into_iter()
        .map(|marker| Occurrence {
            kind: marker.kind,
            footnote_contents: resolve_footnotes(text, &marker, &defs),
            start_offset: positions.char_offset(marker.start),
            end_offset: positions.char_offset(marker.end),
            line: positions.line_of(marker.start),
            text: marker.text,
        })
        .collect()
}

/// Runs the full pipeline for one file: scan, reconcile against `prior`,
/// then separate colliding timestamps.
pub fn parse_document(
    file_path: &str,
    text: &str,
    file_mtime_ms: i64,
    prior: &[HighlightRecord],
    settings: &ScanSettings,
) -> ParsedDocument {
    let occurrences = scan_document(text);
    let (mut records, stats) = reconcile(
        file_path,
        &occurrences,
        prior,
        file_mtime_ms,
        settings.fuzzy_window,
    );
    let timestamps_adjusted = dedupe_created_at(&mut records);

    tracing::debug!(
        file = file_path,
        occurrences = occurrences.len(),
        matched = stats.matched(),
        created = stats.created,
        "parsed document"
    );

    ParsedDocument {
        records,
        stats,
        timestamps_adjusted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_footnotes_are_own_text() {
        let occurrences = scan_document("%% just a comment %%");
        assert_eq!(occurrences.len(), 1);
        assert!(occurrences[0].is_native_comment());
        assert_eq!(occurrences[0].footnote_contents, vec!["just a comment".to_string()]);
    }

    #[test]
    fn test_merged_comment_orders_after_footnotes() {
        let text = "==idea==^[first][^a] %%third%%\n\n[^a]: second\n";
        let occurrences = scan_document(text);
        assert_eq!(occurrences.len(), 1);
        assert_eq!(
            occurrences[0].footnote_contents,
            vec!["first".to_string(), "second".to_string(), "third".to_string()]
        );
    }

    #[test]
    fn test_footnote_on_next_line_kept_with_merged_comment() {
        let occurrences = scan_document("==idea==\n^[note]\n%% aside %%");
        assert_eq!(occurrences.len(), 1);
        assert_eq!(
            occurrences[0].footnote_contents,
            vec!["note".to_string(), "aside".to_string()]
        );
    }

    #[test]
    fn test_offsets_and_lines_are_characters() {
        let text = "ünïcode\n==mark==";
        let occurrences = scan_document(text);
        assert_eq!(occurrences[0].start_offset, 8);
        assert_eq!(occurrences[0].end_offset, 16);
        assert_eq!(occurrences[0].line, 1);
    }

    #[test]
    fn test_parse_document_new_records() {
        let parsed = parse_document("a.md", "==one== ==two==", 1_000, &[], &ScanSettings::default());
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.stats.created, 2);
        assert_eq!(parsed.records[0].created_at, 1_000);
        assert_eq!(parsed.records[1].created_at, 1_008);
        assert_eq!(parsed.timestamps_adjusted, 0);
    }
}
