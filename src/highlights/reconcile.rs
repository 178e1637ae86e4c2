//! Identity reconciliation between a fresh scan and the stored records of the
//! same file.
//!
//! Every occurrence tries three tiers in order, and each prior record can be
//! claimed once:
//!
//! 1. exact: same text, offsets and comment flag
//! 2. fuzzy position: same text and comment flag, start within the window
//! 3. unique text: same text and comment flag, and no other prior record of
//!    the file carries that text
//!
//! A claimed record keeps its `id`, `created_at` and `color`. Everything else
//! comes from the scan. Occurrences that claim nothing become new records.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::scanner::MarkerKind;
use crate::model::{HighlightRecord, HighlightType};

pub const DEFAULT_FUZZY_WINDOW: usize = 50;

/// A scanned marker with resolved footnotes, in character coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub kind: MarkerKind,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub line: usize,
    pub footnote_contents: Vec<String>,
}

impl Occurrence {
    pub fn is_native_comment(&self) -> bool {
        self.kind == MarkerKind::Comment
    }

    fn highlight_type(&self) -> HighlightType {
        match self.kind {
            MarkerKind::Highlight => HighlightType::Highlight,
            MarkerKind::Comment => HighlightType::Comment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    FuzzyPosition,
    UniqueText,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub exact: usize,
    pub fuzzy: usize,
    pub unique_text: usize,
    pub created: usize,
}

impl ReconcileStats {
    fn record(&mut self, tier: Option<MatchTier>) {
        match tier {
            Some(MatchTier::Exact) => self.exact += 1,
            Some(MatchTier::FuzzyPosition) => self.fuzzy += 1,
            Some(MatchTier::UniqueText) => self.unique_text += 1,
            None => self.created += 1,
        }
    }

    pub fn matched(&self) -> usize {
        self.exact + self.fuzzy + self.unique_text
    }
}

/// Tracks which prior records have been claimed during one pass.
pub struct Reconciler<'a> {
    prior: &'a [HighlightRecord],
    claimed: Vec<bool>,
    window: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(prior: &'a [HighlightRecord], window: usize) -> Self {
        Self {
            prior,
            claimed: vec![false; prior.len()],
            window,
        }
    }

    fn same_identity(record: &HighlightRecord, occ: &Occurrence) -> bool {
        record.text == occ.text && record.is_native_comment == occ.is_native_comment()
    }

    fn first_unclaimed<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&HighlightRecord) -> bool,
    {
        self.prior
            .iter()
            .enumerate()
            .find(|(i, r)| !self.claimed[*i] && predicate(*r))
            .map(|(i, _)| i)
    }

    fn find(&self, occ: &Occurrence) -> Option<(usize, MatchTier)> {
        let exact = self.first_unclaimed(|r| {
            Self::same_identity(r, occ)
                && r.start_offset == occ.start_offset
                && r.end_offset == occ.end_offset
        });
        if let Some(i) = exact {
            return Some((i, MatchTier::Exact));
        }

        let fuzzy = self.first_unclaimed(|r| {
            Self::same_identity(r, occ) && r.start_offset.abs_diff(occ.start_offset) <= self.window
        });
        if let Some(i) = fuzzy {
            return Some((i, MatchTier::FuzzyPosition));
        }

        let mut same_text = self
            .prior
            .iter()
            .enumerate()
            .filter(|(_, r)| Self::same_identity(*r, occ));
        match (same_text.next(), same_text.next()) {
            (Some((i, _)), None) if !self.claimed[i] => Some((i, MatchTier::UniqueText)),
            _ => None,
        }
    }

    /// Finds and claims the prior record for `occ`, if any.
    pub fn claim(&mut self, occ: &Occurrence) -> Option<(&'a HighlightRecord, MatchTier)> {
        let (i, tier) = self.find(occ)?;
        self.claimed[i] = true;
        let prior = self.prior;
        Some((&prior[i], tier))
    }
}

pub fn new_highlight_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builds the successor of a matched record. Identity fields come from
/// `prior`, the rest from `occ`.
pub fn carry_over(prior: &HighlightRecord, occ: &Occurrence, file_path: &str) -> HighlightRecord {
    HighlightRecord {
        id: prior.id.clone(),
        text: occ.text.clone(),
        start_offset: occ.start_offset,
        end_offset: occ.end_offset,
        line: occ.line,
        file_path: file_path.to_string(),
        is_native_comment: occ.is_native_comment(),
        footnote_contents: occ.footnote_contents.clone(),
        color: prior.color.clone(),
        created_at: prior.created_at,
        highlight_type: occ.highlight_type(),
    }
}

/// Builds a record for an occurrence with no prior identity. The timestamp is
/// the file's modify time plus `start_offset mod 1000` milliseconds.
pub fn synthesize(occ: &Occurrence, file_path: &str, file_mtime_ms: i64) -> HighlightRecord {
    HighlightRecord {
        id: new_highlight_id(),
        text: occ.text.clone(),
        start_offset: occ.start_offset,
        end_offset: occ.end_offset,
        line: occ.line,
        file_path: file_path.to_string(),
        is_native_comment: occ.is_native_comment(),
        footnote_contents: occ.footnote_contents.clone(),
        color: None,
        created_at: file_mtime_ms + (occ.start_offset % 1000) as i64,
        highlight_type: occ.highlight_type(),
    }
}

/// Reconciles one file's occurrences against its prior records.
pub fn reconcile(
    file_path: &str,
    occurrences: &[Occurrence],
    prior: &[HighlightRecord],
    file_mtime_ms: i64,
    window: usize,
) -> (Vec<HighlightRecord>, ReconcileStats) {
    let mut reconciler = Reconciler::new(prior, window);
    let mut stats = ReconcileStats::default();

    let records = occurrences
        .iter()
        .map(|occ| match reconciler.claim(occ) {
            Some((prior, tier)) => {
                stats.record(Some(tier));
                carry_over(prior, occ, file_path)
            }
            None => {
                stats.record(None);
                synthesize(occ, file_path, file_mtime_ms)
            }
        })
        .collect();

    (records, stats)
}

/// Separates records that share a `created_at`. Within a collision group the
/// record with the lowest start offset keeps its timestamp and the others get
/// +1, +2, ... milliseconds. Repeats until no two records collide. Returns how
/// many timestamps were changed.
pub fn dedupe_created_at(records: &mut [HighlightRecord]) -> usize {
    let mut adjusted = 0;

    loop {
        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            groups.entry(record.created_at).or_default().push(i);
        }

        let mut changed = false;
        for (created_at, mut members) in groups {
            if members.len() < 2 {
                continue;
            }
            members.sort_by_key(|&i| (records[i].start_offset, i));
            for (step, &i) in members.iter().enumerate().skip(1) {
                records[i].created_at = created_at + step as i64;
                adjusted += 1;
            }
            changed = true;
        }

        if !changed {
            return adjusted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(text: &str, start: usize) -> Occurrence {
        Occurrence {
            kind: MarkerKind::Highlight,
            text: text.to_string(),
            start_offset: start,
            end_offset: start + text.chars().count() + 4,
            line: 0,
            footnote_contents: vec![],
        }
    }

    fn prior(id: &str, text: &str, start: usize, created_at: i64) -> HighlightRecord {
        let mut record = synthesize(&occ(text, start), "a.md", 0);
        record.id = id.to_string();
        record.created_at = created_at;
        record
    }

    #[test]
    fn test_exact_match_preserves_identity() {
        let stored = vec![prior("h1", "alpha", 10, 111)];
        let (records, stats) = reconcile("a.md", &[occ("alpha", 10)], &stored, 9_000, 50);
        assert_eq!(records[0].id, "h1");
        assert_eq!(records[0].created_at, 111);
        assert_eq!(stats.exact, 1);
    }

    #[test]
    fn test_fuzzy_match_within_window() {
        let stored = vec![prior("h1", "keep me", 100, 111)];
        let (records, stats) = reconcile("a.md", &[occ("keep me", 140)], &stored, 9_000, 50);
        assert_eq!(records[0].id, "h1");
        assert_eq!(records[0].start_offset, 140);
        assert_eq!(stats.fuzzy, 1);
    }

    #[test]
    fn test_unique_text_match_far_away() {
        let stored = vec![prior("h1", "lonely", 10, 111)];
        let (records, stats) = reconcile("a.md", &[occ("lonely", 4_000)], &stored, 9_000, 50);
        assert_eq!(records[0].id, "h1");
        assert_eq!(stats.unique_text, 1);
    }

    #[test]
    fn test_duplicate_text_beyond_window_is_new() {
        let stored = vec![prior("h1", "same", 10, 111), prior("h2", "same", 500, 222)];
        let scanned = [occ("same", 10), occ("same", 700)];
        let (records, stats) = reconcile("a.md", &scanned, &stored, 9_000, 50);
        assert_eq!(records[0].id, "h1");
        assert_ne!(records[1].id, "h1");
        assert_ne!(records[1].id, "h2");
        assert_eq!(records[1].created_at, 9_000 + 700);
        assert_eq!(stats.exact, 1);
        assert_eq!(stats.created, 1);
    }

    #[test]
    fn test_comment_flag_must_match() {
        let stored = vec![prior("h1", "note", 10, 111)];
        let mut comment = occ("note", 10);
        comment.kind = MarkerKind::Comment;
        let (records, stats) = reconcile("a.md", &[comment], &stored, 0, 50);
        assert_ne!(records[0].id, "h1");
        assert!(records[0].is_native_comment);
        assert_eq!(records[0].highlight_type, HighlightType::Comment);
        assert_eq!(stats.created, 1);
    }

    #[test]
    fn test_prior_record_claimed_once() {
        let stored = vec![prior("h1", "twice", 10, 111)];
        let (records, _) = reconcile("a.md", &[occ("twice", 10), occ("twice", 20)], &stored, 0, 50);
        assert_eq!(records[0].id, "h1");
        assert_ne!(records[1].id, "h1");
    }

    #[test]
    fn test_carry_over_keeps_color() {
        let mut stored = prior("h1", "alpha", 10, 111);
        stored.color = Some("yellow".to_string());
        let mut scanned = occ("alpha", 12);
        scanned.footnote_contents = vec!["note".to_string()];
        let next = carry_over(&stored, &scanned, "b.md");
        assert_eq!(next.color.as_deref(), Some("yellow"));
        assert_eq!(next.file_path, "b.md");
        assert_eq!(next.footnote_contents, vec!["note".to_string()]);
        assert_eq!(next.start_offset, 12);
    }

    #[test]
    fn test_dedupe_keeps_lowest_offset() {
        let mut records = vec![
            prior("b", "second", 1_200, 5_000),
            prior("a", "first", 200, 5_000),
            prior("c", "third", 40, 5_001),
        ];
        let adjusted = dedupe_created_at(&mut records);
        assert_eq!(records[1].created_at, 5_000);
        assert!(records[0].created_at > 5_000);
        assert!(adjusted >= 1);

        let mut seen: Vec<i64> = records.iter().map(|r| r.created_at).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), records.len());
    }

    #[test]
    fn test_dedupe_noop_without_collisions() {
        let mut records = vec![prior("a", "x", 1, 1), prior("b", "y", 2, 2)];
        assert_eq!(dedupe_created_at(&mut records), 0);
    }
}
