//! Change detection over a normalized projection of a record list.
//!
//! Timestamps, line numbers and record types are left out of the projection,
//! so a rescan that only touches those never counts as a change.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::HighlightRecord;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NormalizedRecord<'a> {
    id: &'a str,
    start_offset: usize,
    end_offset: usize,
    text: &'a str,
    footnote_count: usize,
    footnote_contents: Vec<&'a str>,
    color: Option<&'a str>,
    is_native_comment: bool,
}

impl<'a> From<&'a HighlightRecord> for NormalizedRecord<'a> {
    fn from(record: &'a HighlightRecord) -> Self {
        Self {
            id: &record.id,
            start_offset: record.start_offset,
            end_offset: record.end_offset,
            text: &record.text,
            footnote_count: record.footnote_contents.len(),
            footnote_contents: record
                .footnote_contents
                .iter()
                .map(String::as_str)
                .filter(|c| !c.trim().is_empty())
                .collect(),
            color: record.color.as_deref(),
            is_native_comment: record.is_native_comment,
        }
    }
}

/// Serializes the normalized projection of `records` in their given order.
pub fn normalized_json(records: &[HighlightRecord]) -> String {
    let projection: Vec<NormalizedRecord<'_>> = records.iter().map(NormalizedRecord::from).collect();
    // Borrowed strings, numbers and bools only; serialization cannot fail.
    serde_json::to_string(&projection).unwrap_or_default()
}

pub fn has_changed(previous: &[HighlightRecord], next: &[HighlightRecord]) -> bool {
    normalized_json(previous) != normalized_json(next)
}

/// Short hex digest of the normalized projection, used in logs.
pub fn fingerprint(records: &[HighlightRecord]) -> String {
    let digest = Sha256::digest(normalized_json(records).as_bytes());
    hex::encode(&digest[..8])
}
