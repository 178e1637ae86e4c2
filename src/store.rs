//! The explicit highlight store: file path → ordered record list.
//!
//! One store is built per session and handed by reference to whatever reads
//! or mutates it. Each file's list is replaced wholesale, never merged.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config;
use crate::error::StoreError;
use crate::file_mtime_ms;
use crate::highlights::changes::{fingerprint, has_changed};
use crate::highlights::{ScanSettings, parse_document};
use crate::model::HighlightRecord;
use crate::sync::{SyncResult, log_read_error};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HighlightStore {
    files: BTreeMap<String, Vec<HighlightRecord>>,
}

impl HighlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a persisted store. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?path, "no highlight store yet, starting empty");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if raw.trim().is_empty() {
            return Ok(Self::new());
        }

        serde_json::from_str(&raw).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the store as JSON through a temp file and a rename.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = temp_path(path);
        fs::write(&tmp, json).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;

        debug!(path = ?path, files = self.files.len(), "saved highlight store");
        Ok(())
    }

    pub fn records(&self, file: &str) -> &[HighlightRecord] {
        self.files.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    pub fn total_records(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Re-parses `text` as the current content of `file` and reconciles it
    /// against the stored list. Only a real change is reported as one.
    pub fn rescan_text(
        &mut self,
        file: &str,
        text: &str,
        file_mtime_ms: i64,
        settings: &ScanSettings,
    ) -> SyncResult {
        let existed = self.files.contains_key(file);
        let prior = self.files.get(file).cloned().unwrap_or_default();
        let parsed = parse_document(file, text, file_mtime_ms, &prior, settings);
        let changed = has_changed(&prior, &parsed.records) || parsed.timestamps_adjusted > 0;
        let count = parsed.records.len();

        if parsed.records.is_empty() {
            return match self.files.remove(file) {
                Some(old) => SyncResult::Removed(old.len()),
                None => SyncResult::Unchanged(0),
            };
        }

        self.files.insert(file.to_string(), parsed.records);

        if !changed {
            return SyncResult::Unchanged(count);
        }

        debug!(
            file,
            records = count,
            fingerprint = %fingerprint(self.records(file)),
            "highlights changed"
        );

        if existed {
            SyncResult::Updated(count)
        } else {
            SyncResult::Created(count)
        }
    }

    /// Reads `path` from disk and rescans it under `key`. Non-prose files
    /// lose their slot; unreadable files are left as they are.
    pub fn rescan_file(&mut self, key: &str, path: &Path, scan: &config::Scan) -> SyncResult {
        if !scan.is_prose(path) {
            if self.contains(key) {
                return self.remove_file(key);
            }
            return SyncResult::Skipped;
        }

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log_read_error(key, e);
                return SyncResult::Skipped;
            }
        };

        self.rescan_text(key, &text, file_mtime_ms(path), &scan.settings())
    }

    /// Keys stored for `path` itself or for any file below it.
    fn keys_under(&self, path: &str) -> Vec<String> {
        if path.is_empty() {
            return Vec::new();
        }
        let prefix = format!("{}/", path);
        self.files
            .keys()
            .filter(|key| key.as_str() == path || key.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Moves the slot for `old`, and every slot below it when `old` is a
    /// directory, to the matching key under `new`. Each moved record gets its
    /// `file_path` rewritten. Returns the new keys.
    pub fn rename_file(&mut self, old: &str, new: &str) -> Vec<String> {
        let mut moved = Vec::new();

        for key in self.keys_under(old) {
            let Some(records) = self.files.remove(&key) else {
                continue;
            };
            let new_key = format!("{}{}", new, &key[old.len()..]);
            let records: Vec<HighlightRecord> = records
                .into_iter()
                .map(|record| HighlightRecord {
                    file_path: new_key.clone(),
                    ..record
                })
                .collect();

            info!(from = %key, to = %new_key, records = records.len(), "moved highlights");
            self.files.insert(new_key.clone(), records);
            moved.push(new_key);
        }

        moved
    }

    /// Drops the slot for `file`, or every slot below it when `file` is a
    /// directory.
    pub fn remove_file(&mut self, file: &str) -> SyncResult {
        let keys = self.keys_under(file);
        if keys.is_empty() {
            return SyncResult::Skipped;
        }

        let mut removed = 0;
        for key in keys {
            if let Some(records) = self.files.remove(&key) {
                info!(file = %key, records = records.len(), "dropped highlights");
                removed += records.len();
            }
        }
        SyncResult::Removed(removed)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings() -> ScanSettings {
        ScanSettings::default()
    }

    #[test]
    fn test_rescan_creates_then_unchanged() {
        let mut store = HighlightStore::new();
        let text = "intro ==alpha== and %% note %%";

        let first = store.rescan_text("a.md", text, 1_000, &settings());
        assert_eq!(first, SyncResult::Created(2));

        let snapshot = store.clone();
        let second = store.rescan_text("a.md", text, 2_000, &settings());
        assert_eq!(second, SyncResult::Unchanged(2));
        assert_eq!(store, snapshot);
    }

    #[test]
    fn test_rescan_update_and_remove() {
        let mut store = HighlightStore::new();
        store.rescan_text("a.md", "==alpha==", 0, &settings());
        let id = store.records("a.md")[0].id.clone();

        let result = store.rescan_text("a.md", "prefix ==alpha==", 0, &settings());
        assert_eq!(result, SyncResult::Updated(1));
        assert_eq!(store.records("a.md")[0].id, id);
        assert_eq!(store.records("a.md")[0].start_offset, 7);

        let result = store.rescan_text("a.md", "no marks left", 0, &settings());
        assert_eq!(result, SyncResult::Removed(1));
        assert!(!store.contains("a.md"));
    }

    #[test]
    fn test_rescan_empty_file_without_slot() {
        let mut store = HighlightStore::new();
        assert_eq!(store.rescan_text("a.md", "plain", 0, &settings()), SyncResult::Unchanged(0));
        assert!(store.is_empty());
    }

    #[test]
    fn test_rename_moves_slot() {
        let mut store = HighlightStore::new();
        store.rescan_text("old.md", "==x==", 0, &settings());
        store.rescan_text("old.md.bak", "==y==", 0, &settings());
        assert_eq!(store.rename_file("old.md", "new.md"), vec!["new.md".to_string()]);
        assert!(!store.contains("old.md"));
        assert!(store.contains("old.md.bak"));
        assert_eq!(store.records("new.md")[0].file_path, "new.md");
        assert!(store.rename_file("missing.md", "other.md").is_empty());
    }

    #[test]
    fn test_rename_directory_moves_every_slot_below() {
        let mut store = HighlightStore::new();
        store.rescan_text("sub/a.md", "==a==", 0, &settings());
        store.rescan_text("sub/deep/b.md", "==b==", 0, &settings());
        store.rescan_text("subway.md", "==c==", 0, &settings());
        let id = store.records("sub/a.md")[0].id.clone();

        let mut moved = store.rename_file("sub", "moved");
        moved.sort();
        assert_eq!(moved, vec!["moved/a.md".to_string(), "moved/deep/b.md".to_string()]);
        assert!(!store.contains("sub/a.md"));
        assert_eq!(store.records("moved/a.md")[0].id, id);
        assert_eq!(store.records("moved/deep/b.md")[0].file_path, "moved/deep/b.md");
        assert!(store.contains("subway.md"));
    }

    #[test]
    fn test_remove_file() {
        let mut store = HighlightStore::new();
        store.rescan_text("a.md", "==x== ==y==", 0, &settings());
        assert_eq!(store.remove_file("a.md"), SyncResult::Removed(2));
        assert_eq!(store.remove_file("a.md"), SyncResult::Skipped);
    }

    #[test]
    fn test_remove_directory_drops_slots_below() {
        let mut store = HighlightStore::new();
        store.rescan_text("notes/a.md", "==x==", 0, &settings());
        store.rescan_text("notes/b.md", "==y== ==z==", 0, &settings());
        store.rescan_text("notes.md", "==w==", 0, &settings());
        assert_eq!(store.remove_file("notes"), SyncResult::Removed(3));
        assert_eq!(store.files().collect::<Vec<_>>(), vec!["notes.md"]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("highlights.json");

        let mut store = HighlightStore::new();
        store.rescan_text("notes/a.md", "==keep== %%aside%%", 42, &settings());
        store.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(json["notes/a.md"].is_array());
        assert_eq!(json["notes/a.md"][0]["text"], "keep");

        let loaded = HighlightStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let missing = HighlightStore::load(&dir.path().join("nope.json")).unwrap();
        assert!(missing.is_empty());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(
            HighlightStore::load(&bad),
            Err(StoreError::Decode { .. })
        ));
    }

    #[test]
    fn test_rescan_file_skips_non_prose_and_unreadable() {
        let dir = TempDir::new().unwrap();
        let scan = config::Scan::default();
        let mut store = HighlightStore::new();

        let image = dir.path().join("photo.png");
        fs::write(&image, "==not prose==").unwrap();
        assert_eq!(store.rescan_file("photo.png", &image, &scan), SyncResult::Skipped);

        let missing = dir.path().join("gone.md");
        assert_eq!(store.rescan_file("gone.md", &missing, &scan), SyncResult::Skipped);

        let note = dir.path().join("note.md");
        fs::write(&note, "==prose==").unwrap();
        assert_eq!(store.rescan_file("note.md", &note, &scan), SyncResult::Created(1));

        fs::write(&note, "no marks").unwrap();
        let renamed = dir.path().join("note.txt.bak");
        assert_eq!(store.rename_file("note.md", "note.txt.bak").len(), 1);
        assert_eq!(
            store.rescan_file("note.txt.bak", &renamed, &scan),
            SyncResult::Removed(1)
        );
    }
}
