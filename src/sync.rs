use std::fmt;

/// What a rescan or lifecycle event did to a file's slot in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncResult {
    Created(usize),
    Updated(usize),
    Unchanged(usize),
    Removed(usize),
    Skipped,
}

impl SyncResult {
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            SyncResult::Created(_) | SyncResult::Updated(_) | SyncResult::Removed(_)
        )
    }

    pub fn record(self, stats: &mut SyncStats) {
        match self {
            SyncResult::Created(_) => stats.created += 1,
            SyncResult::Updated(_) => stats.updated += 1,
            SyncResult::Unchanged(_) => stats.unchanged += 1,
            SyncResult::Removed(_) => stats.removed += 1,
            SyncResult::Skipped => stats.skipped += 1,
        }
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncResult::Created(n) => write!(f, "created ({} records)", n),
            SyncResult::Updated(n) => write!(f, "updated ({} records)", n),
            SyncResult::Unchanged(n) => write!(f, "unchanged ({} records)", n),
            SyncResult::Removed(n) => write!(f, "removed ({} records)", n),
            SyncResult::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-file tally across a batch of rescans.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl SyncStats {
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.removed > 0
    }
}

pub fn log_read_error(path: &str, e: impl fmt::Display) {
    tracing::warn!("Failed to read {}, treating as unchanged: {}", path, e);
}

pub fn log_persist_error(path: &str, e: impl fmt::Display) {
    tracing::error!("Failed to persist highlights after {}: {}", path, e);
}
