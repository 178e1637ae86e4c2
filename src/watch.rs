//! Filesystem watching for a notes tree.
//!
//! Raw notify events are folded into [`FileEvent`]s. Content edits go through
//! a per-file debouncer; creates, renames and deletes are applied at once.
//! Everything that touches the store runs on one loop, so rescans of the
//! same file never overlap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::StoreError;
use crate::store::HighlightStore;
use crate::sync::{SyncResult, log_persist_error};
use crate::{path_key, unpack_error};

/// How long one half of a rename waits for its partner.
pub const RENAME_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Changed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    Deleted(PathBuf),
}

impl FileEvent {
    /// The path whose pending debounce should be dropped when this event is
    /// applied directly.
    pub fn path(&self) -> &Path {
        match self {
            FileEvent::Created(p) | FileEvent::Changed(p) | FileEvent::Deleted(p) => p,
            FileEvent::Renamed { from, .. } => from,
        }
    }
}

#[derive(Debug)]
struct RenameHalf {
    path: PathBuf,
    seen: Instant,
}

/// Maps notify events onto file events.
///
/// Some backends report one rename as `From`, `To` and then `Both`. The
/// halves are held, keyed by the event tracker, until `Both` settles them.
/// Halves still waiting after the grace period are resolved by [`expire`]:
/// a matched pair is a rename, a lone `From` moved out of the tree and a
/// lone `To` moved in.
///
/// [`expire`]: EventClassifier::expire
pub struct EventClassifier {
    grace: Duration,
    from: HashMap<Option<usize>, RenameHalf>,
    to: HashMap<Option<usize>, RenameHalf>,
}

impl EventClassifier {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            from: HashMap::new(),
            to: HashMap::new(),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.from.is_empty() || !self.to.is_empty()
    }

    pub fn classify(&mut self, event: Event) -> Vec<FileEvent> {
        self.classify_at(event, Instant::now())
    }

    pub fn classify_at(&mut self, event: Event, now: Instant) -> Vec<FileEvent> {
        let tracker = event.attrs.tracker();
        let Event { kind, paths, .. } = event;

        match kind {
            EventKind::Create(_) => paths.into_iter().map(FileEvent::Created).collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
                let mut paths = paths.into_iter();
                match (paths.next(), paths.next()) {
                    (Some(from), Some(to)) => {
                        self.settle(tracker, &from, &to);
                        vec![FileEvent::Renamed { from, to }]
                    }
                    _ => Vec::new(),
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
                .into_iter()
                .filter_map(|path| {
                    self.from
                        .insert(tracker, RenameHalf { path, seen: now })
                        .map(|displaced| FileEvent::Deleted(displaced.path))
                })
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
                .into_iter()
                .filter_map(|path| {
                    self.to
                        .insert(tracker, RenameHalf { path, seen: now })
                        .map(|displaced| FileEvent::Created(displaced.path))
                })
                .collect(),
            EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
            EventKind::Modify(_) => paths.into_iter().map(FileEvent::Changed).collect(),
            EventKind::Remove(_) => paths.into_iter().map(FileEvent::Deleted).collect(),
            _ => Vec::new(),
        }
    }

    /// Drops the halves a complete rename event has accounted for.
    fn settle(&mut self, tracker: Option<usize>, from: &Path, to: &Path) {
        if tracker.is_some() {
            self.from.remove(&tracker);
            self.to.remove(&tracker);
        }
        self.from.retain(|_, half| half.path != from);
        self.to.retain(|_, half| half.path != to);
    }

    /// Resolves halves that have waited at least the grace period.
    pub fn expire(&mut self, now: Instant) -> Vec<FileEvent> {
        let grace = self.grace;
        self.resolve(|half| now.saturating_duration_since(half.seen) >= grace)
    }

    /// Resolves every waiting half.
    pub fn flush(&mut self) -> Vec<FileEvent> {
        self.resolve(|_| true)
    }

    fn resolve(&mut self, due: impl Fn(&RenameHalf) -> bool) -> Vec<FileEvent> {
        let mut keys: Vec<Option<usize>> = self
            .from
            .iter()
            .chain(self.to.iter())
            .filter(|(_, half)| due(half))
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .filter_map(|key| match (self.from.remove(&key), self.to.remove(&key)) {
                (Some(from), Some(to)) => Some(FileEvent::Renamed {
                    from: from.path,
                    to: to.path,
                }),
                (Some(from), None) => Some(FileEvent::Deleted(from.path)),
                (None, Some(to)) => Some(FileEvent::Created(to.path)),
                (None, None) => None,
            })
            .collect()
    }
}

/// Delays rescans per file. A new edit cancels the file's pending timer and
/// starts a fresh one; when a timer runs out its path and generation are
/// sent on `due`.
pub struct Debouncer {
    delay: Duration,
    next_generation: u64,
    pending: HashMap<PathBuf, (u64, CancellationToken)>,
    due: mpsc::UnboundedSender<(PathBuf, u64)>,
}

impl Debouncer {
    pub fn new(delay: Duration, due: mpsc::UnboundedSender<(PathBuf, u64)>) -> Self {
        Self {
            delay,
            next_generation: 0,
            pending: HashMap::new(),
            due,
        }
    }

    pub fn schedule(&mut self, path: PathBuf) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let token = CancellationToken::new();
        if let Some((_, previous)) = self.pending.insert(path.clone(), (generation, token.clone())) {
            previous.cancel();
        }

        let delay = self.delay;
        let due = self.due.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = due.send((path, generation));
                }
                _ = token.cancelled() => {}
            }
        });
    }

    pub fn cancel(&mut self, path: &Path) {
        if let Some((_, token)) = self.pending.remove(path) {
            token.cancel();
        }
    }

    /// Accepts a fired timer. Returns false when a later edit or a direct
    /// event has superseded it.
    pub fn complete(&mut self, path: &Path, generation: u64) -> bool {
        match self.pending.get(path) {
            Some((current, _)) if *current == generation => {
                self.pending.remove(path);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, token)) in self.pending.drain() {
            token.cancel();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Where a key moved under `to_key` lives on disk.
fn moved_path(to: &Path, to_key: &str, key: &str) -> PathBuf {
    match key.strip_prefix(to_key).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => to.join(rest),
        None => to.to_path_buf(),
    }
}

/// The store plus the settings a watch session needs to act on events.
pub struct Session {
    store: HighlightStore,
    config: Config,
    root: PathBuf,
}

impl Session {
    pub fn new(store: HighlightStore, config: Config, root: PathBuf) -> Self {
        Self {
            store,
            config,
            root,
        }
    }

    pub fn store(&self) -> &HighlightStore {
        &self.store
    }

    pub fn into_store(self) -> HighlightStore {
        self.store
    }

    /// Store key for a path reported by the watcher, relative to the root.
    fn key_for(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => path_key(relative),
            Err(_) => path_key(path),
        }
    }

    pub fn rescan(&mut self, path: &Path) -> SyncResult {
        let key = self.key_for(path);
        self.store.rescan_file(&key, path, &self.config.scan)
    }

    pub fn apply(&mut self, event: &FileEvent) -> SyncResult {
        match event {
            FileEvent::Created(path) | FileEvent::Changed(path) => self.rescan(path),
            FileEvent::Deleted(path) => {
                let key = self.key_for(path);
                self.store.remove_file(&key)
            }
            FileEvent::Renamed { from, to } => self.rename(from, to),
        }
    }

    /// Moves stored highlights along with a renamed file or directory, then
    /// rescans every moved file at its new path.
    fn rename(&mut self, from: &Path, to: &Path) -> SyncResult {
        let from_key = self.key_for(from);
        let to_key = self.key_for(to);
        let moved = self.store.rename_file(&from_key, &to_key);
        if moved.is_empty() {
            return self.rescan(to);
        }

        let mut removed = 0;
        for key in &moved {
            let path = moved_path(to, &to_key, key);
            if let SyncResult::Removed(n) = self.store.rescan_file(key, &path, &self.config.scan) {
                removed += n;
            }
        }

        let remaining: usize = moved.iter().map(|key| self.store.records(key).len()).sum();
        if remaining == 0 {
            SyncResult::Removed(removed)
        } else {
            SyncResult::Updated(remaining)
        }
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        self.store.save(&self.config.store.path)
    }

    fn persist_if_changed(&self, trigger: &Path, result: SyncResult) {
        debug!(path = ?trigger, result = %result, "applied file event");
        if !result.is_change() {
            return;
        }
        match self.persist() {
            Ok(()) => info!(file = %self.key_for(trigger), result = %result, "persisted highlights"),
            Err(e) => log_persist_error(&self.key_for(trigger), unpack_error(&e)),
        }
    }

    /// Routes one file event: edits are debounced, everything else is applied
    /// now and supersedes any pending edit of the same path.
    fn dispatch(&mut self, debouncer: &mut Debouncer, event: FileEvent) {
        match event {
            FileEvent::Changed(path) => debouncer.schedule(path),
            other => {
                debouncer.cancel(other.path());
                let result = self.apply(&other);
                self.persist_if_changed(other.path(), result);
            }
        }
    }
}

/// Watches the session root until `cancel` fires.
pub async fn run(mut session: Session, debounce: Duration, cancel: CancellationToken) -> Result<HighlightStore> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = raw_tx.send(res);
    })
    .context("Failed to start file watcher")?;
    watcher
        .watch(&session.root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", session.root.display()))?;

    let (due_tx, mut due_rx) = mpsc::unbounded_channel();
    let mut debouncer = Debouncer::new(debounce, due_tx);
    let mut classifier = EventClassifier::new(RENAME_GRACE);
    let mut ticker = tokio::time::interval(RENAME_GRACE);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(root = ?session.root, debounce_ms = debounce.as_millis() as u64, "watching for changes");

    loop {
        tokio::select! {
            Some(res) = raw_rx.recv() => match res {
                Ok(event) => {
                    for file_event in classifier.classify(event) {
                        session.dispatch(&mut debouncer, file_event);
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            },
            Some((path, generation)) = due_rx.recv() => {
                if debouncer.complete(&path, generation) {
                    let result = session.rescan(&path);
                    session.persist_if_changed(&path, result);
                }
            }
            _ = ticker.tick(), if classifier.has_pending() => {
                for file_event in classifier.expire(Instant::now()) {
                    session.dispatch(&mut debouncer, file_event);
                }
            }
            _ = cancel.cancelled() => {
                info!("Watcher shutting down");
                break;
            }
        }
    }

    for file_event in classifier.flush() {
        session.dispatch(&mut debouncer, file_event);
    }
    debouncer.cancel_all();
    drop(watcher);
    Ok(session.into_store())
}
