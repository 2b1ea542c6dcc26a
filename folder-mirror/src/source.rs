//! Notification sources feeding the watch engine.
//!
//! A source attaches to a root directory and pushes normalized
//! [`FileEvent`]s into an [`EventSink`]. The sink is backed by a bounded
//! channel: when the engine falls behind, delivery blocks rather than
//! dropping notifications.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::error::{MirrorError, Result};
use crate::event::{FileEvent, FileEventKind, RawKind};

/// Message travelling from a source to the engine.
#[derive(Debug)]
pub enum SourceSignal {
    /// A classified file event.
    Event(FileEvent),

    /// The subscription broke and will deliver nothing more.
    Failed(String),
}

/// Handle a source uses to deliver events to a running session.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SourceSignal>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<SourceSignal>) -> Self {
        Self { tx }
    }

    /// Deliver an event from a non-async thread, waiting while the queue is
    /// full. Returns `false` once the session no longer accepts events.
    ///
    /// Must not be called from within an async runtime; use
    /// [`EventSink::deliver`] there.
    pub fn send(&self, event: FileEvent) -> bool {
        self.tx.blocking_send(SourceSignal::Event(event)).is_ok()
    }

    /// Async counterpart of [`EventSink::send`].
    pub async fn deliver(&self, event: FileEvent) -> bool {
        self.tx.send(SourceSignal::Event(event)).await.is_ok()
    }

    /// Report that the subscription is unusable. Safe to call from any
    /// thread; never blocks.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Err(e) = self.tx.try_send(SourceSignal::Failed(reason.clone())) {
            // Queue full: hand the failure to a helper thread so the caller
            // is not blocked behind pending events.
            if let mpsc::error::TrySendError::Full(signal) = e {
                let tx = self.tx.clone();
                std::thread::spawn(move || {
                    let _ = tx.blocking_send(signal);
                });
            } else {
                debug!("Dropping source failure for closed session: {reason}");
            }
        }
    }
}

/// Capability to watch a directory tree recursively.
///
/// Implementations must deliver create, delete, moved-in and moved-out events
/// for every file below `root`, including files in subdirectories created
/// after attachment, and must stop delivering once detached.
pub trait NotificationSource: Send {
    /// Start delivering events for `root` into `sink`.
    fn attach(&mut self, root: &Path, sink: EventSink) -> Result<()>;

    /// Release the subscription. Calling it more than once is harmless.
    fn detach(&mut self);
}

/// Set of directories currently known under a root.
///
/// Backends often cannot say whether a path that just disappeared was a
/// directory; the tracker remembers so departures can be classified.
#[derive(Debug, Clone)]
pub struct DirectoryTracker {
    root: PathBuf,
    dirs: HashSet<PathBuf>,
    // Directories that left the tree whose follow-up notifications (the
    // watch on the directory itself going away) may still be in flight.
    departed: HashSet<PathBuf>,
}

impl DirectoryTracker {
    /// Record every directory currently below `root`.
    pub fn scan(root: &Path) -> Self {
        let mut tracker = Self {
            root: root.to_path_buf(),
            dirs: HashSet::new(),
            departed: HashSet::new(),
        };
        tracker.insert_tree(root);
        tracker.dirs.remove(root);
        tracker
    }

    /// Whether `path` is a known directory.
    pub fn contains(&self, path: &Path) -> bool {
        path == self.root || self.dirs.contains(path)
    }

    /// Number of known directories below the root.
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether no directories are known below the root.
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Register `path` and every directory beneath it.
    pub fn insert_tree(&mut self, path: &Path) {
        let walker = WalkDir::new(path).follow_links(false);
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_dir() {
                self.dirs.insert(entry.into_path());
            }
        }
    }

    /// Forget `path` and everything beneath it.
    pub fn remove_tree(&mut self, path: &Path) {
        let (gone, kept): (HashSet<PathBuf>, HashSet<PathBuf>) =
            self.dirs.drain().partition(|dir| dir.starts_with(path));
        self.dirs = kept;
        self.departed.extend(gone);
    }

    /// Convert a raw backend event into file events, updating the tracker.
    pub fn translate(&mut self, event: &notify::Event) -> Vec<FileEvent> {
        if event.need_rescan() {
            warn!("Notification backend dropped events; some changes may be missed");
        }

        let raw = RawKind::from(&event.kind);
        event
            .paths
            .iter()
            .filter_map(|path| self.classify(raw, path))
            .collect()
    }

    fn classify(&mut self, raw: RawKind, path: &Path) -> Option<FileEvent> {
        let (kind, reported) = match raw {
            RawKind::Known { kind, is_directory } => (kind, is_directory),
            RawKind::AmbiguousRename => {
                if std::fs::symlink_metadata(path).is_ok() {
                    (FileEventKind::MovedIn, None)
                } else {
                    (FileEventKind::MovedOut, None)
                }
            }
            RawKind::Ignored => return None,
        };

        let is_directory = if path == self.root {
            true
        } else {
            reported.unwrap_or_else(|| self.was_directory(kind, path))
        };

        match (is_directory, kind.is_arrival()) {
            (true, true) => {
                self.departed.remove(path);
                self.insert_tree(path);
            }
            (true, false) => {
                if self.departed.remove(path) {
                    // Only the departed directory itself gets a follow-up.
                    self.departed.retain(|dir| !dir.starts_with(path));
                } else {
                    self.remove_tree(path);
                    self.departed.insert(path.to_path_buf());
                }
            }
            (false, true) => {
                self.dirs.remove(path);
                self.departed.remove(path);
            }
            (false, false) => {}
        }

        if is_directory {
            Some(FileEvent::directory(kind, path))
        } else {
            Some(FileEvent::new(kind, path))
        }
    }

    fn was_directory(&self, kind: FileEventKind, path: &Path) -> bool {
        if kind.is_arrival() {
            std::fs::symlink_metadata(path)
                .map(|m| m.is_dir())
                .unwrap_or_else(|_| self.contains(path))
        } else {
            self.contains(path) || self.departed.contains(path)
        }
    }
}

/// Source backed by the platform's native watcher via `notify`.
#[derive(Default)]
pub struct NotifySource {
    watcher: Option<RecommendedWatcher>,
    root: Option<PathBuf>,
}

impl NotifySource {
    /// Create an unattached source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the source is currently attached.
    pub fn is_attached(&self) -> bool {
        self.watcher.is_some()
    }
}

impl std::fmt::Debug for NotifySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifySource")
            .field("root", &self.root)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl NotificationSource for NotifySource {
    fn attach(&mut self, root: &Path, sink: EventSink) -> Result<()> {
        if self.watcher.is_some() {
            return Err(MirrorError::WatchSetup {
                path: root.to_path_buf(),
                reason: "source is already attached".to_string(),
            });
        }

        let mut tracker = DirectoryTracker::scan(root);
        debug!(
            "Seeded {} known directories under {}",
            tracker.len(),
            root.display()
        );

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for file_event in tracker.translate(&event) {
                        if !sink.send(file_event) {
                            return;
                        }
                    }
                }
                Err(e) if is_fatal(&e) => {
                    error!("Watch error: {e}");
                    sink.fail(e.to_string());
                }
                Err(e) => {
                    warn!("Transient watch error: {e}");
                }
            },
        )
        .map_err(|e| MirrorError::WatchSetup {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| MirrorError::WatchSetup {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        debug!("Started watching: {}", root.display());
        self.watcher = Some(watcher);
        self.root = Some(root.to_path_buf());
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Some(root) = self.root.take() {
                if let Err(e) = watcher.unwatch(&root) {
                    debug!("Unwatch of {} failed: {e}", root.display());
                }
            }
        }
    }
}

impl Drop for NotifySource {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Errors after which the subscription cannot be trusted to deliver events.
///
/// Vanished paths are routine while a tree is churning (a subdirectory can be
/// removed before its watch is added) and are not fatal.
fn is_fatal(error: &notify::Error) -> bool {
    match &error.kind {
        notify::ErrorKind::MaxFilesWatch => true,
        notify::ErrorKind::Io(io) => io.kind() != std::io::ErrorKind::NotFound,
        _ => false,
    }
}
