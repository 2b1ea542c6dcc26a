//! Timestamped audit log of mirror actions.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::{info, warn};

/// Append-only sink for audit lines.
pub trait EventLogger: Send + Sync {
    /// Record `message` as having happened at `timestamp`.
    fn log(&self, timestamp: DateTime<Local>, message: &str);
}

/// Format used for timestamps in written log lines.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Writes one line per message to a file.
#[derive(Debug)]
pub struct FileLogger {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogger {
    /// Open (or create) a log file for appending.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Create a log file in `dir` named after the process start time.
    pub fn create_for_start(dir: &Path, started_at: DateTime<Local>) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let name = format!("log_{}.log", started_at.format("%Y-%m-%dT%H-%M-%S%.6f"));
        Self::open(dir.join(name))
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLogger for FileLogger {
    fn log(&self, timestamp: DateTime<Local>, message: &str) {
        let line = format!("{} {message}\n", timestamp.format(TIMESTAMP_FORMAT));
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|()| file.flush()) {
            warn!("Failed to write log line to {}: {e}", self.path.display());
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl EventLogger for NoopLogger {
    fn log(&self, _timestamp: DateTime<Local>, _message: &str) {}
}

/// Keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<(DateTime<Local>, String)>>,
}

impl MemoryLogger {
    /// Create an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Logged messages in arrival order.
    pub fn messages(&self) -> Vec<String> {
        self.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Logged entries with their timestamps.
    pub fn entries(&self) -> Vec<(DateTime<Local>, String)> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(DateTime<Local>, String)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EventLogger for MemoryLogger {
    fn log(&self, timestamp: DateTime<Local>, message: &str) {
        self.lock().push((timestamp, message.to_string()));
    }
}

/// The engine's view of the audit log.
///
/// Stamps every message with the current local time and mirrors it to
/// `tracing`. When disabled, nothing reaches the sink.
#[derive(Clone)]
pub struct ActionLog {
    sink: Arc<dyn EventLogger>,
    enabled: bool,
}

impl ActionLog {
    /// Wrap a sink.
    pub fn new(sink: Arc<dyn EventLogger>, enabled: bool) -> Self {
        Self { sink, enabled }
    }

    /// Record a message.
    pub fn log(&self, message: &str) {
        info!(target: "folder_mirror::audit", "{message}");
        if self.enabled {
            self.sink.log(Local::now(), message);
        }
    }
}

impl std::fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLog")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
