//! Configuration for a mirror session.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::mapper::normalize;

/// Default bound for the notification queue and each worker queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Configuration for mirroring one source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Directory to watch.
    pub source_root: PathBuf,

    /// Directory that receives processed files.
    pub dest_root: PathBuf,

    /// Whether actions are written to the audit log.
    pub enable_logging: bool,

    /// Directory in which the audit log file is created.
    pub log_dir: PathBuf,

    /// Number of workers applying actions.
    pub workers: usize,

    /// Bound on queued notifications before delivery waits.
    pub queue_capacity: usize,
}

impl MirrorConfig {
    /// Create a new mirror config.
    pub fn new(source_root: impl Into<PathBuf>, dest_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            dest_root: dest_root.into(),
            ..Self::default()
        }
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parse a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the audit log directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Disable the audit log.
    pub fn without_logging(mut self) -> Self {
        self.enable_logging = false;
        self
    }

    /// Check that the config describes a usable session.
    pub fn validate(&self) -> Result<()> {
        if self.source_root.as_os_str().is_empty() {
            return Err(MirrorError::Config("source_root is not set".to_string()));
        }
        if self.dest_root.as_os_str().is_empty() {
            return Err(MirrorError::Config("dest_root is not set".to_string()));
        }
        if self.workers == 0 {
            return Err(MirrorError::Config("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(MirrorError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        let source = normalize(&self.source_root)?;
        let dest = normalize(&self.dest_root)?;
        if dest.starts_with(&source) {
            return Err(MirrorError::Config(format!(
                "dest_root {} lies inside source_root {}",
                dest.display(),
                source.display()
            )));
        }
        Ok(())
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::new(),
            dest_root: PathBuf::new(),
            enable_logging: true,
            log_dir: PathBuf::from("."),
            workers: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
