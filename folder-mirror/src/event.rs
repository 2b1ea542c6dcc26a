//! File events delivered by a notification source.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use serde::{Deserialize, Serialize};

/// A normalized file system notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Absolute path to the affected file or directory.
    pub path: PathBuf,

    /// Whether the path is (or was) a directory.
    pub is_directory: bool,

    /// When the event was received.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Create a new file event for a regular file.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            is_directory: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a new file event for a directory.
    pub fn directory(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            is_directory: true,
            ..Self::new(kind, path)
        }
    }

    /// Check if this is a directory event.
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }
}

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// Path was created inside the tree.
    Created,

    /// Path was moved into the tree (rename target).
    MovedIn,

    /// Path was deleted.
    Deleted,

    /// Path was moved out of the tree (rename source).
    MovedOut,
}

impl FileEventKind {
    /// Whether the path is now present under the source root.
    pub fn is_arrival(self) -> bool {
        matches!(self, Self::Created | Self::MovedIn)
    }

    /// Whether the path has left the source root.
    pub fn is_departure(self) -> bool {
        !self.is_arrival()
    }
}

/// What the backend could tell about a raw notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    /// One of the four presence/absence kinds.
    Known {
        /// Classified kind.
        kind: FileEventKind,
        /// Directory flag when the backend reports it.
        is_directory: Option<bool>,
    },

    /// A rename whose direction the backend did not report.
    AmbiguousRename,

    /// Attribute changes, writes, accesses and everything else.
    Ignored,
}

impl From<&notify::EventKind> for RawKind {
    fn from(kind: &notify::EventKind) -> Self {
        match kind {
            notify::EventKind::Create(create) => Self::Known {
                kind: FileEventKind::Created,
                is_directory: match create {
                    CreateKind::Folder => Some(true),
                    CreateKind::File => Some(false),
                    _ => None,
                },
            },
            notify::EventKind::Remove(remove) => Self::Known {
                kind: FileEventKind::Deleted,
                is_directory: match remove {
                    RemoveKind::Folder => Some(true),
                    RemoveKind::File => Some(false),
                    _ => None,
                },
            },
            notify::EventKind::Modify(ModifyKind::Name(rename)) => match rename {
                RenameMode::To => Self::Known {
                    kind: FileEventKind::MovedIn,
                    is_directory: None,
                },
                RenameMode::From => Self::Known {
                    kind: FileEventKind::MovedOut,
                    is_directory: None,
                },
                RenameMode::Any | RenameMode::Other => Self::AmbiguousRename,
                // Follows the From/To pair on inotify; acting on it would
                // duplicate both halves.
                RenameMode::Both => Self::Ignored,
            },
            _ => Self::Ignored,
        }
    }
}
