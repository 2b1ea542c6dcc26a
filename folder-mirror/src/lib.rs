//! # Folder Mirror
//!
//! This crate mirrors a source directory tree into a destination tree by
//! reacting to file system notifications. New or moved-in files are run
//! through a pluggable transformer and written to the same relative path
//! under the destination; deleted or moved-out files are recorded in the
//! audit log and left alone in the mirror.
//!
//! ## Features
//!
//! - **Recursive Watching**: Subdirectories created after start are picked up
//! - **Directory Filtering**: Only file-level events trigger work
//! - **Per-Path Ordering**: Actions on one destination never overlap
//! - **Audit Log**: Every action is recorded with a timestamp
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Folder Mirror                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  NotifySource ──► WatchSession ──► worker pool                  │
//! │       │                │                 │                      │
//! │       ▼                ▼                 ▼                      │
//! │  DirectoryTracker   map_path     FileTransformer / ActionLog    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use codex_folder_mirror::{CopyTransformer, NoopLogger, WatchSession};
//!
//! let handle = WatchSession::new("raw", "processed", Arc::new(CopyTransformer), Arc::new(NoopLogger))?
//!     .start()
//!     .await?;
//! // ...
//! let summary = handle.stop().await?;
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod logger;
pub mod mapper;
pub mod source;
pub mod transform;
pub mod watcher;

pub use config::MirrorConfig;
pub use error::{MirrorError, Result};
pub use event::{FileEvent, FileEventKind};
pub use logger::{ActionLog, EventLogger, FileLogger, MemoryLogger, NoopLogger};
pub use mapper::{PathMapping, map_path};
pub use source::{DirectoryTracker, EventSink, NotificationSource, NotifySource};
pub use transform::{CopyTransformer, FileTransformer};
pub use watcher::{SessionState, SessionSummary, WatchHandle, WatchSession, ensure_parent_dirs};
