//! Error types for the folder mirror.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring a directory tree.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// The source root could not be attached to.
    #[error("cannot watch {}: {reason}", .path.display())]
    WatchSetup {
        /// Root that was being attached.
        path: PathBuf,
        /// Why the attachment failed.
        reason: String,
    },

    /// A delivered path does not lie under the source root.
    #[error("path {} is not under {}", .path.display(), .root.display())]
    InvalidPath {
        /// Offending path.
        path: PathBuf,
        /// Configured source root.
        root: PathBuf,
    },

    /// Creating a destination directory failed.
    #[error("failed to create directory {}: {source}", .path.display())]
    DirectoryCreate {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The injected processing function failed.
    #[error("processing {} failed: {source:#}", .path.display())]
    Processing {
        /// Source file being processed.
        path: PathBuf,
        /// Error reported by the transformer.
        source: anyhow::Error,
    },

    /// The notification subscription itself broke.
    #[error("notification source failed: {0}")]
    NotificationSource(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file parse error.
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}
