//! Error types for the archive sync engine

use std::path::PathBuf;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type shared by the scanner, manifest, reconciliation and fetch layers
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Filter pattern errors
    #[error("Filter pattern error: {0}")]
    FilterPattern(String),

    /// Manifest load/save errors
    #[error("Manifest error at '{path}': {message}")]
    Manifest { path: PathBuf, message: String },

    /// Append-only sync log errors
    #[error("Sync log error at '{path}': {message}")]
    SyncLog { path: PathBuf, message: String },

    /// A source returned an item that breaks the item contract
    #[error("Invalid item '{item_id}' from source '{source_id}': {message}")]
    InvalidItem {
        source_id: String,
        item_id: String,
        message: String,
    },

    /// Whole-source failure (unreachable host, unparsable feed root, missing auth)
    #[error("Source '{source_id}' failed: {message}")]
    Source { source_id: String, message: String },

    /// Two sources registered under one id
    #[error("Source '{0}' is already registered")]
    DuplicateSource(String),

    /// Unknown source id requested
    #[error("Unknown source '{0}'")]
    UnknownSource(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SyncError {
    /// Create a new manifest error
    pub fn manifest_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new sync log error
    pub fn sync_log_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SyncLog {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new source-level failure
    pub fn source_error(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_id: source_id.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid item error
    pub fn invalid_item(
        source_id: impl Into<String>,
        item_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidItem {
            source_id: source_id.into(),
            item_id: item_id.into(),
            message: message.into(),
        }
    }
}
