//! Error types for the restorable state subsystem.

use std::path::PathBuf;

/// Store, codec and perf failures.
///
/// Only store-level problems are meant to reach the user directly. Per-item
/// restore failures never become a `StateError`; they end up as warnings in
/// the restore report.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The snapshot bytes are corrupt or do not match the schema.
    #[error("Failed to decode snapshot: {0}")]
    Decode(String),

    /// The snapshot was written by an unknown (usually newer) schema.
    #[error("Incompatible snapshot schema version {found} (supported: {min_supported}..={max_supported})")]
    IncompatibleVersion {
        found: u32,
        min_supported: u32,
        max_supported: u32,
    },

    /// A selector resolved to nothing.
    #[error("State not found: {0}")]
    NotFound(String),

    /// A perf checkpoint label is not recorded in this session.
    #[error("Perf checkpoint not found: {0}")]
    LabelNotFound(String),

    /// A named snapshot was saved without a usable name.
    #[error("Invalid snapshot name: {0:?}")]
    InvalidName(String),

    /// The state directory could not be read or written.
    #[error("State directory error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot holds a value that would not survive a round trip.
    #[error("Failed to encode snapshot: {0}")]
    Encode(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StateError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by the external control interface for a single item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// The debugger rejected the item (bad line, invalid expression, ...).
    #[error("{0}")]
    Application(String),

    /// The target is not running, so controls cannot be applied yet.
    #[error("target is not ready")]
    NotReady,
}

pub type StateResult<T> = Result<T, StateError>;
