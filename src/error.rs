//! Error types for holiday synchronization sessions.

use crate::sqlite::StoreError;
use thiserror::Error;

/// Errors that unwind to the session boundary.
///
/// Soft fetch failures never appear here: they are reported as
/// [`crate::sync::SyncOutcome::Skipped`].
#[derive(Error, Debug)]
pub enum SyncError {
    /// A line of the holiday feed could not be parsed. The whole batch is
    /// discarded.
    #[error("malformed holiday dataset at line {line} ({content:?}): {reason}")]
    MalformedDataset {
        line: usize,
        content: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Result type alias for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
