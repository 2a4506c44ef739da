//! Error types for the sync module.

use histmirror_core::{ConversationId, ValidationError};
use histmirror_store::StoreError;
use thiserror::Error;

/// Errors reported by a [`HistorySource`](crate::HistorySource).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Worth retrying at the same cursor (flood wait, dropped connection).
    #[error("transient source error: {0}")]
    Transient(String),

    /// Retrying will not help (conversation gone, access revoked).
    #[error("fatal source error: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The history source failed.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// A fetched page did not have the expected shape.
    #[error("malformed page: {0}")]
    InvalidPage(#[from] ValidationError),

    /// Transient failures kept recurring at the same cursor.
    #[error("gave up after {attempts} consecutive transient failures at cursor {cursor}: {last}")]
    TransientRetriesExhausted {
        attempts: u32,
        cursor: i64,
        last: String,
    },

    /// The run stopped on an error; progress up to `cursor` is persisted.
    #[error("sync of conversation {conversation} aborted at cursor {cursor}: {source}")]
    Aborted {
        conversation: ConversationId,
        cursor: i64,
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Whether the page should be fetched again at the same cursor.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Source(e) => e.is_transient(),
            SyncError::InvalidPage(_) => true,
            _ => false,
        }
    }

    /// The underlying error, looking through [`SyncError::Aborted`].
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Aborted { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
