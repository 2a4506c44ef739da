//! Error types for the mirror manager.

use histmirror_core::ConversationId;
use histmirror_store::StoreError;
use histmirror_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during Mirror operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A worker is already mirroring this conversation.
    #[error("conversation {0} is already being mirrored")]
    AlreadyRunning(ConversationId),

    /// No worker has been started for this conversation.
    #[error("conversation {0} is not being mirrored")]
    NotRunning(ConversationId),

    /// Nothing has been mirrored for this conversation yet.
    #[error("no records stored for conversation {0}")]
    NotStored(ConversationId),

    /// The worker task panicked or was aborted.
    #[error("worker for conversation {conversation} failed: {message}")]
    WorkerPanicked {
        conversation: ConversationId,
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;
