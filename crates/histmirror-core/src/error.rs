//! Error types for histmirror core.

use thiserror::Error;

use crate::types::Table;

/// Core errors that can occur while encoding or decoding records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Validation errors for records and fetched pages.
///
/// A page that fails validation is treated as a transient source condition by
/// the sync engine: nothing is merged and the same cursor is retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{table} record has non-positive id {id}")]
    NonPositiveId { table: Table, id: i64 },

    #[error("expected a {expected} record, found {found} record {id}")]
    UnexpectedRecord { expected: Table, found: Table, id: i64 },

    #[error("item {id} is not older than cursor {cursor}")]
    NotOlderThanCursor { id: i64, cursor: i64 },

    #[error("items out of order: {id} follows {previous}")]
    OutOfOrder { previous: i64, id: i64 },
}
