//! Structural checks for records and fetched pages.

use crate::error::ValidationError;
use crate::record::Record;
use crate::types::Table;

/// Validate a single record in isolation.
pub fn validate_record(record: &Record) -> Result<(), ValidationError> {
    if record.id() <= 0 {
        return Err(ValidationError::NonPositiveId {
            table: record.table(),
            id: record.id(),
        });
    }
    Ok(())
}

/// Validate a side entity found in the list for `expected`.
pub fn validate_side_entity(record: &Record, expected: Table) -> Result<(), ValidationError> {
    if record.table() != expected {
        return Err(ValidationError::UnexpectedRecord {
            expected,
            found: record.table(),
            id: record.id(),
        });
    }
    validate_record(record)
}

/// Validate the history items of one page fetched at `cursor`.
///
/// Items must be messages or service events, newest first, and strictly
/// older than the cursor (`0` means "from the newest", so anything goes).
pub fn validate_history_items(items: &[Record], cursor: i64) -> Result<(), ValidationError> {
    let mut previous: Option<i64> = None;

    for item in items {
        if !item.is_history_item() {
            return Err(ValidationError::UnexpectedRecord {
                expected: Table::Messages,
                found: item.table(),
                id: item.id(),
            });
        }
        validate_record(item)?;

        let id = item.id();
        if cursor != 0 && id >= cursor {
            return Err(ValidationError::NotOlderThanCursor { id, cursor });
        }
        if let Some(prev) = previous {
            if id >= prev {
                return Err(ValidationError::OutOfOrder { previous: prev, id });
            }
        }
        previous = Some(id);
    }

    Ok(())
}
