//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1. A database stamped with a
//! version newer than this build knows is refused, never touched.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current = schema_version(conn)?;

    if current > CURRENT_VERSION {
        return Err(StoreError::FormatVersionMismatch {
            what: "record store schema",
            found: current,
            supported: CURRENT_VERSION,
        });
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_secs()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated record store schema");
    }

    Ok(())
}

/// Highest applied schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Messages and service events, told apart by `kind`
        CREATE TABLE messages (
            id INTEGER PRIMARY KEY,
            kind INTEGER NOT NULL,            -- 0=message, 1=service event
            text TEXT,                        -- text, or media caption
            sender_id INTEGER,
            outgoing INTEGER NOT NULL DEFAULT 0,
            date INTEGER NOT NULL,            -- Unix seconds
            edit_date INTEGER,
            forward BLOB,
            via_bot_id INTEGER,
            reply_to INTEGER,
            media BLOB,
            media_kind INTEGER,               -- payload discriminator
            entities BLOB,
            action BLOB,
            action_kind INTEGER
        );

        CREATE TABLE senders (
            id INTEGER PRIMARY KEY,
            access_hash INTEGER,
            is_self INTEGER NOT NULL DEFAULT 0,
            is_contact INTEGER NOT NULL DEFAULT 0,
            is_mutual_contact INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            is_bot INTEGER NOT NULL DEFAULT 0,
            first_name TEXT,
            last_name TEXT,
            username TEXT,
            phone TEXT,
            photo BLOB
        );

        CREATE TABLE "groups" (
            id INTEGER PRIMARY KEY,
            created_at INTEGER,
            is_creator INTEGER NOT NULL DEFAULT 0,
            title TEXT,
            participants_count INTEGER,
            photo BLOB
        );

        CREATE TABLE channels (
            id INTEGER PRIMARY KEY,
            access_hash INTEGER,
            is_megagroup INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER,
            is_creator INTEGER NOT NULL DEFAULT 0,
            title TEXT,
            username TEXT,
            photo BLOB
        );

        -- Values committed together with record batches
        CREATE TABLE sync_state (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        CREATE INDEX idx_messages_date ON messages(date);
        CREATE INDEX idx_messages_media_kind ON messages(media_kind);
        CREATE INDEX idx_messages_sender ON messages(sender_id);
        "#,
    )?;

    Ok(())
}

/// Get current time in seconds.
fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
