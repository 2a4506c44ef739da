//! SQLite implementation of the RecordStore trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use histmirror_core::{Channel, Group, Message, Payload, Record, Sender, ServiceEvent, Table};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    Filter, HistoryKind, Order, QueryKey, RecordStore, UpsertResult, WriteBatch,
};

const MESSAGE_COLUMNS: &str = "id, kind, text, sender_id, outgoing, date, edit_date, forward, \
     via_bot_id, reply_to, media, media_kind, entities, action, action_kind";
const SENDER_COLUMNS: &str = "id, access_hash, is_self, is_contact, is_mutual_contact, \
     is_deleted, is_bot, first_name, last_name, username, phone, photo";
const GROUP_COLUMNS: &str = "id, created_at, is_creator, title, participants_count, photo";
const CHANNEL_COLUMNS: &str =
    "id, access_hash, is_megagroup, created_at, is_creator, title, username, photo";

/// `sync_state` key of the committed resume cursor.
const RESUME_CURSOR_KEY: &str = "resume_cursor";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Debug)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates parent directories and the file if needed, then runs
    /// migrations. A database written by a newer schema is refused.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "opened record store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Close the database, surfacing any error from releasing the handle.
    ///
    /// Dropping the store also closes it, silently.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => {
                let conn = mutex
                    .into_inner()
                    .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
                conn.close().map_err(|(_, e)| StoreError::Database(e))
            }
            // A blocking task still holds a clone; it drops the last one.
            Err(_) => Ok(()),
        }
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// IDs bound per `IN (...)` lookup, below SQLite's parameter limit.
const MAX_BOUND_IDS: usize = 500;

/// Quoted table name (`groups` is an SQL keyword).
fn quoted(table: Table) -> String {
    format!("\"{}\"", table.name())
}

fn columns(table: Table) -> &'static str {
    match table {
        Table::Messages => MESSAGE_COLUMNS,
        Table::Senders => SENDER_COLUMNS,
        Table::Groups => GROUP_COLUMNS,
        Table::Channels => CHANNEL_COLUMNS,
    }
}

/// Column holding the record date, if the table has one.
fn date_column(table: Table) -> Option<&'static str> {
    match table {
        Table::Messages => Some("date"),
        Table::Groups | Table::Channels => Some("created_at"),
        Table::Senders => None,
    }
}

/// Expression used for date ordering; undated rows sort as 0.
fn sort_date(table: Table) -> String {
    match date_column(table) {
        Some(col) => format!("COALESCE({col}, 0)"),
        None => "0".to_string(),
    }
}

fn blob(bytes: Option<Vec<u8>>) -> Option<Bytes> {
    bytes.map(Bytes::from)
}

fn payload(bytes: Option<Vec<u8>>, kind: Option<i64>) -> Option<Payload> {
    bytes.map(|b| Payload::new(kind.unwrap_or(0) as u32, b))
}

// Helper to convert a row to Record
fn row_to_record(table: Table, row: &Row<'_>) -> rusqlite::Result<Record> {
    let record = match table {
        Table::Messages => {
            let kind: i64 = row.get("kind")?;
            match HistoryKind::from_i64(kind) {
                Some(HistoryKind::Message) => Record::Message(Message {
                    id: row.get("id")?,
                    text: row.get("text")?,
                    sender_id: row.get("sender_id")?,
                    outgoing: row.get("outgoing")?,
                    date: row.get("date")?,
                    edit_date: row.get("edit_date")?,
                    forward: blob(row.get("forward")?),
                    via_bot_id: row.get("via_bot_id")?,
                    reply_to: row.get("reply_to")?,
                    media: payload(row.get("media")?, row.get("media_kind")?),
                    entities: blob(row.get("entities")?),
                }),
                Some(HistoryKind::ServiceEvent) => Record::ServiceEvent(ServiceEvent {
                    id: row.get("id")?,
                    sender_id: row.get("sender_id")?,
                    outgoing: row.get("outgoing")?,
                    date: row.get("date")?,
                    reply_to: row.get("reply_to")?,
                    action: payload(row.get("action")?, row.get("action_kind")?),
                }),
                None => return Err(rusqlite::Error::IntegralValueOutOfRange(1, kind)),
            }
        }
        Table::Senders => Record::Sender(Sender {
            id: row.get("id")?,
            access_hash: row.get("access_hash")?,
            is_self: row.get("is_self")?,
            is_contact: row.get("is_contact")?,
            is_mutual_contact: row.get("is_mutual_contact")?,
            is_deleted: row.get("is_deleted")?,
            is_bot: row.get("is_bot")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            username: row.get("username")?,
            phone: row.get("phone")?,
            photo: blob(row.get("photo")?),
        }),
        Table::Groups => Record::Group(Group {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            is_creator: row.get("is_creator")?,
            title: row.get("title")?,
            participants_count: row.get("participants_count")?,
            photo: blob(row.get("photo")?),
        }),
        Table::Channels => Record::Channel(Channel {
            id: row.get("id")?,
            access_hash: row.get("access_hash")?,
            is_megagroup: row.get("is_megagroup")?,
            created_at: row.get("created_at")?,
            is_creator: row.get("is_creator")?,
            title: row.get("title")?,
            username: row.get("username")?,
            photo: blob(row.get("photo")?),
        }),
    };
    Ok(record)
}

fn row_exists(conn: &Connection, id: i64, table: Table) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", quoted(table)),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Write one record on an open connection or transaction.
fn write_record(conn: &Connection, record: &Record, replace: bool) -> Result<UpsertResult> {
    let table = record.table();
    let existed = row_exists(conn, record.id(), table)?;
    if existed && !replace {
        return Ok(UpsertResult::DuplicateRecord);
    }

    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };

    match record {
        Record::Message(m) => conn.execute(
            &format!(
                "{verb} INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                m.id,
                HistoryKind::Message.as_i64(),
                m.text,
                m.sender_id,
                m.outgoing,
                m.date,
                m.edit_date,
                m.forward.as_deref(),
                m.via_bot_id,
                m.reply_to,
                m.media.as_ref().map(|p| p.bytes.as_ref()),
                m.media.as_ref().map(|p| i64::from(p.kind)),
                m.entities.as_deref(),
                Option::<&[u8]>::None,
                Option::<i64>::None,
            ],
        )?,
        Record::ServiceEvent(s) => conn.execute(
            &format!(
                "{verb} INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, NULL, ?3, ?4, ?5, NULL, NULL, NULL, ?6, NULL, NULL, NULL, ?7, ?8)"
            ),
            params![
                s.id,
                HistoryKind::ServiceEvent.as_i64(),
                s.sender_id,
                s.outgoing,
                s.date,
                s.reply_to,
                s.action.as_ref().map(|p| p.bytes.as_ref()),
                s.action.as_ref().map(|p| i64::from(p.kind)),
            ],
        )?,
        Record::Sender(u) => conn.execute(
            &format!(
                "{verb} INTO senders ({SENDER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                u.id,
                u.access_hash,
                u.is_self,
                u.is_contact,
                u.is_mutual_contact,
                u.is_deleted,
                u.is_bot,
                u.first_name,
                u.last_name,
                u.username,
                u.phone,
                u.photo.as_deref(),
            ],
        )?,
        Record::Group(g) => conn.execute(
            &format!(
                "{verb} INTO \"groups\" ({GROUP_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                g.id,
                g.created_at,
                g.is_creator,
                g.title,
                g.participants_count,
                g.photo.as_deref(),
            ],
        )?,
        Record::Channel(c) => conn.execute(
            &format!(
                "{verb} INTO channels ({CHANNEL_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                c.id,
                c.access_hash,
                c.is_megagroup,
                c.created_at,
                c.is_creator,
                c.title,
                c.username,
                c.photo.as_deref(),
            ],
        )?,
    };

    Ok(if existed {
        UpsertResult::Replaced
    } else {
        UpsertResult::Inserted
    })
}

fn set_resume_cursor(conn: &Connection, cursor: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![RESUME_CURSOR_KEY, cursor],
    )?;
    Ok(())
}

/// Translate a filter into WHERE conditions and positional parameters.
fn filter_conditions(table: Table, filter: Option<&Filter>) -> (Vec<String>, Vec<Value>) {
    let mut conds = Vec::new();
    let mut values = Vec::new();

    let Some(filter) = filter else {
        return (conds, values);
    };
    let is_messages = table == Table::Messages;

    if let Some(kind) = filter.kind {
        if is_messages {
            conds.push("kind = ?".to_string());
            values.push(Value::Integer(kind.as_i64()));
        } else {
            conds.push("0".to_string());
        }
    }
    if let Some(has_media) = filter.has_media {
        conds.push(match (is_messages, has_media) {
            (true, true) => "media_kind IS NOT NULL".to_string(),
            (true, false) => "media_kind IS NULL".to_string(),
            (false, _) => "0".to_string(),
        });
    }
    if let Some(media_kind) = filter.media_kind {
        if is_messages {
            conds.push("media_kind = ?".to_string());
            values.push(Value::Integer(i64::from(media_kind)));
        } else {
            conds.push("0".to_string());
        }
    }
    if let Some(sender_id) = filter.sender_id {
        if is_messages {
            conds.push("sender_id = ?".to_string());
            values.push(Value::Integer(sender_id));
        } else {
            conds.push("0".to_string());
        }
    }
    for (bound, op) in [(filter.date_from, ">="), (filter.date_to, "<")] {
        let Some(bound) = bound else { continue };
        match date_column(table) {
            Some(col) => {
                conds.push(format!("{col} {op} ?"));
                values.push(Value::Integer(bound));
            }
            None => conds.push("0".to_string()),
        }
    }

    (conds, values)
}

fn where_clause(conds: &[String]) -> String {
    if conds.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conds.join(" AND "))
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(&self, record: &Record, replace: bool) -> Result<UpsertResult> {
        let record = record.clone();
        self.run(move |conn| write_record(conn, &record, replace)).await
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<Vec<UpsertResult>> {
        let batch = batch.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut results = Vec::with_capacity(batch.len());

            for upsert in &batch.upserts {
                results.push(write_record(&tx, &upsert.record, upsert.replace)?);
            }
            if let Some(cursor) = batch.resume_cursor {
                set_resume_cursor(&tx, cursor)?;
            }

            tx.commit()?;
            Ok(results)
        })
        .await
    }

    async fn exists(&self, id: i64, table: Table) -> Result<bool> {
        self.run(move |conn| row_exists(conn, id, table)).await
    }

    async fn existing_ids(&self, ids: &[i64], table: Table) -> Result<BTreeSet<i64>> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let ids = ids.to_vec();
        self.run(move |conn| {
            let mut found = BTreeSet::new();
            for chunk in ids.chunks(MAX_BOUND_IDS) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT id FROM {} WHERE id IN ({})",
                    quoted(table),
                    placeholders
                ))?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get(0))?;
                for id in rows {
                    found.insert(id?);
                }
            }
            Ok(found)
        })
        .await
    }

    async fn get(&self, id: i64, table: Table) -> Result<Option<Record>> {
        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM {} WHERE id = ?1",
                    columns(table),
                    quoted(table)
                ),
                params![id],
                |row| row_to_record(table, row),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn count(&self, table: Table, filter: Option<&Filter>) -> Result<u64> {
        let (conds, values) = filter_conditions(table, filter);

        self.run(move |conn| {
            let count: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} {}",
                    quoted(table),
                    where_clause(&conds)
                ),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn query_page(
        &self,
        table: Table,
        filter: Option<&Filter>,
        order: Order,
        after: Option<QueryKey>,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let (mut conds, mut values) = filter_conditions(table, filter);
        let date = sort_date(table);

        if let Some(key) = after {
            match order {
                Order::IdAsc => conds.push("id > ?".to_string()),
                Order::IdDesc => conds.push("id < ?".to_string()),
                Order::DateAsc => conds.push(format!("({date}, id) > (?, ?)")),
                Order::DateDesc => conds.push(format!("({date}, id) < (?, ?)")),
            }
            if matches!(order, Order::DateAsc | Order::DateDesc) {
                values.push(Value::Integer(key.date));
            }
            values.push(Value::Integer(key.id));
        }

        let order_by = match order {
            Order::IdAsc => "id ASC".to_string(),
            Order::IdDesc => "id DESC".to_string(),
            Order::DateAsc => format!("{date} ASC, id ASC"),
            Order::DateDesc => format!("{date} DESC, id DESC"),
        };
        values.push(Value::Integer(limit as i64));

        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY {} LIMIT ?",
            columns(table),
            quoted(table),
            where_clause(&conds),
            order_by
        );

        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params_from_iter(values.iter()), |row| {
                    row_to_record(table, row)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn min_id(&self, table: Table) -> Result<Option<i64>> {
        self.run(move |conn| {
            let id: Option<i64> = conn.query_row(
                &format!("SELECT MIN(id) FROM {}", quoted(table)),
                [],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    async fn max_id(&self, table: Table) -> Result<Option<i64>> {
        self.run(move |conn| {
            let id: Option<i64> = conn.query_row(
                &format!("SELECT MAX(id) FROM {}", quoted(table)),
                [],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
    }

    async fn committed_cursor(&self) -> Result<Option<i64>> {
        self.run(|conn| {
            conn.query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![RESUME_CURSOR_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RecordStoreExt;

    fn make_message(id: i64) -> Record {
        Message::new(id, 1_600_000_000 + id * 60)
            .with_text(format!("message {id}"))
            .with_sender(7)
            .into()
    }

    #[tokio::test]
    async fn test_insert_and_get_message() {
        let store = SqliteStore::open_memory().unwrap();
        let record: Record = Message::new(10, 1_700_000_000)
            .with_text("hello")
            .with_sender(3)
            .with_outgoing(true)
            .with_edit_date(1_700_000_100)
            .with_reply_to(9)
            .with_forward(vec![1u8, 2])
            .with_via_bot(44)
            .with_media(Payload::new(0x4e7b_1a2c, vec![9u8, 9, 9]))
            .with_entities(vec![5u8])
            .into();

        let result = store.upsert(&record, false).await.unwrap();
        assert_eq!(result, UpsertResult::Inserted);

        let retrieved = store.get(10, Table::Messages).await.unwrap().unwrap();
        assert_eq!(retrieved, record);
    }

    #[tokio::test]
    async fn test_service_event_shares_messages_table() {
        let store = SqliteStore::open_memory().unwrap();
        let event: Record = ServiceEvent::new(11, 1_700_000_000)
            .with_sender(2)
            .with_action(Payload::new(17, vec![1u8]))
            .into();

        store.upsert(&event, false).await.unwrap();

        assert!(store.exists(11, Table::Messages).await.unwrap());
        assert_eq!(store.get(11, Table::Messages).await.unwrap(), Some(event));
    }

    #[tokio::test]
    async fn test_duplicate_insert_leaves_row_unchanged() {
        let store = SqliteStore::open_memory().unwrap();
        let original = make_message(5);
        let impostor: Record = Message::new(5, 0).with_text("different").into();

        assert_eq!(store.upsert(&original, false).await.unwrap(), UpsertResult::Inserted);
        assert_eq!(
            store.upsert(&impostor, false).await.unwrap(),
            UpsertResult::DuplicateRecord
        );

        assert_eq!(store.get(5, Table::Messages).await.unwrap(), Some(original));
        assert_eq!(store.count(Table::Messages, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_overwrites_profile() {
        let store = SqliteStore::open_memory().unwrap();
        let old: Record = Sender::new(1).with_name("Old", None).into();
        let new: Record = Sender::new(1).with_name("New", Some("Name")).into();

        assert_eq!(store.upsert(&old, true).await.unwrap(), UpsertResult::Inserted);
        assert_eq!(store.upsert(&new, true).await.unwrap(), UpsertResult::Replaced);
        assert_eq!(store.get(1, Table::Senders).await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn test_groups_and_channels_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let mut group = Group::new(3, "Family");
        group.participants_count = Some(4);
        group.created_at = Some(1_500_000_000);
        let mut channel = Channel::new(4, "News");
        channel.is_megagroup = true;
        channel.username = Some("news".into());

        store.upsert(&group.clone().into(), true).await.unwrap();
        store.upsert(&channel.clone().into(), true).await.unwrap();

        assert_eq!(store.get(3, Table::Groups).await.unwrap(), Some(group.into()));
        assert_eq!(store.get(4, Table::Channels).await.unwrap(), Some(channel.into()));
        assert!(!store.exists(3, Table::Channels).await.unwrap());
    }

    #[tokio::test]
    async fn test_existing_ids_spans_lookup_chunks() {
        let store = SqliteStore::open_memory().unwrap();
        let mut batch = WriteBatch::new();
        for id in (1..=699).step_by(2) {
            batch.insert(make_message(id));
        }
        store.apply(&batch).await.unwrap();

        let asked: Vec<i64> = (1..=1_400).rev().collect();
        let found = store.existing_ids(&asked, Table::Messages).await.unwrap();

        assert_eq!(found.len(), 350);
        assert!(found.iter().all(|id| id % 2 == 1 && *id < 700));
        assert!(store.existing_ids(&asked, Table::Senders).await.unwrap().is_empty());
        assert!(store.existing_ids(&[], Table::Messages).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_batch_commits_cursor() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.committed_cursor().await.unwrap(), None);

        let mut batch = WriteBatch::new();
        batch.replace(Sender::new(7).into());
        batch.insert(make_message(30));
        batch.insert(make_message(29));
        batch.insert(make_message(30));
        let batch = batch.with_cursor(29);

        let results = store.apply(&batch).await.unwrap();
        assert_eq!(
            results,
            vec![
                UpsertResult::Inserted,
                UpsertResult::Inserted,
                UpsertResult::Inserted,
                UpsertResult::DuplicateRecord,
            ]
        );
        assert_eq!(store.committed_cursor().await.unwrap(), Some(29));

        store.apply(&WriteBatch::new().with_cursor(12)).await.unwrap();
        assert_eq!(store.committed_cursor().await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn test_count_with_filters() {
        let store = SqliteStore::open_memory().unwrap();
        for id in 1..=10 {
            let mut msg = Message::new(id, 1_000 + id).with_sender(if id % 2 == 0 { 2 } else { 3 });
            if id <= 3 {
                msg = msg.with_media(Payload::new(100, vec![0u8]));
            }
            store.upsert(&msg.into(), false).await.unwrap();
        }
        store
            .upsert(&ServiceEvent::new(11, 1_011).into(), false)
            .await
            .unwrap();

        let all = store.count(Table::Messages, None).await.unwrap();
        let media = store
            .count(Table::Messages, Some(&Filter::new().has_media(true)))
            .await
            .unwrap();
        let photos = store
            .count(Table::Messages, Some(&Filter::new().media_kind(100)))
            .await
            .unwrap();
        let by_sender = store
            .count(Table::Messages, Some(&Filter::new().sender(2)))
            .await
            .unwrap();
        let services = store
            .count(Table::Messages, Some(&Filter::new().kind(HistoryKind::ServiceEvent)))
            .await
            .unwrap();
        let window = store
            .count(Table::Messages, Some(&Filter::new().between(1_003, 1_006)))
            .await
            .unwrap();
        let senders_with_media = store
            .count(Table::Senders, Some(&Filter::new().has_media(true)))
            .await
            .unwrap();

        assert_eq!(all, 11);
        assert_eq!(media, 3);
        assert_eq!(photos, 3);
        assert_eq!(by_sender, 5);
        assert_eq!(services, 1);
        assert_eq!(window, 3);
        assert_eq!(senders_with_media, 0);
    }

    #[tokio::test]
    async fn test_lazy_query_orders() {
        let store = SqliteStore::open_memory().unwrap();
        // Dates run opposite to ids for the upper half.
        for id in 1..=20 {
            let date = if id > 10 { 100 - id } else { id };
            store
                .upsert(&Message::new(id, date).into(), false)
                .await
                .unwrap();
        }

        let asc: Vec<i64> = store
            .query(Table::Messages, None, Order::IdAsc)
            .with_batch_size(3)
            .collect_all()
            .await
            .unwrap()
            .iter()
            .map(Record::id)
            .collect();
        assert_eq!(asc, (1..=20).collect::<Vec<_>>());

        let desc: Vec<i64> = store
            .query(Table::Messages, None, Order::IdDesc)
            .with_batch_size(7)
            .collect_all()
            .await
            .unwrap()
            .iter()
            .map(Record::id)
            .collect();
        assert_eq!(desc, (1..=20).rev().collect::<Vec<_>>());

        let by_date: Vec<i64> = store
            .query(Table::Messages, None, Order::DateAsc)
            .with_batch_size(4)
            .collect_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.date().unwrap())
            .collect();
        let mut sorted = by_date.clone();
        sorted.sort_unstable();
        assert_eq!(by_date, sorted);
        assert_eq!(by_date.len(), 20);
    }

    #[tokio::test]
    async fn test_query_is_restartable() {
        let store = SqliteStore::open_memory().unwrap();
        for id in 1..=5 {
            store.upsert(&make_message(id), false).await.unwrap();
        }

        let mut first = store.query(Table::Messages, None, Order::IdAsc);
        assert_eq!(first.next().await.unwrap().map(|r| r.id()), Some(1));
        assert_eq!(first.next().await.unwrap().map(|r| r.id()), Some(2));

        let mut second = store.query(Table::Messages, None, Order::IdAsc);
        assert_eq!(second.next().await.unwrap().map(|r| r.id()), Some(1));
    }

    #[tokio::test]
    async fn test_min_max_ids() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.min_id(Table::Messages).await.unwrap(), None);

        for id in [40, 12, 77] {
            store.upsert(&make_message(id), false).await.unwrap();
        }
        assert_eq!(store.min_id(Table::Messages).await.unwrap(), Some(12));
        assert_eq!(store.max_id(Table::Messages).await.unwrap(), Some(77));
    }

    #[tokio::test]
    async fn test_reopen_persists_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.sqlite3");

        let store = SqliteStore::open(&path).unwrap();
        store.upsert(&make_message(1), false).await.unwrap();
        store.apply(&WriteBatch::new().with_cursor(1)).await.unwrap();
        store.close().unwrap();

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.exists(1, Table::Messages).await.unwrap());
        assert_eq!(store.committed_cursor().await.unwrap(), Some(1));
    }
}
