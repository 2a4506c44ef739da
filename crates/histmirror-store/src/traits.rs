//! RecordStore trait: the abstract interface for record persistence.
//!
//! This trait allows the sync engine to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};

use async_trait::async_trait;
use histmirror_core::{Record, Table};

use crate::error::Result;

/// Result of writing a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// Record was new and has been inserted.
    Inserted,
    /// Record existed and was overwritten (replace requested).
    Replaced,
    /// Record exists and replace was not requested; nothing was written.
    ///
    /// This is a signal, not a failure: during convergence it means the
    /// item was already mirrored.
    DuplicateRecord,
}

/// One record write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
    pub record: Record,
    pub replace: bool,
}

/// A page worth of writes, applied in a single transaction.
///
/// The optional resume cursor is committed in the same transaction, so the
/// store always knows how far its own contents reach even if the checkpoint
/// file was not rewritten afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub upserts: Vec<Upsert>,
    pub resume_cursor: Option<i64>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert that must not overwrite an existing row.
    pub fn insert(&mut self, record: Record) {
        self.upserts.push(Upsert {
            record,
            replace: false,
        });
    }

    /// Queue a full overwrite.
    pub fn replace(&mut self, record: Record) {
        self.upserts.push(Upsert {
            record,
            replace: true,
        });
    }

    /// Set the resume cursor committed with this batch.
    pub fn with_cursor(mut self, cursor: i64) -> Self {
        self.resume_cursor = Some(cursor);
        self
    }

    pub fn len(&self) -> usize {
        self.upserts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
    }
}

/// Discriminator of the two record kinds sharing the `messages` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    Message = 0,
    ServiceEvent = 1,
}

impl HistoryKind {
    pub fn of(record: &Record) -> Option<Self> {
        match record {
            Record::Message(_) => Some(Self::Message),
            Record::ServiceEvent(_) => Some(Self::ServiceEvent),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            1 => Some(Self::ServiceEvent),
            _ => None,
        }
    }
}

/// Row predicate for counting and querying.
///
/// Every set field must hold. Message-only predicates (`kind`, `has_media`,
/// `media_kind`, `sender_id`) never match rows of other tables. Date bounds
/// apply to the message date and to the creation date of groups and
/// channels; senders have no date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub kind: Option<HistoryKind>,
    pub has_media: Option<bool>,
    pub media_kind: Option<u32>,
    pub sender_id: Option<i64>,
    /// Inclusive lower bound, Unix seconds.
    pub date_from: Option<i64>,
    /// Exclusive upper bound, Unix seconds.
    pub date_to: Option<i64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: HistoryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn has_media(mut self, has_media: bool) -> Self {
        self.has_media = Some(has_media);
        self
    }

    pub fn media_kind(mut self, media_kind: u32) -> Self {
        self.media_kind = Some(media_kind);
        self
    }

    pub fn sender(mut self, sender_id: i64) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn between(mut self, from: i64, to: i64) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    /// Whether no predicate is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Evaluate the predicate against a record.
    pub fn matches(&self, record: &Record) -> bool {
        let (kind, media_kind, sender_id) = match record {
            Record::Message(m) => (
                Some(HistoryKind::Message),
                m.media.as_ref().map(|p| p.kind),
                m.sender_id,
            ),
            Record::ServiceEvent(s) => (Some(HistoryKind::ServiceEvent), None, s.sender_id),
            _ => (None, None, None),
        };
        let is_history = kind.is_some();

        if let Some(want) = self.kind {
            if kind != Some(want) {
                return false;
            }
        }
        if let Some(want) = self.has_media {
            if !is_history || media_kind.is_some() != want {
                return false;
            }
        }
        if let Some(want) = self.media_kind {
            if media_kind != Some(want) {
                return false;
            }
        }
        if let Some(want) = self.sender_id {
            if !is_history || sender_id != Some(want) {
                return false;
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(date) = record.date() else {
                return false;
            };
            if self.date_from.is_some_and(|from| date < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| date >= to) {
                return false;
            }
        }
        true
    }
}

/// Result ordering for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    IdAsc,
    IdDesc,
    /// By date, ties broken by id. Records without a date sort as date 0.
    DateAsc,
    DateDesc,
}

impl Order {
    /// Compare two keys in this order.
    pub fn compare(self, a: &QueryKey, b: &QueryKey) -> Ordering {
        match self {
            Order::IdAsc => a.id.cmp(&b.id),
            Order::IdDesc => b.id.cmp(&a.id),
            Order::DateAsc => (a.date, a.id).cmp(&(b.date, b.id)),
            Order::DateDesc => (b.date, b.id).cmp(&(a.date, a.id)),
        }
    }
}

/// Keyset position of a record within an ordered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryKey {
    pub id: i64,
    pub date: i64,
}

impl QueryKey {
    pub fn of(record: &Record) -> Self {
        Self {
            id: record.id(),
            date: record.date().unwrap_or(0),
        }
    }
}

/// The RecordStore trait: async interface for record persistence.
///
/// All methods are async to support both blocking (SQLite) and async
/// backends. For SQLite, `spawn_blocking` is used internally to avoid
/// blocking the runtime.
///
/// # Design Notes
///
/// - **Dedup oracle**: `exists` is a primary-key lookup and is what the
///   sync engine consults before writing.
/// - **Duplicate inserts**: `upsert(record, false)` on an existing ID returns
///   `DuplicateRecord` and leaves the stored row unchanged.
/// - **Atomic batches**: `apply` commits all upserts and the resume cursor
///   together or not at all.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a single record.
    async fn upsert(&self, record: &Record, replace: bool) -> Result<UpsertResult>;

    /// Apply a batch atomically, returning one result per upsert in order.
    async fn apply(&self, batch: &WriteBatch) -> Result<Vec<UpsertResult>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Check if a record with this ID exists in the table.
    async fn exists(&self, id: i64, table: Table) -> Result<bool>;

    /// The subset of `ids` already present in the table, in one lookup.
    async fn existing_ids(&self, ids: &[i64], table: Table) -> Result<BTreeSet<i64>>;

    /// Get a record by ID.
    async fn get(&self, id: i64, table: Table) -> Result<Option<Record>>;

    /// Count rows, optionally filtered.
    async fn count(&self, table: Table, filter: Option<&Filter>) -> Result<u64>;

    /// Fetch one ordered page strictly after `after` (keyset pagination).
    async fn query_page(
        &self,
        table: Table,
        filter: Option<&Filter>,
        order: Order,
        after: Option<QueryKey>,
        limit: usize,
    ) -> Result<Vec<Record>>;

    /// Smallest ID in the table.
    async fn min_id(&self, table: Table) -> Result<Option<i64>>;

    /// Largest ID in the table.
    async fn max_id(&self, table: Table) -> Result<Option<i64>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sync bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// The resume cursor committed with the most recent batch, if any.
    async fn committed_cursor(&self) -> Result<Option<i64>>;
}

/// Default number of records fetched per cursor round trip.
pub const DEFAULT_QUERY_BATCH: usize = 256;

/// A lazy, ordered sequence of records.
///
/// Each call to [`RecordStoreExt::query`] creates a fresh cursor that pulls
/// pages from the store on demand.
pub struct RecordCursor<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    table: Table,
    filter: Option<Filter>,
    order: Order,
    after: Option<QueryKey>,
    buffer: VecDeque<Record>,
    batch_size: usize,
    exhausted: bool,
}

impl<'a, S: RecordStore + ?Sized> RecordCursor<'a, S> {
    fn new(store: &'a S, table: Table, filter: Option<Filter>, order: Order) -> Self {
        Self {
            store,
            table,
            filter,
            order,
            after: None,
            buffer: VecDeque::new(),
            batch_size: DEFAULT_QUERY_BATCH,
            exhausted: false,
        }
    }

    /// Change how many records are fetched per round trip.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Next record, or `None` once the sequence is exhausted.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .store
                .query_page(
                    self.table,
                    self.filter.as_ref(),
                    self.order,
                    self.after,
                    self.batch_size,
                )
                .await?;

            if page.len() < self.batch_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.after = Some(QueryKey::of(last));
            }
            self.buffer.extend(page);
        }
        Ok(self.buffer.pop_front())
    }

    /// Drain the remaining records.
    pub async fn collect_all(mut self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await? {
            out.push(record);
        }
        Ok(out)
    }
}

/// Extension trait for common store patterns.
pub trait RecordStoreExt: RecordStore {
    /// Start a lazy ordered query.
    fn query(&self, table: Table, filter: Option<Filter>, order: Order) -> RecordCursor<'_, Self> {
        RecordCursor::new(self, table, filter, order)
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}
