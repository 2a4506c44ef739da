//! In-memory implementation of the RecordStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use histmirror_core::{Record, Table};

use crate::error::{Result, StoreError};
use crate::traits::{Filter, Order, QueryKey, RecordStore, UpsertResult, WriteBatch};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    fail_writes: AtomicBool,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// One ID-ordered map per table.
    tables: BTreeMap<Table, BTreeMap<i64, Record>>,

    /// Cursor committed with the last batch that carried one.
    resume_cursor: Option<i64>,
}

impl MemoryStoreInner {
    fn table(&self, table: Table) -> impl Iterator<Item = &Record> {
        self.tables.get(&table).into_iter().flat_map(|rows| rows.values())
    }

    fn write(&mut self, record: &Record, replace: bool) -> UpsertResult {
        let rows = self.tables.entry(record.table()).or_default();
        match rows.get(&record.id()) {
            Some(_) if !replace => UpsertResult::DuplicateRecord,
            Some(_) => {
                rows.insert(record.id(), record.clone());
                UpsertResult::Replaced
            }
            None => {
                rows.insert(record.id(), record.clone());
                UpsertResult::Inserted
            }
        }
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with a storage error.
    ///
    /// Testing aid for the abort path of the sync engine.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::InvalidData("writes disabled".into()));
        }
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, record: &Record, replace: bool) -> Result<UpsertResult> {
        let mut inner = self.write()?;
        Ok(inner.write(record, replace))
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<Vec<UpsertResult>> {
        // Holding the write lock for the whole batch makes it atomic to readers.
        let mut inner = self.write()?;

        let results = batch
            .upserts
            .iter()
            .map(|u| inner.write(&u.record, u.replace))
            .collect();
        if let Some(cursor) = batch.resume_cursor {
            inner.resume_cursor = Some(cursor);
        }

        Ok(results)
    }

    async fn exists(&self, id: i64, table: Table) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner
            .tables
            .get(&table)
            .is_some_and(|rows| rows.contains_key(&id)))
    }

    async fn existing_ids(&self, ids: &[i64], table: Table) -> Result<BTreeSet<i64>> {
        let inner = self.read()?;
        Ok(match inner.tables.get(&table) {
            Some(rows) => ids.iter().copied().filter(|id| rows.contains_key(id)).collect(),
            None => BTreeSet::new(),
        })
    }

    async fn get(&self, id: i64, table: Table) -> Result<Option<Record>> {
        let inner = self.read()?;
        Ok(inner.tables.get(&table).and_then(|rows| rows.get(&id)).cloned())
    }

    async fn count(&self, table: Table, filter: Option<&Filter>) -> Result<u64> {
        let inner = self.read()?;
        let count = inner
            .table(table)
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .count();
        Ok(count as u64)
    }

    async fn query_page(
        &self,
        table: Table,
        filter: Option<&Filter>,
        order: Order,
        after: Option<QueryKey>,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let inner = self.read()?;

        let mut rows: Vec<&Record> = inner
            .table(table)
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .filter(|r| {
                after.map_or(true, |key| {
                    order.compare(&QueryKey::of(r), &key) == std::cmp::Ordering::Greater
                })
            })
            .collect();
        rows.sort_by(|a, b| order.compare(&QueryKey::of(a), &QueryKey::of(b)));

        Ok(rows.into_iter().take(limit).cloned().collect())
    }

    async fn min_id(&self, table: Table) -> Result<Option<i64>> {
        let inner = self.read()?;
        Ok(inner
            .tables
            .get(&table)
            .and_then(|rows| rows.keys().next().copied()))
    }

    async fn max_id(&self, table: Table) -> Result<Option<i64>> {
        let inner = self.read()?;
        Ok(inner
            .tables
            .get(&table)
            .and_then(|rows| rows.keys().next_back().copied()))
    }

    async fn committed_cursor(&self) -> Result<Option<i64>> {
        let inner = self.read()?;
        Ok(inner.resume_cursor)
    }
}
