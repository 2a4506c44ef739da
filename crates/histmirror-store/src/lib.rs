//! # histmirror Store
//!
//! Durable, queryable persistence for a mirrored conversation. Provides a
//! trait-based record store with SQLite and in-memory implementations, plus
//! the checkpoint file that records synchronization progress.
//!
//! ## Overview
//!
//! The [`RecordStore`] trait abstracts record storage so the sync engine is
//! storage-agnostic. The primary implementation is [`SqliteStore`], with
//! [`MemoryStore`] for testing. [`CheckpointStore`] keeps the human-readable
//! progress record next to the database, and [`ConversationStorage`] opens
//! both for one conversation and owns them for the duration of a run.
//!
//! ## Key Types
//!
//! - [`RecordStore`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`UpsertResult`] - Outcome of writing one record
//! - [`WriteBatch`] - One page worth of writes, committed atomically
//! - [`Filter`] / [`Order`] / [`RecordCursor`] - Counting and lazy ordered queries
//! - [`Checkpoint`] / [`CheckpointStore`] - Synchronization progress
//!
//! ## Usage
//!
//! ```rust,no_run
//! use histmirror_core::{Message, Record, Table};
//! use histmirror_store::{RecordStore, SqliteStore, UpsertResult};
//!
//! async fn example() {
//!     let store = SqliteStore::open("mirror/42/records.sqlite3").unwrap();
//!
//!     let record = Record::from(Message::new(1, 1_700_000_000).with_text("hi"));
//!     let first = store.upsert(&record, false).await.unwrap();
//!     let second = store.upsert(&record, false).await.unwrap();
//!     assert_eq!(first, UpsertResult::Inserted);
//!     assert_eq!(second, UpsertResult::DuplicateRecord);
//!     assert!(store.exists(1, Table::Messages).await.unwrap());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Duplicate inserts**: inserting an existing ID without replace returns
//!   `DuplicateRecord` and leaves the row untouched
//! - **Replace upserts**: mutable profiles (senders, groups, channels) are
//!   always overwritten in full
//! - **Atomic pages**: a [`WriteBatch`] and its resume cursor commit together
//! - **Versioned formats**: a newer schema or checkpoint format is refused

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod storage;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointStore, CHECKPOINT_FORMAT_VERSION, UNKNOWN_ETA};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use storage::{ConversationStorage, CHECKPOINT_FILE, RECORDS_FILE};
pub use traits::{
    Filter, HistoryKind, Order, QueryKey, RecordCursor, RecordStore, RecordStoreExt, Upsert,
    UpsertResult, WriteBatch, DEFAULT_QUERY_BATCH,
};
