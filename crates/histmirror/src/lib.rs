//! # histmirror
//!
//! Incremental mirroring of a remote, paginated message history into local
//! durable storage.
//!
//! ## Overview
//!
//! Repeated runs converge to a complete, deduplicated copy of each
//! conversation without re-downloading what is already saved and without
//! losing progress when interrupted:
//!
//! - **Records**: messages, service events, senders, groups and channels
//! - **Store**: one SQLite database per conversation, queryable by exporters
//! - **Checkpoint**: resumable progress with counts and a time estimate
//! - **Mirror**: background workers, one per conversation, with stop/status
//!
//! ## Key Concepts
//!
//! - **Cursor**: an item ID; pages hold items older than it
//! - **Tail pass**: walking from the cursor down to the oldest item
//! - **Head pass**: walking from the newest item down to known history
//! - **Convergence**: a page touched an item that is already stored
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use histmirror::{ConversationId, MemorySource, Mirror, MirrorConfig};
//!
//! async fn example() {
//!     // Any HistorySource works; MemorySource is the in-process one.
//!     let source = Arc::new(MemorySource::new());
//!     let mirror = Mirror::new(source, MirrorConfig::default());
//!
//!     let conversation = ConversationId(42);
//!     mirror.start(conversation).await.unwrap();
//!
//!     let mut progress = mirror.subscribe(conversation).await.unwrap();
//!     while progress.changed().await.is_ok() {
//!         let checkpoint = progress.borrow().clone();
//!         println!("{} saved, {} left", checkpoint.saved_count, checkpoint.estimated_time_left);
//!     }
//!
//!     let report = mirror.wait(conversation).await.unwrap();
//!     println!("{:?}: {} new items", report.outcome, report.saved);
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `histmirror::core` - Record types, codecs, validation
//! - `histmirror::store` - Record store, checkpoint, SQLite
//! - `histmirror::sync` - Sync engine and history sources

pub mod error;
pub mod mirror;

// Re-export component crates
pub use histmirror_core as core;
pub use histmirror_store as store;
pub use histmirror_sync as sync;

// Re-export main types for convenience
pub use error::{MirrorError, Result};
pub use mirror::{Mirror, MirrorConfig};

// Re-export commonly used types
pub use histmirror_core::{
    Channel, ConversationId, Group, Message, Payload, Record, Sender, ServiceEvent, Table,
};
pub use histmirror_store::{Checkpoint, Filter, Order, RecordStore, RecordStoreExt, SqliteStore};
pub use histmirror_sync::{
    HistorySource, MemorySource, Page, SourceError, SyncConfig, SyncOutcome, SyncReport,
};
