//! # histmirror Sync
//!
//! Resumable, convergent mirroring of a paginated message history.
//!
//! ## Overview
//!
//! The [`SyncEngine`] pulls pages from a [`HistorySource`], newest to
//! oldest, and merges every item it has not stored yet into a
//! [`RecordStore`](histmirror_store::RecordStore). Progress is committed
//! after every page, so a run can stop at any point and the next one picks up
//! where it left off.
//!
//! ## Key Properties
//!
//! - **Idempotent**: a run with nothing new to fetch writes nothing
//! - **Resumable**: interrupted runs lose at most the page in flight
//! - **Convergent**: both the older tail and the newer head of history are
//!   closed, detected purely by record existence
//! - **Patient**: transient source failures are retried with bounded backoff
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use histmirror_core::ConversationId;
//! use histmirror_store::{CheckpointStore, MemoryStore};
//! use histmirror_sync::{MemorySource, SyncConfig, SyncEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() {
//!     let source = Arc::new(MemorySource::new());
//!     let engine = SyncEngine::new(
//!         ConversationId(42),
//!         MemoryStore::new(),
//!         CheckpointStore::in_memory(),
//!         source,
//!         SyncConfig::default(),
//!     );
//!
//!     let report = engine.run(&CancellationToken::new()).await.unwrap();
//!     println!("saved {} new items", report.saved);
//! }
//! ```
//!
//! ## Page Flow
//!
//! ```text
//! cursor = checkpoint.resume_cursor
//!   |-- fetch(cursor) -----> items older than cursor, newest first
//!   |-- exists(item)? -----> stop walking the page (converged)
//!   |-- apply(batch) ------> records + cursor, one transaction
//!   |-- save(checkpoint) --> file + watch channel
//!   '-- sleep(delay), repeat
//! ```

pub mod convergence;
pub mod engine;
pub mod error;
pub mod eta;
pub mod source;

pub use convergence::{compute_store_digest, verify_convergence, ConvergenceResult, StoreDigest};
pub use engine::{SyncConfig, SyncEngine, SyncOutcome, SyncReport};
pub use error::{Result, SourceError, SyncError};
pub use eta::{format_hms, EtaEstimator};
pub use source::{memory::MemorySource, HistorySource, Page};
