//! Test fixtures and helpers.
//!
//! Common setup code for engine and mirror tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use histmirror_core::{ConversationId, Message, Record, Sender, Table};
use histmirror_store::{
    CheckpointStore, ConversationStorage, MemoryStore, Order, RecordStore, RecordStoreExt,
    WriteBatch,
};
use histmirror_sync::{HistorySource, MemorySource, Page, SourceError, SyncConfig, SyncEngine};

/// Conversation used by single-conversation tests.
pub const CONVERSATION: ConversationId = ConversationId(1);

/// Sender referenced by every fixture message.
pub const AUTHOR: i64 = 7;

/// A message with a date derived from its ID, authored by [`AUTHOR`].
pub fn message(id: i64) -> Record {
    Message::new(id, 1_700_000_000 + id)
        .with_sender(AUTHOR)
        .with_text(format!("message {id}"))
        .into()
}

/// The author of fixture messages.
pub fn author() -> Record {
    Sender::new(AUTHOR).with_name("Ann", Some("Lee")).into()
}

/// Messages for every ID, plus their author.
pub fn history(ids: impl IntoIterator<Item = i64>) -> Vec<Record> {
    ids.into_iter().map(message).chain([author()]).collect()
}

/// A memory source holding the given history for [`CONVERSATION`].
pub fn source_with(ids: impl IntoIterator<Item = i64>) -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    source.insert(CONVERSATION, history(ids));
    source
}

/// Sync settings without pauses, with a small retry budget.
pub fn fast_config(chunk_size: usize) -> SyncConfig {
    SyncConfig {
        chunk_size,
        delay: Duration::ZERO,
        max_transient_retries: Some(3),
        max_backoff: Duration::ZERO,
    }
}

/// An engine over fresh in-memory storage.
pub fn memory_engine<H: HistorySource>(
    source: H,
    chunk_size: usize,
) -> SyncEngine<MemoryStore, H> {
    SyncEngine::new(
        CONVERSATION,
        MemoryStore::new(),
        CheckpointStore::in_memory(),
        source,
        fast_config(chunk_size),
    )
}

/// Write messages and a committed cursor straight into a store.
pub async fn seed_store<R: RecordStore>(
    store: &R,
    ids: impl IntoIterator<Item = i64>,
    cursor: i64,
) -> histmirror_store::Result<()> {
    let mut batch = WriteBatch::new();
    for record in history(ids) {
        batch.insert(record);
    }
    store.apply(&batch.with_cursor(cursor)).await?;
    Ok(())
}

/// Stored message IDs, oldest first.
pub async fn stored_ids<R: RecordStore>(store: &R) -> Vec<i64> {
    store
        .query(Table::Messages, None, Order::IdAsc)
        .collect_all()
        .await
        .expect("query failed")
        .iter()
        .map(Record::id)
        .collect()
}

/// A temporary mirror root with helpers for on-disk storage.
pub struct TestFixture {
    pub dir: TempDir,
    pub conversation: ConversationId,
}

impl TestFixture {
    /// Create a fixture in a fresh temporary directory.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
            conversation: CONVERSATION,
        }
    }

    /// The mirror root.
    pub fn root(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Open (creating if needed) the conversation's storage.
    pub fn storage(&self) -> ConversationStorage {
        ConversationStorage::open(self.root(), self.conversation)
            .expect("failed to open conversation storage")
    }

    /// An engine over the conversation's on-disk storage.
    pub fn engine<H: HistorySource>(
        &self,
        source: H,
        chunk_size: usize,
    ) -> SyncEngine<histmirror_store::SqliteStore, H> {
        let (records, checkpoints) = self.storage().into_parts();
        SyncEngine::new(
            self.conversation,
            records,
            checkpoints,
            source,
            fast_config(chunk_size),
        )
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A source that requests a stop once it has served `after` fetches.
///
/// The page of the last fetch is still returned, so the engine merges it
/// before noticing the stop.
pub struct CancelAfter<H> {
    inner: H,
    after: u64,
    served: AtomicU64,
    cancel: CancellationToken,
}

impl<H: HistorySource> CancelAfter<H> {
    pub fn new(inner: H, after: u64, cancel: CancellationToken) -> Self {
        Self {
            inner,
            after,
            served: AtomicU64::new(0),
            cancel,
        }
    }
}

#[async_trait]
impl<H: HistorySource> HistorySource for CancelAfter<H> {
    async fn fetch(
        &self,
        conversation: ConversationId,
        cursor: i64,
        limit: usize,
    ) -> Result<Page, SourceError> {
        let page = self.inner.fetch(conversation, cursor, limit).await;
        if self.served.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.cancel.cancel();
        }
        page
    }

    async fn total_count(&self, conversation: ConversationId) -> Result<Option<u64>, SourceError> {
        self.inner.total_count(conversation).await
    }
}

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_fixture_serves_newest_first() {
        let source = source_with(1..=5);
        let page = source.fetch(CONVERSATION, 0, 3).await.unwrap();

        let ids: Vec<i64> = page.items.iter().map(Record::id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert_eq!(page.senders, vec![author()]);
    }

    #[tokio::test]
    async fn test_seed_store() {
        let store = MemoryStore::new();
        seed_store(&store, 10..=12, 10).await.unwrap();

        assert_eq!(stored_ids(&store).await, vec![10, 11, 12]);
        assert_eq!(store.committed_cursor().await.unwrap(), Some(10));
        assert_eq!(store.count(Table::Senders, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after() {
        let cancel = CancellationToken::new();
        let source = CancelAfter::new(source_with(1..=5), 2, cancel.clone());

        source.fetch(CONVERSATION, 0, 1).await.unwrap();
        assert!(!cancel.is_cancelled());
        let page = source.fetch(CONVERSATION, 5, 1).await.unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(page.items[0].id(), 4);
    }

    #[test]
    fn test_fixture_storage_layout() {
        let fixture = TestFixture::new();
        let storage = fixture.storage();
        assert!(storage.dir().starts_with(fixture.root()));
    }
}
