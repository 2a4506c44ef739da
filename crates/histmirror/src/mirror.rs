//! The Mirror: manages background sync workers, one per conversation.
//!
//! Each started conversation gets a tokio task that exclusively owns its
//! storage for the duration of the run. The Mirror only signals the task
//! (stop), observes it (status, subscribe) and collects its report (wait).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use histmirror_core::ConversationId;
use histmirror_store::{
    Checkpoint, CheckpointStore, ConversationStorage, SqliteStore, CHECKPOINT_FILE, RECORDS_FILE,
};
use histmirror_sync::{HistorySource, SyncConfig, SyncEngine, SyncReport};

use crate::error::{MirrorError, Result};

/// Configuration for the Mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Directory holding one subdirectory per conversation.
    pub root: PathBuf,
    /// Sync configuration.
    pub sync: SyncConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("histmirror"),
            sync: SyncConfig::default(),
        }
    }
}

type WorkerResult = histmirror_sync::Result<SyncReport>;

/// A started (possibly finished) background run.
struct Worker {
    cancel: CancellationToken,
    progress: watch::Receiver<Checkpoint>,
    handle: JoinHandle<WorkerResult>,
}

impl Worker {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Mirrors conversations from a history source into local storage.
///
/// Provides a unified API for:
/// - Starting and stopping background runs
/// - Reading and observing progress
/// - Collecting run reports
/// - Managing stored conversations
pub struct Mirror<H: HistorySource + ?Sized + 'static> {
    config: MirrorConfig,
    source: Arc<H>,
    workers: Mutex<HashMap<ConversationId, Worker>>,
}

impl<H: HistorySource + ?Sized + 'static> Mirror<H> {
    /// Create a new mirror.
    pub fn new(source: Arc<H>, config: MirrorConfig) -> Self {
        Self {
            config,
            source,
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Directory holding a conversation's files.
    pub fn conversation_dir(&self, conversation: ConversationId) -> PathBuf {
        ConversationStorage::dir_for(&self.config.root, conversation)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Worker Control
    // ─────────────────────────────────────────────────────────────────────────

    /// Start mirroring a conversation in the background.
    ///
    /// Fails with `AlreadyRunning` while a previous run is still active. A
    /// finished run that was never waited for is collected and its outcome
    /// logged before the new run starts.
    pub async fn start(&self, conversation: ConversationId) -> Result<()> {
        let mut workers = self.workers.lock().await;
        if workers.get(&conversation).is_some_and(Worker::is_running) {
            return Err(MirrorError::AlreadyRunning(conversation));
        }
        if let Some(previous) = workers.remove(&conversation) {
            log_unwaited(conversation, previous.handle.await);
        }

        let storage = ConversationStorage::open(&self.config.root, conversation)?;
        let (store, checkpoints) = storage.into_parts();
        let progress = checkpoints.subscribe();

        let engine = SyncEngine::new(
            conversation,
            store,
            checkpoints,
            Arc::clone(&self.source),
            self.config.sync.clone(),
        );
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let span = tracing::info_span!("worker", conversation = %conversation);
        let handle = tokio::spawn(
            async move {
                let result = engine.run(&token).await;
                let (store, _) = engine.into_parts();
                if let Err(e) = store.close() {
                    warn!(error = %e, "failed to close record store");
                }
                result
            }
            .instrument(span),
        );

        info!(conversation = %conversation, "mirror started");
        workers.insert(
            conversation,
            Worker {
                cancel,
                progress,
                handle,
            },
        );
        Ok(())
    }

    /// Ask a running worker to stop after its current page.
    pub async fn stop(&self, conversation: ConversationId) -> Result<()> {
        let workers = self.workers.lock().await;
        match workers.get(&conversation) {
            Some(worker) if worker.is_running() => {
                worker.cancel.cancel();
                info!(conversation = %conversation, "stop requested");
                Ok(())
            }
            _ => Err(MirrorError::NotRunning(conversation)),
        }
    }

    /// Whether a worker is currently running for the conversation.
    pub async fn is_running(&self, conversation: ConversationId) -> bool {
        self.workers
            .lock()
            .await
            .get(&conversation)
            .is_some_and(Worker::is_running)
    }

    /// Wait for the conversation's worker to finish and collect its report.
    pub async fn wait(&self, conversation: ConversationId) -> Result<SyncReport> {
        let worker = self
            .workers
            .lock()
            .await
            .remove(&conversation)
            .ok_or(MirrorError::NotRunning(conversation))?;

        match worker.handle.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(MirrorError::WorkerPanicked {
                conversation,
                message: e.to_string(),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Progress
    // ─────────────────────────────────────────────────────────────────────────

    /// The last persisted checkpoint.
    ///
    /// Served from the live worker when there is one, from disk otherwise.
    pub async fn status(&self, conversation: ConversationId) -> Result<Checkpoint> {
        if let Some(worker) = self.workers.lock().await.get(&conversation) {
            return Ok(worker.progress.borrow().clone());
        }
        let checkpoints = CheckpointStore::open(self.checkpoint_path(conversation))?;
        Ok(checkpoints.load()?)
    }

    /// Observe every checkpoint the conversation's worker persists.
    pub async fn subscribe(
        &self,
        conversation: ConversationId,
    ) -> Result<watch::Receiver<Checkpoint>> {
        self.workers
            .lock()
            .await
            .get(&conversation)
            .map(|worker| worker.progress.clone())
            .ok_or(MirrorError::NotRunning(conversation))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stored Conversations
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask the source for the conversation size and store it in the checkpoint.
    pub async fn refresh_total(&self, conversation: ConversationId) -> Result<Option<u64>> {
        let workers = self.workers.lock().await;
        self.ensure_idle(&workers, conversation)?;

        let storage = ConversationStorage::open(&self.config.root, conversation)?;
        let (store, checkpoints) = storage.into_parts();
        let engine = SyncEngine::new(
            conversation,
            store,
            checkpoints,
            Arc::clone(&self.source),
            self.config.sync.clone(),
        );

        let total = engine.refresh_total().await;
        let (store, _) = engine.into_parts();
        store.close()?;
        Ok(total?)
    }

    /// Record the display name of a conversation in its checkpoint.
    pub async fn set_conversation_name(
        &self,
        conversation: ConversationId,
        name: impl Into<String>,
    ) -> Result<()> {
        let workers = self.workers.lock().await;
        self.ensure_idle(&workers, conversation)?;

        let checkpoints = CheckpointStore::open(self.checkpoint_path(conversation))?;
        let mut checkpoint = checkpoints.load()?;
        checkpoint.conversation_name = Some(name.into());
        checkpoints.save(&checkpoint)?;
        Ok(())
    }

    /// Open the conversation's record store for reading (exporters, search).
    ///
    /// Fails with `NotStored` if the conversation was never mirrored; no
    /// storage is created.
    pub fn open_store(&self, conversation: ConversationId) -> Result<SqliteStore> {
        let path = self.conversation_dir(conversation).join(RECORDS_FILE);
        if !path.is_file() {
            return Err(MirrorError::NotStored(conversation));
        }
        Ok(SqliteStore::open(path)?)
    }

    /// Conversations with a storage directory under the root.
    pub fn stored_conversations(&self) -> Result<Vec<ConversationId>> {
        let entries = match std::fs::read_dir(&self.config.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut conversations = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                conversations.push(id);
            }
        }
        conversations.sort();
        Ok(conversations)
    }

    /// Remove everything stored for a conversation.
    ///
    /// Refused while its worker is running.
    pub async fn delete(&self, conversation: ConversationId) -> Result<()> {
        let mut workers = self.workers.lock().await;
        self.ensure_idle(&workers, conversation)?;
        workers.remove(&conversation);

        let dir = self.conversation_dir(conversation);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(conversation = %conversation, "conversation deleted");
        Ok(())
    }

    fn checkpoint_path(&self, conversation: ConversationId) -> PathBuf {
        self.conversation_dir(conversation).join(CHECKPOINT_FILE)
    }

    fn ensure_idle(
        &self,
        workers: &HashMap<ConversationId, Worker>,
        conversation: ConversationId,
    ) -> Result<()> {
        if workers.get(&conversation).is_some_and(Worker::is_running) {
            return Err(MirrorError::AlreadyRunning(conversation));
        }
        Ok(())
    }
}

/// Log the outcome of a finished run that nobody waited for.
fn log_unwaited(
    conversation: ConversationId,
    outcome: std::result::Result<WorkerResult, JoinError>,
) {
    match outcome {
        Ok(Ok(report)) => info!(
            conversation = %conversation,
            outcome = ?report.outcome,
            saved = report.saved,
            "discarding report of unwaited run"
        ),
        Ok(Err(e)) => warn!(
            conversation = %conversation,
            error = %e,
            "discarding failure of unwaited run"
        ),
        Err(e) => warn!(
            conversation = %conversation,
            error = %e,
            "previous worker panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use histmirror_core::Message;
    use histmirror_store::RecordStore;
    use histmirror_sync::{MemorySource, SyncOutcome};

    const CONV: ConversationId = ConversationId(5);

    fn setup(items: i64, delay: Duration) -> (tempfile::TempDir, Arc<MemorySource>, Mirror<MemorySource>) {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new());
        source.insert(CONV, (1..=items).map(|id| Message::new(id, id).into()));

        let config = MirrorConfig {
            root: dir.path().to_path_buf(),
            sync: SyncConfig {
                chunk_size: 10,
                delay,
                ..SyncConfig::default()
            },
        };
        let mirror = Mirror::new(Arc::clone(&source), config);
        (dir, source, mirror)
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let (_dir, _source, mirror) = setup(35, Duration::ZERO);

        mirror.start(CONV).await.unwrap();
        let report = mirror.wait(CONV).await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::Completed);
        assert_eq!(report.saved, 35);
        assert!(!mirror.is_running(CONV).await);

        let status = mirror.status(CONV).await.unwrap();
        assert_eq!(status.saved_count, 35);
        assert_eq!(status.resume_cursor, 1);

        let store = mirror.open_store(CONV).unwrap();
        assert_eq!(store.max_id(histmirror_core::Table::Messages).await.unwrap(), Some(35));
    }

    #[tokio::test]
    async fn test_second_start_while_running_is_refused() {
        let (_dir, _source, mirror) = setup(50, Duration::from_secs(30));

        mirror.start(CONV).await.unwrap();
        let mut rx = mirror.subscribe(CONV).await.unwrap();
        rx.wait_for(|c| c.saved_count == 10).await.unwrap();

        let err = mirror.start(CONV).await.unwrap_err();
        assert!(matches!(err, MirrorError::AlreadyRunning(c) if c == CONV));
        assert!(matches!(
            mirror.delete(CONV).await.unwrap_err(),
            MirrorError::AlreadyRunning(_)
        ));

        mirror.stop(CONV).await.unwrap();
        let report = mirror.wait(CONV).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Cancelled);
        assert_eq!(report.saved, 10);
        assert_eq!(report.checkpoint.resume_cursor, 41);
    }

    #[tokio::test]
    async fn test_restart_collects_unwaited_failure() {
        let (_dir, source, mirror) = setup(1, Duration::ZERO);
        let late = ConversationId(6);

        // Unknown to the source: the run aborts and nobody waits for it.
        mirror.start(late).await.unwrap();
        while mirror.is_running(late).await {
            tokio::task::yield_now().await;
        }

        source.insert(late, (1..=12).map(|id| Message::new(id, id).into()));
        mirror.start(late).await.unwrap();
        let report = mirror.wait(late).await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::Completed);
        assert_eq!(report.saved, 12);
        assert!(matches!(mirror.wait(late).await.unwrap_err(), MirrorError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_open_store_does_not_create_storage() {
        let (dir, _source, mirror) = setup(1, Duration::ZERO);
        let unknown = ConversationId(99);

        assert!(matches!(
            mirror.open_store(unknown).unwrap_err(),
            MirrorError::NotStored(c) if c == unknown
        ));
        assert!(!dir.path().join("99").exists());
        assert!(mirror.stored_conversations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_observes_progress() {
        let (_dir, _source, mirror) = setup(30, Duration::ZERO);

        mirror.start(CONV).await.unwrap();
        let rx = mirror.subscribe(CONV).await.unwrap();
        mirror.wait(CONV).await.unwrap();

        assert_eq!(rx.borrow().saved_count, 30);
        assert!(matches!(
            mirror.subscribe(CONV).await.unwrap_err(),
            MirrorError::NotRunning(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_and_wait_without_worker() {
        let (_dir, _source, mirror) = setup(1, Duration::ZERO);
        assert!(matches!(mirror.stop(CONV).await.unwrap_err(), MirrorError::NotRunning(_)));
        assert!(matches!(mirror.wait(CONV).await.unwrap_err(), MirrorError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_status_of_unknown_conversation_is_default() {
        let (_dir, _source, mirror) = setup(1, Duration::ZERO);
        assert_eq!(mirror.status(ConversationId(99)).await.unwrap(), Checkpoint::default());
    }

    #[tokio::test]
    async fn test_name_total_and_delete() {
        let (dir, _source, mirror) = setup(12, Duration::ZERO);

        mirror.set_conversation_name(CONV, "Book club").await.unwrap();
        assert_eq!(mirror.refresh_total(CONV).await.unwrap(), Some(12));

        let status = mirror.status(CONV).await.unwrap();
        assert_eq!(status.conversation_name.as_deref(), Some("Book club"));
        assert_eq!(status.total_count, Some(12));
        assert_eq!(mirror.stored_conversations().unwrap(), vec![CONV]);

        mirror.delete(CONV).await.unwrap();
        assert!(!dir.path().join("5").exists());
        assert!(mirror.stored_conversations().unwrap().is_empty());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: MirrorConfig =
            serde_json::from_str(r#"{"root": "/tmp/mirror", "sync": {"chunk_size": 50}}"#).unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/mirror"));
        assert_eq!(config.sync.chunk_size, 50);
        assert_eq!(config.sync.max_transient_retries, Some(8));
    }
}
