//! Per-conversation storage: the record database and its checkpoint.

use std::path::{Path, PathBuf};

use histmirror_core::ConversationId;

use crate::checkpoint::CheckpointStore;
use crate::error::Result;
use crate::sqlite::SqliteStore;

/// File name of the record database inside a conversation directory.
pub const RECORDS_FILE: &str = "records.sqlite3";

/// File name of the checkpoint inside a conversation directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Everything stored for one conversation, held open for a run.
///
/// Owns `root/<conversation>/records.sqlite3` and
/// `root/<conversation>/checkpoint.json`. Both are released when this value
/// is dropped or closed.
pub struct ConversationStorage {
    conversation: ConversationId,
    dir: PathBuf,
    records: SqliteStore,
    checkpoints: CheckpointStore,
}

impl ConversationStorage {
    /// Open (creating if needed) the storage of `conversation` under `root`.
    pub fn open(root: impl AsRef<Path>, conversation: ConversationId) -> Result<Self> {
        let dir = Self::dir_for(root, conversation);
        std::fs::create_dir_all(&dir)?;

        let records = SqliteStore::open(dir.join(RECORDS_FILE))?;
        let checkpoints = CheckpointStore::open(dir.join(CHECKPOINT_FILE))?;

        Ok(Self {
            conversation,
            dir,
            records,
            checkpoints,
        })
    }

    /// Directory holding a conversation's files.
    pub fn dir_for(root: impl AsRef<Path>, conversation: ConversationId) -> PathBuf {
        root.as_ref().join(conversation.to_string())
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn records(&self) -> &SqliteStore {
        &self.records
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Split into the record store and checkpoint store.
    pub fn into_parts(self) -> (SqliteStore, CheckpointStore) {
        (self.records, self.checkpoints)
    }

    /// Release both handles, surfacing database close errors.
    pub fn close(self) -> Result<()> {
        self.records.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::traits::RecordStore;
    use histmirror_core::{Message, Table};

    #[tokio::test]
    async fn test_layout_on_disk() {
        let root = tempfile::tempdir().unwrap();
        let conversation = ConversationId(42);

        let storage = ConversationStorage::open(root.path(), conversation).unwrap();
        assert_eq!(storage.dir(), root.path().join("42"));
        assert_eq!(storage.conversation(), conversation);

        storage
            .records()
            .upsert(&Message::new(1, 10).into(), false)
            .await
            .unwrap();
        storage
            .checkpoints()
            .save(&Checkpoint {
                resume_cursor: 1,
                saved_count: 1,
                ..Checkpoint::default()
            })
            .unwrap();
        storage.close().unwrap();

        assert!(root.path().join("42").join(RECORDS_FILE).exists());
        assert!(root.path().join("42").join(CHECKPOINT_FILE).exists());

        let storage = ConversationStorage::open(root.path(), conversation).unwrap();
        assert!(storage.records().exists(1, Table::Messages).await.unwrap());
        assert_eq!(storage.checkpoints().current().resume_cursor, 1);
    }

    #[test]
    fn test_conversations_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let a = ConversationStorage::open(root.path(), ConversationId(1)).unwrap();
        let b = ConversationStorage::open(root.path(), ConversationId(-100)).unwrap();
        assert_ne!(a.dir(), b.dir());
        assert!(b.dir().ends_with("-100"));
    }
}
