//! Synchronization progress, persisted as a small JSON file.
//!
//! The checkpoint is what a user looks at ("12 400 of 15 000, about 0:04:10
//! left") and where the next run resumes. It is rewritten after every merged
//! page and published on a watch channel so observers see each change.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Result, StoreError};

/// Version of the checkpoint file layout this build reads and writes.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// ETA text when no estimate is available.
pub const UNKNOWN_ETA: &str = "unknown";

/// Progress of one conversation's mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// ID of the oldest item saved by the current pass; 0 = start from newest.
    pub resume_cursor: i64,
    /// Items stored so far.
    pub saved_count: u64,
    /// Total history size as last reported by the source.
    pub total_count: Option<u64>,
    /// Human-readable remaining time, `H:MM:SS` or `unknown`.
    pub estimated_time_left: String,
    pub format_version: u32,
    #[serde(default)]
    pub conversation_name: Option<String>,
    /// Unix seconds of the last run that stored new items.
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            resume_cursor: 0,
            saved_count: 0,
            total_count: None,
            estimated_time_left: UNKNOWN_ETA.to_string(),
            format_version: CHECKPOINT_FORMAT_VERSION,
            conversation_name: None,
            updated_at: None,
        }
    }
}

impl Checkpoint {
    /// Fraction saved, when the total is known and non-zero.
    pub fn progress(&self) -> Option<f64> {
        match self.total_count {
            Some(total) if total > 0 => Some((self.saved_count as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }

    /// Whether every item the source reported has been saved.
    pub fn is_complete(&self) -> bool {
        self.total_count
            .is_some_and(|total| self.saved_count >= total)
    }
}

/// Only the version field, read before trusting the rest of the file.
#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    format_version: u32,
}

/// Loads, saves and publishes a conversation's checkpoint.
pub struct CheckpointStore {
    path: Option<PathBuf>,
    tx: watch::Sender<Checkpoint>,
}

impl CheckpointStore {
    /// Open the checkpoint at `path`, loading it if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let initial = read_file(&path)?.unwrap_or_default();
        let (tx, _rx) = watch::channel(initial);
        Ok(Self {
            path: Some(path),
            tx,
        })
    }

    /// A checkpoint that lives only in memory.
    pub fn in_memory() -> Self {
        let (tx, _rx) = watch::channel(Checkpoint::default());
        Self { path: None, tx }
    }

    /// File backing this checkpoint, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the stored checkpoint, or a fresh default if there is none.
    pub fn load(&self) -> Result<Checkpoint> {
        match &self.path {
            Some(path) => Ok(read_file(path)?.unwrap_or_default()),
            None => Ok(self.current()),
        }
    }

    /// Persist and publish a checkpoint.
    ///
    /// The file is replaced atomically: a crash leaves either the old or the
    /// new content, never a torn write.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut checkpoint = checkpoint.clone();
        checkpoint.format_version = CHECKPOINT_FORMAT_VERSION;

        if let Some(path) = &self.path {
            write_file(path, &checkpoint)?;
        }
        self.tx.send_replace(checkpoint);
        Ok(())
    }

    /// The last saved (or loaded) checkpoint.
    pub fn current(&self) -> Checkpoint {
        self.tx.borrow().clone()
    }

    /// Receive every subsequent save.
    pub fn subscribe(&self) -> watch::Receiver<Checkpoint> {
        self.tx.subscribe()
    }

    /// Delete the backing file and reset to the default.
    pub fn remove(&self) -> Result<()> {
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.tx.send_replace(Checkpoint::default());
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Option<Checkpoint>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let header: VersionHeader = serde_json::from_str(&text)?;
    if header.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(StoreError::FormatVersionMismatch {
            what: "checkpoint",
            found: header.format_version,
            supported: CHECKPOINT_FORMAT_VERSION,
        });
    }

    Ok(Some(serde_json::from_str(&text)?))
}

fn write_file(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(checkpoint)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(dir.path().join("checkpoint.json")).unwrap();

        let checkpoint = store.load().unwrap();
        assert_eq!(checkpoint, Checkpoint::default());
        assert_eq!(checkpoint.estimated_time_left, "unknown");
        assert_eq!(checkpoint.resume_cursor, 0);
    }

    #[test]
    fn test_save_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("42").join("checkpoint.json");
        let store = CheckpointStore::open(&path).unwrap();

        let checkpoint = Checkpoint {
            resume_cursor: 512,
            saved_count: 88,
            total_count: Some(600),
            estimated_time_left: "0:01:05".into(),
            conversation_name: Some("Alice".into()),
            updated_at: Some(1_700_000_000),
            ..Checkpoint::default()
        };
        store.save(&checkpoint).unwrap();

        let reopened = CheckpointStore::open(&path).unwrap();
        let loaded = reopened.load().unwrap();
        assert_eq!(loaded.resume_cursor, 512);
        assert_eq!(loaded.saved_count, 88);
        assert_eq!(loaded.total_count, Some(600));
        assert_eq!(loaded.conversation_name.as_deref(), Some("Alice"));
        assert_eq!(loaded.updated_at, Some(1_700_000_000));
        assert_eq!(reopened.current(), loaded);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_format_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(
            &path,
            r#"{"resume_cursor": 1, "saved_count": 1, "format_version": 99}"#,
        )
        .unwrap();

        let err = CheckpointStore::open(&path).err().unwrap();
        assert!(matches!(
            err,
            StoreError::FormatVersionMismatch { found: 99, supported: CHECKPOINT_FORMAT_VERSION, .. }
        ));
    }

    #[test]
    fn test_subscribe_sees_saves() {
        let store = CheckpointStore::in_memory();
        let mut rx = store.subscribe();

        let checkpoint = Checkpoint {
            resume_cursor: 7,
            saved_count: 3,
            ..Checkpoint::default()
        };
        store.save(&checkpoint).unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().resume_cursor, 7);
    }

    #[test]
    fn test_remove_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let store = CheckpointStore::open(&path).unwrap();
        store
            .save(&Checkpoint {
                saved_count: 5,
                ..Checkpoint::default()
            })
            .unwrap();
        assert!(path.exists());

        store.remove().unwrap();
        assert!(!path.exists());
        assert_eq!(store.current().saved_count, 0);
        store.remove().unwrap();
    }

    #[test]
    fn test_progress() {
        let mut checkpoint = Checkpoint::default();
        assert_eq!(checkpoint.progress(), None);
        assert!(!checkpoint.is_complete());

        checkpoint.total_count = Some(200);
        checkpoint.saved_count = 50;
        assert_eq!(checkpoint.progress(), Some(0.25));

        checkpoint.saved_count = 200;
        assert!(checkpoint.is_complete());
    }
}
