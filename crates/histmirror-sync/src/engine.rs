//! Sync engine state machine.
//!
//! Walks a conversation's history page by page, newest to oldest, merging
//! everything not yet stored. A run has up to two passes:
//!
//! - **Tail pass**: from the resume cursor down to the oldest item. Fills in
//!   history an earlier run did not reach.
//! - **Head pass**: from the newest item down until a page touches an item
//!   that is already stored. Picks up items sent since the last run. Entered
//!   only when the run did not itself start from the newest item.
//!
//! Convergence is detected purely by record existence, so a run with nothing
//! new to fetch ends on the first page of each pass.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use histmirror_core::{ConversationId, Record, Table};
use histmirror_store::{Checkpoint, CheckpointStore, RecordStore, UpsertResult, WriteBatch};

use crate::error::{Result, SyncError};
use crate::eta::EtaEstimator;
use crate::source::{HistorySource, Page};

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Items requested per page.
    pub chunk_size: usize,
    /// Pause between pages, and the base of the retry backoff.
    pub delay: Duration,
    /// Consecutive transient failures tolerated at one cursor; `None` retries forever.
    pub max_transient_retries: Option<u32>,
    /// Upper bound of a single backoff pause (before jitter).
    pub max_backoff: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            delay: Duration::from_secs(1),
            max_transient_retries: Some(8),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff_base(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Backoff with up to 10% random jitter added.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base(attempt);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..=0.1);
        base + base.mul_f64(jitter)
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// History converged; the store is complete as of this run.
    Completed,
    /// A stop was requested; progress is persisted and resumable.
    Cancelled,
}

/// Result of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub conversation: ConversationId,
    pub outcome: SyncOutcome,
    /// Non-empty pages merged.
    pub pages: u64,
    /// Fetch attempts, including empty pages and failures.
    pub fetches: u64,
    /// History items stored by this run.
    pub saved: u64,
    /// Senders, groups and channels written (always replaced).
    pub side_entities: u64,
    /// Fetches retried after transient failures.
    pub transient_retries: u32,
    /// Whether the head pass was entered.
    pub head_pass: bool,
    /// Checkpoint as persisted at the end of the run.
    pub checkpoint: Checkpoint,
}

impl SyncReport {
    fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            outcome: SyncOutcome::Completed,
            pages: 0,
            fetches: 0,
            saved: 0,
            side_entities: 0,
            transient_retries: 0,
            head_pass: false,
            checkpoint: Checkpoint::default(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == SyncOutcome::Completed
    }
}

/// What merging one page did.
struct PageMerge {
    /// Cursor after the page: the oldest new item, or unchanged.
    cursor: i64,
    saved: u64,
    side_entities: u64,
    /// The page touched an item that was already stored.
    converged: bool,
}

/// Sync engine for one conversation.
///
/// Owns the conversation's record store and checkpoint for its lifetime;
/// nothing else may write to them while a run is active.
pub struct SyncEngine<R: RecordStore, H: HistorySource> {
    conversation: ConversationId,
    store: R,
    checkpoints: CheckpointStore,
    source: H,
    config: SyncConfig,
}

impl<R: RecordStore, H: HistorySource> SyncEngine<R, H> {
    /// Create a new sync engine.
    pub fn new(
        conversation: ConversationId,
        store: R,
        checkpoints: CheckpointStore,
        source: H,
        config: SyncConfig,
    ) -> Self {
        Self {
            conversation,
            store,
            checkpoints,
            source,
            config,
        }
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Give back the store and checkpoint.
    pub fn into_parts(self) -> (R, CheckpointStore) {
        (self.store, self.checkpoints)
    }

    /// Ask the source for the conversation size and persist it.
    pub async fn refresh_total(&self) -> Result<Option<u64>> {
        let total = self.source.total_count(self.conversation).await?;

        let mut checkpoint = self.checkpoints.load()?;
        if total.is_some() && total != checkpoint.total_count {
            checkpoint.total_count = total;
            self.checkpoints.save(&checkpoint)?;
            debug!(conversation = %self.conversation, ?total, "refreshed total count");
        }

        Ok(total)
    }

    /// Run until history converges, a stop is requested, or an error aborts.
    ///
    /// Stop requests are cooperative: they are observed between pages and
    /// while pausing, never in the middle of a fetch or merge.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let span = tracing::info_span!("sync", conversation = %self.conversation);
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let mut checkpoint = self
            .resume_point()
            .await
            .map_err(|e| self.fail(None, e))?;

        let mut cursor = checkpoint.resume_cursor;
        let mut started_at_zero = cursor == 0;
        let mut report = SyncReport::new(self.conversation);
        let mut eta = EtaEstimator::start();
        let mut retries = 0u32;
        let limit = self.config.chunk_size.max(1);

        info!(
            cursor,
            saved = checkpoint.saved_count,
            pass = if started_at_zero { "head" } else { "tail" },
            "sync started"
        );

        loop {
            if cancel.is_cancelled() {
                report.outcome = SyncOutcome::Cancelled;
                break;
            }

            report.fetches += 1;
            let page = match self.fetch_page(cursor, limit).await {
                Ok(page) => {
                    retries = 0;
                    page
                }
                Err(e) if e.is_retryable() => {
                    retries += 1;
                    report.transient_retries += 1;

                    if self
                        .config
                        .max_transient_retries
                        .is_some_and(|max| retries > max)
                    {
                        let err = SyncError::TransientRetriesExhausted {
                            attempts: retries,
                            cursor,
                            last: e.to_string(),
                        };
                        return Err(self.fail(Some(&checkpoint), err));
                    }

                    let wait = self.config.backoff(retries);
                    warn!(
                        cursor,
                        attempt = retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "page fetch failed, retrying"
                    );
                    if self.pause(wait, cancel).await {
                        report.outcome = SyncOutcome::Cancelled;
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(self.fail(Some(&checkpoint), e)),
            };

            if let Some(total) = page.total_estimate {
                checkpoint.total_count = Some(total);
            }

            // Beginning of history, or (tail pass only) known history reached.
            let mut end_of_tail = page.is_empty();

            if !page.is_empty() {
                let merge = match self.merge_page(&page, cursor).await {
                    Ok(merge) => merge,
                    Err(e) => return Err(self.fail(Some(&checkpoint), e)),
                };

                cursor = merge.cursor;
                report.pages += 1;
                report.saved += merge.saved;
                report.side_entities += merge.side_entities;
                eta.record(merge.saved);

                checkpoint.resume_cursor = cursor;
                checkpoint.saved_count += merge.saved;
                if merge.saved > 0 {
                    checkpoint.updated_at = Some(now_secs());
                }
                checkpoint.estimated_time_left =
                    eta.display(checkpoint.saved_count, checkpoint.total_count);
                if let Err(e) = self.checkpoints.save(&checkpoint) {
                    return Err(self.fail(None, e.into()));
                }

                debug!(
                    cursor,
                    new = merge.saved,
                    saved = checkpoint.saved_count,
                    converged = merge.converged,
                    "page merged"
                );

                if merge.converged {
                    if started_at_zero {
                        break;
                    }
                    end_of_tail = true;
                }
            }

            if end_of_tail {
                if started_at_zero {
                    break;
                }

                info!(cursor, "tail complete, scanning for newer items");
                cursor = 0;
                started_at_zero = true;
                report.head_pass = true;

                let reset = self
                    .store
                    .apply(&WriteBatch::new().with_cursor(0))
                    .await
                    .map_err(SyncError::from)
                    .and_then(|_| {
                        checkpoint.resume_cursor = 0;
                        self.checkpoints.save(&checkpoint).map_err(SyncError::from)
                    });
                if let Err(e) = reset {
                    return Err(self.fail(Some(&checkpoint), e));
                }
            }

            if self.pause(self.config.delay, cancel).await {
                report.outcome = SyncOutcome::Cancelled;
                break;
            }
        }

        match report.outcome {
            SyncOutcome::Completed => {
                if let Err(e) = self.finish(&mut checkpoint, &eta).await {
                    return Err(self.fail(Some(&checkpoint), e));
                }
                info!(
                    saved = report.saved,
                    total = checkpoint.saved_count,
                    pages = report.pages,
                    "sync complete"
                );
            }
            SyncOutcome::Cancelled => {
                if let Err(e) = self.checkpoints.save(&checkpoint) {
                    return Err(self.fail(None, e.into()));
                }
                info!(cursor = checkpoint.resume_cursor, saved = report.saved, "sync stopped");
            }
        }

        report.checkpoint = checkpoint;
        Ok(report)
    }

    /// Load the checkpoint and reconcile it with the store.
    ///
    /// The store's committed cursor is written in the same transaction as the
    /// records, so it wins over a checkpoint file that may lag one page.
    async fn resume_point(&self) -> Result<Checkpoint> {
        let mut checkpoint = self.checkpoints.load()?;

        if let Some(committed) = self.store.committed_cursor().await? {
            if committed != checkpoint.resume_cursor {
                warn!(
                    file = checkpoint.resume_cursor,
                    store = committed,
                    "checkpoint cursor disagrees with store, resuming from store"
                );
                checkpoint.resume_cursor = committed;
            }
        }

        let stored = self.store.count(Table::Messages, None).await?;
        if stored != checkpoint.saved_count {
            debug!(file = checkpoint.saved_count, store = stored, "recounted saved items");
            checkpoint.saved_count = stored;
        }

        Ok(checkpoint)
    }

    async fn fetch_page(&self, cursor: i64, limit: usize) -> Result<Page> {
        let page = self.source.fetch(self.conversation, cursor, limit).await?;
        page.validate(cursor)?;
        Ok(page)
    }

    /// Merge one non-empty page in a single store transaction.
    async fn merge_page(&self, page: &Page, cursor: i64) -> Result<PageMerge> {
        let mut batch = WriteBatch::new();
        for entity in page.side_entities() {
            batch.replace(entity.clone());
        }
        let side_entities = batch.len();

        let ids: Vec<i64> = page.items.iter().map(Record::id).collect();
        let known = self.store.existing_ids(&ids, Table::Messages).await?;

        let mut next_cursor = cursor;
        let mut converged = false;
        for item in &page.items {
            if known.contains(&item.id()) {
                converged = true;
                break;
            }
            batch.insert(item.clone());
            next_cursor = item.id();
        }

        let results = self.store.apply(&batch.with_cursor(next_cursor)).await?;
        let saved = results[side_entities..]
            .iter()
            .filter(|r| **r == UpsertResult::Inserted)
            .count();

        Ok(PageMerge {
            cursor: next_cursor,
            saved: saved as u64,
            side_entities: side_entities as u64,
            converged,
        })
    }

    /// Settle the checkpoint after convergence.
    ///
    /// The store now holds everything from its oldest item to the newest, so
    /// the resume cursor moves to the oldest item. A repeat run then finds
    /// nothing below it and nothing new above it, and leaves both unchanged.
    async fn finish(&self, checkpoint: &mut Checkpoint, eta: &EtaEstimator) -> Result<()> {
        let oldest = self.store.min_id(Table::Messages).await?.unwrap_or(0);
        self.store
            .apply(&WriteBatch::new().with_cursor(oldest))
            .await?;

        checkpoint.resume_cursor = oldest;
        checkpoint.estimated_time_left = eta.display(checkpoint.saved_count, checkpoint.total_count);
        self.checkpoints.save(checkpoint)?;
        Ok(())
    }

    /// Sleep, returning early with `true` if a stop is requested.
    async fn pause(&self, wait: Duration, cancel: &CancellationToken) -> bool {
        if wait.is_zero() {
            return cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(wait) => false,
        }
    }

    /// Flush what is known to be committed and wrap the error with context.
    fn fail(&self, checkpoint: Option<&Checkpoint>, err: SyncError) -> SyncError {
        if let Some(checkpoint) = checkpoint {
            if let Err(flush) = self.checkpoints.save(checkpoint) {
                warn!(error = %flush, "could not flush checkpoint after failure");
            }
        }

        let cursor = checkpoint
            .map(|c| c.resume_cursor)
            .unwrap_or_else(|| self.checkpoints.current().resume_cursor);
        error!(cursor, error = %err, "sync aborted");

        SyncError::Aborted {
            conversation: self.conversation,
            cursor,
            source: Box::new(err),
        }
    }
}

fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
