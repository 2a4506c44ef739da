//! End-to-end sync scenarios over memory and SQLite storage.
//!
//! Every scenario in the testkit table must produce the same pages, counts
//! and final cursor regardless of the backing store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use histmirror::store::{
    Checkpoint, CheckpointStore, MemoryStore, RecordStore, StoreError, UpsertResult,
    CHECKPOINT_FILE,
};
use histmirror::sync::{compute_store_digest, SyncEngine, SyncError};
use histmirror::{
    ConversationId, MemorySource, Message, Mirror, MirrorConfig, MirrorError, Record, SourceError,
    SyncOutcome, SyncReport, Table,
};
use histmirror_testkit::fixtures::{history, message, CONVERSATION};
use histmirror_testkit::{
    all_scenarios, fast_config, init_tracing, seed_store, source_with, stored_ids, CancelAfter,
    Scenario, TestFixture,
};

fn remote_source(scenario: &Scenario, cancel: &CancellationToken) -> CancelAfter<Arc<MemorySource>> {
    CancelAfter::new(
        source_with(scenario.remote.clone()),
        scenario.stop_after.unwrap_or(u64::MAX),
        cancel.clone(),
    )
}

fn check(scenario: &Scenario, report: &SyncReport, ids: Vec<i64>) {
    let expect = &scenario.expect;
    assert_eq!(report.pages, expect.pages, "{}: pages", scenario.name);
    assert_eq!(report.saved, expect.saved, "{}: saved", scenario.name);
    assert_eq!(report.head_pass, expect.head_pass, "{}: head pass", scenario.name);
    assert_eq!(report.is_completed(), expect.completed, "{}: outcome", scenario.name);
    assert_eq!(
        report.checkpoint.resume_cursor, expect.cursor,
        "{}: cursor",
        scenario.name
    );
    assert_eq!(
        report.checkpoint.saved_count,
        expect.stored.clone().count() as u64,
        "{}: saved count",
        scenario.name
    );
    assert_eq!(
        ids,
        expect.stored.clone().collect::<Vec<_>>(),
        "{}: stored ids",
        scenario.name
    );
}

fn mirror_config(fixture: &TestFixture, chunk_size: usize) -> MirrorConfig {
    MirrorConfig {
        root: fixture.root().to_path_buf(),
        sync: fast_config(chunk_size),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario table
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scenarios_over_memory_store() {
    init_tracing();

    for scenario in all_scenarios() {
        let cancel = CancellationToken::new();
        let store = MemoryStore::new();
        seed_store(&store, scenario.stored_ids(), scenario.cursor)
            .await
            .unwrap();

        let engine = SyncEngine::new(
            CONVERSATION,
            store,
            CheckpointStore::in_memory(),
            remote_source(&scenario, &cancel),
            fast_config(scenario.chunk_size),
        );
        let report = engine.run(&cancel).await.unwrap();

        check(&scenario, &report, stored_ids(engine.store()).await);
    }
}

#[tokio::test]
async fn test_scenarios_over_sqlite_store() {
    init_tracing();

    for scenario in all_scenarios() {
        let fixture = TestFixture::new();
        let cancel = CancellationToken::new();
        let engine = fixture.engine(remote_source(&scenario, &cancel), scenario.chunk_size);
        seed_store(engine.store(), scenario.stored_ids(), scenario.cursor)
            .await
            .unwrap();

        let report = engine.run(&cancel).await.unwrap();
        check(&scenario, &report, stored_ids(engine.store()).await);

        // The file on disk matches what the run reported.
        assert_eq!(engine.checkpoints().load().unwrap(), report.checkpoint);
    }
}

#[tokio::test]
async fn test_stop_keeps_cursor_of_last_merged_page() {
    let fixture = TestFixture::new();
    let cancel = CancellationToken::new();
    let source = CancelAfter::new(source_with(1..=50), 2, cancel.clone());
    let engine = fixture.engine(source, 10);

    let report = engine.run(&cancel).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Cancelled);
    // End of page 2 (50..41, 40..31), not page 1 or 3.
    assert_eq!(report.checkpoint.resume_cursor, 31);
    assert_eq!(engine.store().committed_cursor().await.unwrap(), Some(31));
    assert_eq!(engine.checkpoints().load().unwrap().resume_cursor, 31);
}

#[tokio::test]
async fn test_duplicate_upsert_leaves_store_unchanged() {
    let fixture = TestFixture::new();
    let (store, _) = fixture.storage().into_parts();

    let original = message(5);
    let changed: Record = Message::new(5, 1).with_text("edited").into();

    assert_eq!(store.upsert(&original, false).await.unwrap(), UpsertResult::Inserted);
    assert_eq!(
        store.upsert(&changed, false).await.unwrap(),
        UpsertResult::DuplicateRecord
    );
    assert_eq!(store.get(5, Table::Messages).await.unwrap(), Some(original));
    assert_eq!(store.count(Table::Messages, None).await.unwrap(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Repeat runs and recovery
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_second_run_changes_nothing() {
    init_tracing();
    let fixture = TestFixture::new();
    let source = source_with(1..=37);
    let mirror = Mirror::new(Arc::clone(&source), mirror_config(&fixture, 10));

    mirror.start(CONVERSATION).await.unwrap();
    let first = mirror.wait(CONVERSATION).await.unwrap();
    let digest = compute_store_digest(&mirror.open_store(CONVERSATION).unwrap())
        .await
        .unwrap();

    let fetches_before = source.fetch_count();
    mirror.start(CONVERSATION).await.unwrap();
    let second = mirror.wait(CONVERSATION).await.unwrap();

    assert_eq!(second.saved, 0);
    // One empty page below the oldest item, one converged page at the top.
    assert_eq!(source.fetch_count() - fetches_before, 2);
    assert_eq!(second.checkpoint, first.checkpoint);
    assert_eq!(mirror.status(CONVERSATION).await.unwrap(), first.checkpoint);
    assert_eq!(
        compute_store_digest(&mirror.open_store(CONVERSATION).unwrap())
            .await
            .unwrap(),
        digest
    );
}

#[tokio::test]
async fn test_store_cursor_wins_over_stale_checkpoint() {
    init_tracing();
    let fixture = TestFixture::new();

    let cancel = CancellationToken::new();
    let engine = fixture.engine(CancelAfter::new(source_with(1..=50), 2, cancel.clone()), 10);
    engine.run(&cancel).await.unwrap();
    drop(engine);

    // Crash after page 2 committed but before its checkpoint was written.
    let path = fixture.storage().dir().join(CHECKPOINT_FILE);
    let stale = Checkpoint {
        resume_cursor: 41,
        saved_count: 10,
        ..Checkpoint::default()
    };
    CheckpointStore::open(&path).unwrap().save(&stale).unwrap();

    let engine = fixture.engine(source_with(1..=50), 10);
    let report = engine.run(&CancellationToken::new()).await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.saved, 30);
    assert_eq!(report.checkpoint.saved_count, 50);
    assert_eq!(stored_ids(engine.store()).await, (1..=50).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_item_removed_remotely_stays_local() {
    init_tracing();
    let fixture = TestFixture::new();
    let source = source_with(1..=100);
    let engine = fixture.engine(Arc::clone(&source), 10);
    engine.run(&CancellationToken::new()).await.unwrap();

    // The newest stored item disappears upstream before newer ones arrive.
    assert!(source.remove_item(CONVERSATION, 100).is_some());
    source.insert(CONVERSATION, history(101..=120));
    let report = engine.run(&CancellationToken::new()).await.unwrap();

    assert!(report.is_completed());
    assert!(report.head_pass);
    assert_eq!(report.saved, 20);
    // 120..111 and 110..101, then 99..90 closes onto known history.
    assert_eq!(report.pages, 3);
    assert!(report.pages <= report.saved / 10 + 1);
    assert_eq!(report.checkpoint.resume_cursor, 1);
    assert_eq!(report.checkpoint.saved_count, 120);
    assert!(engine.store().exists(100, Table::Messages).await.unwrap());
    assert_eq!(stored_ids(engine.store()).await, (1..=120).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let fixture = TestFixture::new();
    let source = source_with(1..=20);
    source.fail_next(SourceError::Transient("flood wait".into()));
    source.fail_next(SourceError::Transient("timeout".into()));

    let mirror = Mirror::new(Arc::clone(&source), mirror_config(&fixture, 10));
    mirror.start(CONVERSATION).await.unwrap();
    let report = mirror.wait(CONVERSATION).await.unwrap();

    assert!(report.is_completed());
    assert_eq!(report.transient_retries, 2);
    assert_eq!(report.checkpoint.saved_count, 20);
}

#[tokio::test]
async fn test_fatal_source_error_aborts_worker() {
    let fixture = TestFixture::new();
    let source = Arc::new(MemorySource::new());
    let mirror = Mirror::new(source, mirror_config(&fixture, 10));

    mirror.start(ConversationId(404)).await.unwrap();
    let err = mirror.wait(ConversationId(404)).await.unwrap_err();

    match err {
        MirrorError::Sync(e @ SyncError::Aborted { .. }) => {
            assert!(matches!(e.root(), SyncError::Source(SourceError::Fatal(_))));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!mirror.is_running(ConversationId(404)).await);
}

#[tokio::test]
async fn test_checkpoint_from_newer_format_is_refused() {
    let fixture = TestFixture::new();
    let dir = fixture.storage().dir().to_path_buf();
    std::fs::write(
        dir.join(CHECKPOINT_FILE),
        r#"{"format_version": 99, "resume_cursor": 5}"#,
    )
    .unwrap();

    let mirror = Mirror::new(source_with(1..=5), mirror_config(&fixture, 10));

    let err = mirror.start(CONVERSATION).await.unwrap_err();
    assert!(matches!(
        err,
        MirrorError::Store(StoreError::FormatVersionMismatch { found: 99, .. })
    ));
    assert!(matches!(
        mirror.status(CONVERSATION).await,
        Err(MirrorError::Store(StoreError::FormatVersionMismatch { .. }))
    ));
    assert!(!mirror.is_running(CONVERSATION).await);
}

#[tokio::test]
async fn test_conversations_are_independent() {
    let fixture = TestFixture::new();
    let source = Arc::new(MemorySource::new());
    let other = ConversationId(2);
    source.insert(CONVERSATION, history(1..=15));
    source.insert(other, history(100..=104));

    let mirror = Mirror::new(source, mirror_config(&fixture, 4));
    mirror.start(CONVERSATION).await.unwrap();
    mirror.start(other).await.unwrap();

    let a = mirror.wait(CONVERSATION).await.unwrap();
    let b = mirror.wait(other).await.unwrap();

    assert_eq!(a.checkpoint.saved_count, 15);
    assert_eq!(b.checkpoint.saved_count, 5);
    assert_eq!(b.checkpoint.resume_cursor, 100);
    assert_eq!(mirror.stored_conversations().unwrap(), vec![CONVERSATION, other]);
}
