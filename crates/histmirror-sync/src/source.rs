//! Remote history abstraction.
//!
//! The source is whatever can answer "give me up to N items older than
//! cursor X" for a conversation. Implementations may wrap a messaging API
//! client, a recorded fixture, or anything else.

use std::sync::Arc;

use async_trait::async_trait;

use histmirror_core::{
    validate_history_items, validate_side_entity, ConversationId, Record, Table, ValidationError,
};

use crate::error::SourceError;

/// One batch of history returned by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Messages and service events, newest first.
    pub items: Vec<Record>,
    /// Authors referenced by `items`.
    pub senders: Vec<Record>,
    pub groups: Vec<Record>,
    pub channels: Vec<Record>,
    /// Total history size, when the source reports it alongside the page.
    pub total_estimate: Option<u64>,
}

impl Page {
    pub fn new(items: Vec<Record>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    /// No items: the beginning of history has been reached.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Senders, groups and channels, in that order.
    pub fn side_entities(&self) -> impl Iterator<Item = &Record> {
        self.senders
            .iter()
            .chain(self.groups.iter())
            .chain(self.channels.iter())
    }

    /// Check the page shape against the cursor it was requested with.
    pub fn validate(&self, cursor: i64) -> Result<(), ValidationError> {
        validate_history_items(&self.items, cursor)?;
        for sender in &self.senders {
            validate_side_entity(sender, Table::Senders)?;
        }
        for group in &self.groups {
            validate_side_entity(group, Table::Groups)?;
        }
        for channel in &self.channels {
            validate_side_entity(channel, Table::Channels)?;
        }
        Ok(())
    }
}

/// Source of a conversation's remote history.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch up to `limit` items strictly older than `cursor`, newest first.
    ///
    /// A cursor of 0 means "start from the newest item".
    async fn fetch(
        &self,
        conversation: ConversationId,
        cursor: i64,
        limit: usize,
    ) -> Result<Page, SourceError>;

    /// Total number of items in the conversation, if the source knows it.
    async fn total_count(&self, conversation: ConversationId) -> Result<Option<u64>, SourceError>;
}

#[async_trait]
impl<T: HistorySource + ?Sized> HistorySource for Arc<T> {
    async fn fetch(
        &self,
        conversation: ConversationId,
        cursor: i64,
        limit: usize,
    ) -> Result<Page, SourceError> {
        (**self).fetch(conversation, cursor, limit).await
    }

    async fn total_count(&self, conversation: ConversationId) -> Result<Option<u64>, SourceError> {
        (**self).total_count(conversation).await
    }
}

/// A simple in-memory source for testing.
///
/// Holds whole conversations and serves them page by page. History can be
/// changed between (or during) runs, and failures or hand-made pages can be
/// scripted ahead of the normal responses.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, MutexGuard};

    #[derive(Default)]
    struct Conversation {
        items: BTreeMap<i64, Record>,
        senders: BTreeMap<i64, Record>,
        groups: BTreeMap<i64, Record>,
        channels: BTreeMap<i64, Record>,
        report_total: bool,
    }

    #[derive(Default)]
    struct Inner {
        conversations: HashMap<ConversationId, Conversation>,
        script: VecDeque<Result<Page, SourceError>>,
    }

    /// In-memory history source.
    #[derive(Default)]
    pub struct MemorySource {
        inner: Mutex<Inner>,
        fetches: AtomicU64,
    }

    impl MemorySource {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> Result<MutexGuard<'_, Inner>, SourceError> {
            self.inner
                .lock()
                .map_err(|e| SourceError::Fatal(format!("memory source poisoned: {e}")))
        }

        fn with_conversation<R>(
            &self,
            conversation: ConversationId,
            f: impl FnOnce(&mut Conversation) -> R,
        ) -> R {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let entry = inner
                .conversations
                .entry(conversation)
                .or_insert_with(|| Conversation {
                    report_total: true,
                    ..Conversation::default()
                });
            f(entry)
        }

        /// Add (or overwrite) history items and side entities.
        ///
        /// Messages and service events become history; senders, groups and
        /// channels become side entities returned with pages.
        pub fn insert(&self, conversation: ConversationId, records: impl IntoIterator<Item = Record>) {
            self.with_conversation(conversation, |c| {
                for record in records {
                    let map = match record.table() {
                        Table::Messages => &mut c.items,
                        Table::Senders => &mut c.senders,
                        Table::Groups => &mut c.groups,
                        Table::Channels => &mut c.channels,
                    };
                    map.insert(record.id(), record);
                }
            });
        }

        /// Remove a history item, as if it was deleted remotely.
        pub fn remove_item(&self, conversation: ConversationId, id: i64) -> Option<Record> {
            self.with_conversation(conversation, |c| c.items.remove(&id))
        }

        /// Whether pages and `total_count` report the history size.
        pub fn set_report_total(&self, conversation: ConversationId, report: bool) {
            self.with_conversation(conversation, |c| c.report_total = report);
        }

        /// Number of history items held for a conversation.
        pub fn item_count(&self, conversation: ConversationId) -> usize {
            self.with_conversation(conversation, |c| c.items.len())
        }

        /// Queue a failure returned by the next fetch, ahead of normal pages.
        pub fn fail_next(&self, error: SourceError) {
            self.push_response(Err(error));
        }

        /// Queue a hand-made response returned by a future fetch.
        pub fn push_response(&self, response: Result<Page, SourceError>) {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.script.push_back(response);
        }

        /// Number of `fetch` calls served so far.
        pub fn fetch_count(&self) -> u64 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HistorySource for MemorySource {
        async fn fetch(
            &self,
            conversation: ConversationId,
            cursor: i64,
            limit: usize,
        ) -> Result<Page, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut inner = self.lock()?;

            if let Some(response) = inner.script.pop_front() {
                return response;
            }

            let c = inner.conversations.get(&conversation).ok_or_else(|| {
                SourceError::Fatal(format!("unknown conversation {conversation}"))
            })?;

            let older = if cursor == 0 {
                c.items.range(..=i64::MAX)
            } else {
                c.items.range(..cursor)
            };
            let items: Vec<Record> = older.rev().take(limit).map(|(_, r)| r.clone()).collect();

            let referenced: Vec<i64> = items
                .iter()
                .filter_map(|item| match item {
                    Record::Message(m) => m.sender_id,
                    Record::ServiceEvent(s) => s.sender_id,
                    _ => None,
                })
                .collect();

            let mut page = Page::new(items);
            if !page.is_empty() {
                page.senders = c
                    .senders
                    .iter()
                    .filter(|(id, _)| referenced.contains(id))
                    .map(|(_, r)| r.clone())
                    .collect();
                page.groups = c.groups.values().cloned().collect();
                page.channels = c.channels.values().cloned().collect();
            }
            if c.report_total {
                page.total_estimate = Some(c.items.len() as u64);
            }

            Ok(page)
        }

        async fn total_count(&self, conversation: ConversationId) -> Result<Option<u64>, SourceError> {
            let inner = self.lock()?;
            let c = inner.conversations.get(&conversation).ok_or_else(|| {
                SourceError::Fatal(format!("unknown conversation {conversation}"))
            })?;
            Ok(c.report_total.then_some(c.items.len() as u64))
        }
    }
}
