//! Proptest generators for property-based testing.

use proptest::prelude::*;

use histmirror_core::{Message, Payload, Record};

/// Largest ID handed out for pre-existing history.
pub const MAX_OLD_ID: i64 = 5_000;

/// A set of distinct, positive item IDs, sorted ascending.
pub fn id_set(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(1i64..=MAX_OLD_ID, 0..=max_len)
        .prop_map(|ids| ids.into_iter().collect())
}

/// A page size, kept small so histories span several pages.
pub fn chunk_size() -> impl Strategy<Value = usize> {
    1usize..=25
}

/// Generate a message with arbitrary optional fields.
pub fn message(id: i64) -> impl Strategy<Value = Record> {
    (
        0i64..=2_000_000_000,
        proptest::option::of("[a-zA-Z0-9 ]{0,40}"),
        proptest::option::of(1i64..=50),
        any::<bool>(),
        proptest::option::of((0u32..8, prop::collection::vec(any::<u8>(), 0..64))),
    )
        .prop_map(move |(date, text, sender, outgoing, media)| {
            let mut m = Message::new(id, date).with_outgoing(outgoing);
            if let Some(text) = text {
                m = m.with_text(text);
            }
            if let Some(sender) = sender {
                m = m.with_sender(sender);
            }
            if let Some((kind, bytes)) = media {
                m = m.with_media(Payload::new(kind, bytes));
            }
            m.into()
        })
}

/// Parameters for a history mirrored in one or more interrupted runs.
#[derive(Debug, Clone)]
pub struct HistoryParams {
    /// Remote item IDs, ascending.
    pub ids: Vec<i64>,
    pub chunk_size: usize,
    /// Stop after this many fetches in the first run.
    pub interrupt_after: u64,
}

impl HistoryParams {
    /// Pages a single uninterrupted run from empty storage produces.
    pub fn full_run_pages(&self) -> u64 {
        self.ids.len().div_ceil(self.chunk_size) as u64
    }
}

impl Arbitrary for HistoryParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (id_set(120), chunk_size(), 1u64..=12)
            .prop_map(|(ids, chunk_size, interrupt_after)| HistoryParams {
                ids,
                chunk_size,
                interrupt_after,
            })
            .boxed()
    }
}

/// A history that grows between runs: `older` is mirrored first, then
/// `newer` appears remotely above it.
#[derive(Debug, Clone)]
pub struct GrowthParams {
    pub older: Vec<i64>,
    pub newer: Vec<i64>,
    pub chunk_size: usize,
}

impl Arbitrary for GrowthParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (id_set(80), 0i64..=60, chunk_size())
            .prop_map(|(older, added, chunk_size)| GrowthParams {
                older,
                newer: (MAX_OLD_ID + 1..=MAX_OLD_ID + added).collect(),
                chunk_size,
            })
            .boxed()
    }
}
