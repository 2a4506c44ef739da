//! Named sync scenarios with their expected outcomes.
//!
//! Each scenario describes the remote history, what is already stored
//! locally, and what a run must leave behind. The same table drives the
//! engine tests over memory storage and the mirror tests over SQLite.

use std::ops::RangeInclusive;

/// A sync scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Human-readable name for the scenario.
    pub name: &'static str,
    /// Remote item IDs.
    pub remote: RangeInclusive<i64>,
    /// Item IDs stored before the run, if any.
    pub stored: Option<RangeInclusive<i64>>,
    /// Committed cursor before the run.
    pub cursor: i64,
    pub chunk_size: usize,
    /// Stop after this many fetches.
    pub stop_after: Option<u64>,
    pub expect: Expected,
}

/// What a scenario run must produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    /// Non-empty pages merged.
    pub pages: u64,
    /// Items newly written by the run.
    pub saved: u64,
    pub head_pass: bool,
    pub completed: bool,
    /// Resume cursor in the final checkpoint.
    pub cursor: i64,
    /// Stored item IDs after the run.
    pub stored: RangeInclusive<i64>,
}

impl Scenario {
    /// IDs stored before the run.
    pub fn stored_ids(&self) -> Vec<i64> {
        self.stored.clone().map(Iterator::collect).unwrap_or_default()
    }
}

/// A fresh conversation mirrored in one run: three tail pages, no head pass.
pub fn fresh_conversation() -> Scenario {
    Scenario {
        name: "fresh conversation",
        remote: 1..=250,
        stored: None,
        cursor: 0,
        chunk_size: 100,
        stop_after: None,
        expect: Expected {
            pages: 3,
            saved: 250,
            head_pass: false,
            completed: true,
            cursor: 1,
            stored: 1..=250,
        },
    }
}

/// Older and newer history both missing around a stored middle.
pub fn gap_on_both_sides() -> Scenario {
    Scenario {
        name: "gap on both sides",
        remote: 1..=150,
        stored: Some(50..=100),
        cursor: 50,
        chunk_size: 100,
        stop_after: None,
        expect: Expected {
            // 49..1 on the tail pass, then 150..101 closing onto 100.
            pages: 2,
            saved: 99,
            head_pass: true,
            completed: true,
            cursor: 1,
            stored: 1..=150,
        },
    }
}

/// A stop requested while the second of five pages is in flight.
pub fn stopped_mid_run() -> Scenario {
    Scenario {
        name: "stopped mid-run",
        remote: 1..=50,
        stored: None,
        cursor: 0,
        chunk_size: 10,
        stop_after: Some(2),
        expect: Expected {
            pages: 2,
            saved: 20,
            head_pass: false,
            completed: false,
            cursor: 31,
            stored: 31..=50,
        },
    }
}

/// Everything already mirrored: one empty tail page, one converged head page.
pub fn nothing_new() -> Scenario {
    Scenario {
        name: "nothing new",
        remote: 1..=30,
        stored: Some(1..=30),
        cursor: 1,
        chunk_size: 10,
        stop_after: None,
        expect: Expected {
            pages: 1,
            saved: 0,
            head_pass: true,
            completed: true,
            cursor: 1,
            stored: 1..=30,
        },
    }
}

/// Get all scenarios.
pub fn all_scenarios() -> Vec<Scenario> {
    vec![
        fresh_conversation(),
        gap_on_both_sides(),
        stopped_mid_run(),
        nothing_new(),
    ]
}
