//! # histmirror Testkit
//!
//! Testing utilities for histmirror.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Scenarios**: Named runs with their expected pages, counts and cursor
//! - **Generators**: Proptest strategies for histories and interruptions
//! - **Fixtures**: Sources, stores and temporary directories for tests
//!
//! ## Scenarios
//!
//! ```rust,ignore
//! use histmirror_testkit::scenarios::all_scenarios;
//!
//! for scenario in all_scenarios() {
//!     println!("{}: {} pages", scenario.name, scenario.expect.pages);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use histmirror_testkit::generators::HistoryParams;
//!
//! proptest! {
//!     #[test]
//!     fn interrupted_runs_converge(params: HistoryParams) {
//!         // run with a stop after `params.interrupt_after` fetches, resume,
//!         // compare the store digest with a single uninterrupted run
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use histmirror_testkit::fixtures::{memory_engine, source_with};
//!
//! let engine = memory_engine(source_with(1..=25), 10);
//! ```

pub mod fixtures;
pub mod generators;
pub mod scenarios;

pub use fixtures::{
    fast_config, init_tracing, memory_engine, seed_store, source_with, stored_ids, CancelAfter,
    TestFixture, CONVERSATION,
};
pub use generators::{GrowthParams, HistoryParams};
pub use scenarios::{all_scenarios, Expected, Scenario};
