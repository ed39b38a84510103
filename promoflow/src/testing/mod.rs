//! Testing utilities for promotion flows.
//!
//! This module provides:
//! - Store and emitter doubles that inject conflicts, failures and delays
//! - A harness wiring an engine to in-memory parts
//! - Assertions over digest records and the request ledger

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_at_most_one_pending, assert_pending, assert_recorded, assert_request_count,
};
pub use fixtures::{digest, fast_config, pair_into, TestHarness};
pub use mocks::{FailingEmitter, FlakyStore, SlowEmitter};
