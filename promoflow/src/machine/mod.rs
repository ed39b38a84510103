//! The promotion state machine.
//!
//! [`decide`] is the pure transition function over a [`PairSnapshot`];
//! [`PromotionEngine`] reads snapshots, acts on decisions and handles
//! build, approval and rejection signals.

mod decision;
mod engine;

pub use decision::{decide, Decision, PairSnapshot};
pub use engine::{BuildOutcome, PromotionEngine};
