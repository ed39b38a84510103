//! Core domain model types for promoflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Environments and the promotion chain
//! - Digests and per-environment digest records
//! - Promotion requests, their status, and per-pair state
//! - Lifecycle events

mod digest;
mod environment;
mod event;
mod record;
mod request;
mod status;

pub use digest::Digest;
pub use environment::{Environment, PromotionPair};
pub use event::PromotionEvent;
pub use record::{expected_revision, DigestRecord, Source};
pub use request::{ExternalRequestHandle, PromotionRequest};
pub use status::{PairState, RequestStatus};
