//! # Promoflow
//!
//! A digest promotion engine for GitOps environment pipelines.
//!
//! Promoflow moves an immutable image digest through `dev`, `stage` and
//! `prod`. A successful build writes the digest into `dev`; every later hop
//! is proposed as a reviewable change and written only once approved. The
//! engine provides:
//!
//! - **Compare-and-swap digest stores**: in memory, or Helm values files
//!   patched in place with a revision sidecar
//! - **A pure decision function** per environment pair, with supersession
//!   of stale proposals and last-write-wins ordering of builds
//! - **Idempotent change proposals** keyed by `(from, to, digest)`
//! - **Bounded retries** with backoff, and operator alarms when they run out
//! - **Observability** through lifecycle events, counters and Prometheus text
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use promoflow::prelude::*;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(PromotionEngine::new(
//!     Arc::new(InMemoryDigestStore::new()),
//!     Arc::new(InMemoryRequestEmitter::new()),
//! ));
//! let adapter = TriggerAdapter::new(engine.clone());
//!
//! adapter.handle(&json!({"kind": "build_succeeded", "digest": "sha256:aaa"})).await?;
//! adapter.handle(&json!({"kind": "request_approved", "toEnvironment": "stage", "digest": "sha256:aaa"})).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod machine;
pub mod observability;
pub mod requests;
pub mod retry;
pub mod signals;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, ValuesFileConfig};
    pub use crate::core::{
        Digest, DigestRecord, Environment, ExternalRequestHandle, PairState, PromotionEvent,
        PromotionPair, PromotionRequest, RequestStatus, Source,
    };
    pub use crate::errors::{
        ConflictError, EmitFailure, InvalidSignalError, PromotionError, StoreError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::machine::{decide, BuildOutcome, Decision, PairSnapshot, PromotionEngine};
    pub use crate::observability::{init_tracing, AlarmBoard, LogFormat, PromotionMetrics};
    pub use crate::requests::{
        InMemoryRequestEmitter, OutboxRequestEmitter, RequestEmitter, RequestLedger,
    };
    pub use crate::retry::{BackoffStrategy, JitterStrategy, RetryConfig};
    pub use crate::signals::{Signal, TriggerAdapter};
    pub use crate::store::{DigestStore, InMemoryDigestStore, ValuesFileStore};
    pub use crate::utils::{iso_timestamp, Timestamp};
}
