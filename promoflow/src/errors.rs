//! Error types for the promotion engine.
//!
//! Absence of a digest record is not an error: store reads return
//! `Option<DigestRecord>`. Everything else that can go wrong while moving a
//! digest between environments is represented here.

use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::{Digest, Environment};

/// The main error type for promotion operations.
#[derive(Debug, Error)]
pub enum PromotionError {
    /// An optimistic write collided with a concurrent writer.
    #[error("{0}")]
    Conflict(#[from] ConflictError),

    /// An upstream signal was malformed or unexpected.
    #[error("{0}")]
    InvalidSignal(#[from] InvalidSignalError),

    /// The change-proposal system could not be reached.
    #[error("{0}")]
    Emit(#[from] EmitFailure),

    /// The digest store failed for a reason other than a CAS conflict.
    #[error("{0}")]
    Store(StoreError),

    /// An external call did not complete within the configured bound.
    #[error("Timed out after {timeout_ms}ms during {operation}")]
    Timeout {
        /// What was being attempted.
        operation: String,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// An approval or rejection matched no pending request.
    #[error("No pending promotion request into {to} for digest {digest}")]
    NoMatchingRequest {
        /// Target environment named by the signal.
        to: Environment,
        /// Digest named by the signal.
        digest: Digest,
    },

    /// An operator asked to re-apply but no approved request is waiting.
    #[error("No approved promotion into {to} is waiting to be applied")]
    NothingToApply {
        /// Target environment.
        to: Environment,
    },

    /// The upstream environment no longer records the approved digest.
    #[error("Source {from} moved from {expected} to {actual:?}; approved promotion into {to} not applied")]
    SourceChanged {
        /// Upstream environment.
        from: Environment,
        /// Target environment.
        to: Environment,
        /// Digest that was approved.
        expected: Digest,
        /// What the upstream currently records.
        actual: Option<Digest>,
    },

    /// CAS retries were exhausted while applying an approved promotion.
    #[error("Applying {digest} into {to} failed after {attempts} attempts: {last_error}")]
    ApplyExhausted {
        /// Target environment.
        to: Environment,
        /// Digest that was approved.
        digest: Digest,
        /// Attempts made.
        attempts: usize,
        /// The last error observed.
        last_error: String,
    },

    /// CAS retries were exhausted while recording a build in `dev`.
    #[error("Recording build {digest} in dev failed after {attempts} attempts: {last_error}")]
    BuildWriteExhausted {
        /// Digest of the build.
        digest: Digest,
        /// Attempts made.
        attempts: usize,
        /// The last error observed.
        last_error: String,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PromotionError {
    /// Returns a stable machine-readable code for the error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::InvalidSignal(_) => "invalid_signal",
            Self::Emit(_) => "emit_failure",
            Self::Store(_) => "store",
            Self::Timeout { .. } => "timeout",
            Self::NoMatchingRequest { .. } => "no_matching_request",
            Self::NothingToApply { .. } => "nothing_to_apply",
            Self::SourceChanged { .. } => "source_changed",
            Self::ApplyExhausted { .. } => "apply_exhausted",
            Self::BuildWriteExhausted { .. } => "build_write_exhausted",
            Self::Config(_) => "config",
        }
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Emit(_) | Self::Timeout { .. })
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), json!(self.code()));
        map.insert("message".to_string(), json!(self.to_string()));
        map.insert("retryable".to_string(), json!(self.is_retryable()));
        map
    }
}

/// Error raised when a compare-and-swap write finds a different revision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Revision conflict on {environment}: expected {expected}, found {actual}")]
pub struct ConflictError {
    /// Environment being written.
    pub environment: Environment,
    /// Revision the writer last read.
    pub expected: u64,
    /// Revision actually stored.
    pub actual: u64,
}

impl ConflictError {
    /// Creates a new conflict error.
    #[must_use]
    pub const fn new(environment: Environment, expected: u64, actual: u64) -> Self {
        Self {
            environment,
            expected,
            actual,
        }
    }
}

/// Error raised for malformed or unexpected upstream signals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid signal: {reason}")]
pub struct InvalidSignalError {
    /// Why the signal was rejected.
    pub reason: String,
    /// The signal kind, when it could be determined.
    pub kind: Option<String>,
}

impl InvalidSignalError {
    /// Creates a new invalid signal error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind: None,
        }
    }

    /// Sets the signal kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// Error raised when a change proposal cannot be opened or withdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Change proposal {key} failed: {reason}")]
pub struct EmitFailure {
    /// Idempotency key of the proposal.
    pub key: String,
    /// The reason for failure.
    pub reason: String,
}

impl EmitFailure {
    /// Creates a new emit failure.
    #[must_use]
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by digest store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Compare-and-swap lost against another writer.
    #[error("{0}")]
    Conflict(#[from] ConflictError),

    /// The values file has no `digest:` field, or more than one.
    #[error("Values file {path} has {found} digest fields, expected exactly one")]
    DigestField {
        /// File being patched.
        path: String,
        /// Number of `digest:` lines found.
        found: usize,
    },

    /// The environment's values file does not exist.
    #[error("Values file for {environment} not found at {path}")]
    MissingValuesFile {
        /// Environment being written.
        environment: Environment,
        /// Expected path.
        path: String,
    },

    /// Sidecar metadata could not be parsed.
    #[error("Corrupt store metadata at {path}: {reason}")]
    Corrupt {
        /// Sidecar path.
        path: String,
        /// Parse failure.
        reason: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for PromotionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(conflict) => Self::Conflict(conflict),
            other => Self::Store(other),
        }
    }
}
