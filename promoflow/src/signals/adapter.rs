//! Routes upstream signals into the engine.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::signal::{parse_signal, Signal};
use crate::core::{DigestRecord, PromotionEvent, PromotionRequest};
use crate::errors::{InvalidSignalError, PromotionError};
use crate::machine::{BuildOutcome, PromotionEngine};

/// What a handled signal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    /// A build was written, found unchanged, or discarded as stale.
    Build(BuildOutcome),
    /// An approval was written into its target.
    Applied(DigestRecord),
    /// A pending request was rejected.
    Rejected(PromotionRequest),
}

/// Counters for a run over a signal stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Signals handled without error.
    pub handled: usize,
    /// Signals rejected as invalid.
    pub invalid: usize,
    /// Valid signals whose handling failed.
    pub failed: usize,
}

/// Validates signals and dispatches them to a [`PromotionEngine`].
#[derive(Debug, Clone)]
pub struct TriggerAdapter {
    engine: Arc<PromotionEngine>,
}

impl TriggerAdapter {
    /// Creates an adapter for `engine`.
    #[must_use]
    pub const fn new(engine: Arc<PromotionEngine>) -> Self {
        Self { engine }
    }

    /// The engine signals are routed to.
    #[must_use]
    pub const fn engine(&self) -> &Arc<PromotionEngine> {
        &self.engine
    }

    /// Validates and handles one signal in JSON form. Invalid signals are
    /// logged and counted, and never reach the engine.
    pub async fn handle(&self, value: &serde_json::Value) -> Result<SignalOutcome, PromotionError> {
        match parse_signal(value) {
            Ok(signal) => self.dispatch(signal).await,
            Err(err) => {
                self.report_invalid(&err);
                Err(err.into())
            }
        }
    }

    /// Handles an already-parsed signal.
    pub async fn dispatch(&self, signal: Signal) -> Result<SignalOutcome, PromotionError> {
        if let Err(err) = signal.validate() {
            self.report_invalid(&err);
            return Err(err.into());
        }
        debug!(kind = signal.kind(), digest = %signal.digest(), "Dispatching signal");

        match signal {
            Signal::BuildSucceeded {
                digest, sequence, ..
            } => self.engine.on_build(digest, sequence).await.map(SignalOutcome::Build),
            Signal::RequestApproved {
                to_environment,
                digest,
            } => self
                .engine
                .on_approval(to_environment, &digest)
                .await
                .map(SignalOutcome::Applied),
            Signal::RequestRejected {
                to_environment,
                digest,
            } => self
                .engine
                .on_rejection(to_environment, &digest)
                .await
                .map(SignalOutcome::Rejected),
        }
    }

    /// Handles signals from `signals` one at a time, in arrival order, until
    /// the stream ends. Failures are logged and counted; they do not stop
    /// the run.
    pub async fn run<S>(&self, signals: S) -> RunSummary
    where
        S: Stream<Item = serde_json::Value>,
    {
        let mut summary = RunSummary::default();
        let mut signals = std::pin::pin!(signals);

        while let Some(value) = signals.next().await {
            match self.handle(&value).await {
                Ok(_) => summary.handled += 1,
                Err(PromotionError::InvalidSignal(_)) => summary.invalid += 1,
                Err(err) => {
                    warn!(code = err.code(), error = %err, "Signal handling failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    fn report_invalid(&self, err: &InvalidSignalError) {
        warn!(kind = ?err.kind, reason = %err.reason, "Rejected invalid signal");
        self.engine.metrics().record_signal_rejected();
        self.engine
            .sink()
            .try_emit(&PromotionEvent::signal_rejected(&err.reason, err.kind.as_deref()));
    }
}
