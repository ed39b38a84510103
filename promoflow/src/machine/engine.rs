//! The promotion engine.
//!
//! The engine turns build, approval and rejection signals into digest
//! writes and change proposals. Evaluation of a pair runs under the target
//! environment's lock; every target has exactly one upstream, so the target
//! lock serializes the pair. Locks are taken one at a time in promotion
//! order and never held across a cascade into the next hop.

use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decision::{decide, Decision, PairSnapshot};
use crate::config::EngineConfig;
use crate::core::{
    expected_revision, Digest, DigestRecord, Environment, ExternalRequestHandle, PairState,
    PromotionEvent, PromotionPair, PromotionRequest, RequestStatus, Source,
};
use crate::errors::{InvalidSignalError, PromotionError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::{AlarmBoard, AlarmKind, OperatorAlarm, PromotionMetrics, SpanTimer};
use crate::requests::{RequestEmitter, RequestLedger};
use crate::retry::retry_with_backoff;
use crate::store::DigestStore;

/// What happened to a build signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// `dev` now records the digest under a new revision.
    Written(DigestRecord),
    /// `dev` already recorded the digest; nothing was written.
    Unchanged(DigestRecord),
    /// A newer build was already accepted; the digest was discarded.
    Stale {
        /// Sequence of the discarded build.
        sequence: u64,
        /// Latest accepted sequence.
        latest: u64,
    },
}

impl BuildOutcome {
    /// The record `dev` holds after the build, unless it was discarded.
    #[must_use]
    pub const fn record(&self) -> Option<&DigestRecord> {
        match self {
            Self::Written(record) | Self::Unchanged(record) => Some(record),
            Self::Stale { .. } => None,
        }
    }
}

/// Drives digests through dev, stage and prod.
pub struct PromotionEngine {
    store: Arc<dyn DigestStore>,
    emitter: Arc<dyn RequestEmitter>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<PromotionMetrics>,
    alarms: Arc<AlarmBoard>,
    config: EngineConfig,
    ledger: RequestLedger,
    locks: HashMap<Environment, Mutex<()>>,
    pair_states: DashMap<PromotionPair, PairState>,
    next_sequence: AtomicU64,
    latest_build: AtomicU64,
}

impl std::fmt::Debug for PromotionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionEngine")
            .field("config", &self.config)
            .field("requests", &self.ledger.len())
            .field("latest_build", &self.latest_build.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl PromotionEngine {
    /// Creates an engine over a store and an emitter with default settings.
    #[must_use]
    pub fn new(store: Arc<dyn DigestStore>, emitter: Arc<dyn RequestEmitter>) -> Self {
        Self {
            store,
            emitter,
            sink: Arc::new(NoOpEventSink),
            metrics: Arc::new(PromotionMetrics::new()),
            alarms: Arc::new(AlarmBoard::new()),
            config: EngineConfig::default(),
            ledger: RequestLedger::new(),
            locks: Environment::ALL.iter().map(|e| (*e, Mutex::new(()))).collect(),
            pair_states: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            latest_build: AtomicU64::new(0),
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shares a metrics registry with the engine.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<PromotionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Shares an alarm board with the engine.
    #[must_use]
    pub fn with_alarms(mut self, alarms: Arc<AlarmBoard>) -> Self {
        self.alarms = alarms;
        self
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The request ledger.
    #[must_use]
    pub const fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }

    /// The metrics registry.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<PromotionMetrics> {
        &self.metrics
    }

    /// The operator alarm board.
    #[must_use]
    pub const fn alarms(&self) -> &Arc<AlarmBoard> {
        &self.alarms
    }

    /// The event sink.
    #[must_use]
    pub const fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// The digest store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn DigestStore> {
        &self.store
    }

    /// Records a successful build in `dev` and evaluates `dev -> stage`.
    ///
    /// `sequence` orders near-simultaneous builds; when absent, one is
    /// assigned on arrival. A build older than the latest accepted one is
    /// discarded.
    pub async fn on_build(
        &self,
        digest: Digest,
        sequence: Option<u64>,
    ) -> Result<BuildOutcome, PromotionError> {
        let sequence = self.ingest_sequence(sequence);
        let outcome = {
            let _guard = self.lock(Environment::Dev).await;
            self.write_build(digest, sequence).await?
        };

        if let (Some(record), Some(pair)) = (outcome.record(), PromotionPair::out_of(Environment::Dev)) {
            self.follow_up(pair, &record.digest).await;
        }
        Ok(outcome)
    }

    /// Approves the pending request for `(to, digest)` and writes the digest
    /// into `to`. On success the next hop is evaluated; a failure there is
    /// alarmed and does not fail the approval.
    pub async fn on_approval(
        &self,
        to: Environment,
        digest: &Digest,
    ) -> Result<DigestRecord, PromotionError> {
        let pair = pair_into(to)?;
        let record = {
            let _guard = self.lock(to).await;
            let request = match self.ledger.latest_for(to, digest) {
                Some(r) if r.is_pending() => self.approve(&r)?,
                Some(r) if r.status == RequestStatus::Approved => {
                    debug!(to = %to, digest = %digest, "Duplicate approval");
                    r
                }
                _ => return Err(no_match(to, digest)),
            };
            self.apply_locked(pair, request).await?
        };

        self.cascade(&record).await;
        Ok(record)
    }

    /// Rejects the pending request for `(to, digest)`. The digest is not
    /// proposed into `to` again.
    pub async fn on_rejection(
        &self,
        to: Environment,
        digest: &Digest,
    ) -> Result<PromotionRequest, PromotionError> {
        pair_into(to)?;
        let _guard = self.lock(to).await;

        let pending = self
            .ledger
            .pending_for(to)
            .filter(|r| &r.digest == digest)
            .ok_or_else(|| no_match(to, digest))?;
        let rejected = self
            .ledger
            .transition(pending.id, RequestStatus::Rejected)
            .ok_or_else(|| no_match(to, digest))?;

        self.metrics.record_request(RequestStatus::Rejected);
        self.sink.try_emit(&PromotionEvent::rejected(&rejected));
        info!(from = %rejected.from, to = %to, digest = %digest, "Promotion rejected");
        Ok(rejected)
    }

    /// Retries writing the oldest approved-but-unapplied request for `to`.
    pub async fn reapply(&self, to: Environment) -> Result<DigestRecord, PromotionError> {
        let pair = pair_into(to)?;
        let record = {
            let _guard = self.lock(to).await;
            let request = self
                .ledger
                .unapplied_for(to)
                .ok_or(PromotionError::NothingToApply { to })?;
            info!(to = %to, digest = %request.digest, request_id = %request.id, "Re-applying approved promotion");
            self.apply_locked(pair, request).await?
        };

        self.cascade(&record).await;
        Ok(record)
    }

    /// Evaluates one pair and acts on the decision.
    ///
    /// Evaluating again without new signals has no further side effects.
    pub async fn evaluate(&self, pair: PromotionPair) -> Result<Decision, PromotionError> {
        let _guard = self.lock(pair.to).await;
        let timer = SpanTimer::start("evaluate");

        let snapshot = self.snapshot(pair).await?;
        let decision = decide(&snapshot);
        self.observe_state(pair, decision.state());
        debug!(
            pair = %pair,
            decision = ?decision,
            duration_ms = timer.elapsed_ms(),
            "Evaluated pair"
        );

        match &decision {
            Decision::Propose { digest, .. } => self.propose(pair, digest).await,
            Decision::RetryEmit { request } => {
                if let Some(request) = self.ledger.get(*request) {
                    self.emit_proposal(&request).await;
                }
            }
            other => {
                let candidate = snapshot.from.as_ref().map(|r| &r.digest);
                if let (Some(stale), Some(by)) = (other.stale_request(), candidate) {
                    if let Some(old) = self.ledger.transition(stale, RequestStatus::Superseded) {
                        self.retire(&old, by).await;
                    }
                }
            }
        }
        Ok(decision)
    }

    /// Evaluates every pair in promotion order.
    pub async fn evaluate_all(&self) -> Result<Vec<(PromotionPair, Decision)>, PromotionError> {
        let mut decisions = Vec::new();
        for pair in PromotionPair::all() {
            decisions.push((pair, self.evaluate(pair).await?));
        }
        Ok(decisions)
    }

    /// Current state of a pair, without acting on it.
    pub async fn pair_state(&self, pair: PromotionPair) -> Result<PairState, PromotionError> {
        let _guard = self.lock(pair.to).await;
        let snapshot = self.snapshot(pair).await?;
        Ok(decide(&snapshot).state())
    }

    /// Reads everything the decision function needs for `pair`.
    pub async fn snapshot(&self, pair: PromotionPair) -> Result<PairSnapshot, PromotionError> {
        let from = self.timed("read", self.store.read(pair.from)).await?;
        let to = self.timed("read", self.store.read(pair.to)).await?;
        Ok(PairSnapshot {
            pair,
            from,
            to,
            requests: self.ledger.history(pair.to),
        })
    }

    async fn lock(&self, env: Environment) -> tokio::sync::MutexGuard<'_, ()> {
        // Every environment is inserted in `new`.
        self.locks[&env].lock().await
    }

    fn ingest_sequence(&self, supplied: Option<u64>) -> u64 {
        match supplied {
            Some(sequence) => {
                self.next_sequence.fetch_max(sequence, Ordering::SeqCst);
                sequence
            }
            None => self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    async fn timed<T, E, F>(&self, operation: &str, future: F) -> Result<T, PromotionError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<PromotionError>,
    {
        match tokio::time::timeout(self.config.io_timeout(), future).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(PromotionError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.config.io_timeout_ms,
            }),
        }
    }

    /// Writes a build into `dev`. Caller holds the `dev` lock.
    async fn write_build(&self, digest: Digest, sequence: u64) -> Result<BuildOutcome, PromotionError> {
        let latest = self.latest_build.load(Ordering::SeqCst);
        if sequence < latest {
            self.metrics.record_stale_build();
            self.sink
                .try_emit(&PromotionEvent::stale_discarded(&digest, sequence, latest));
            warn!(digest = %digest, sequence, latest, "Discarding build older than latest accepted");
            return Ok(BuildOutcome::Stale { sequence, latest });
        }

        let outcome = retry_with_backoff(
            &self.config.cas_retry,
            "write_build",
            self.config.io_timeout(),
            |_| {
                let store = Arc::clone(&self.store);
                let digest = digest.clone();
                async move {
                    let current = store.read(Environment::Dev).await?;
                    if let Some(record) = current.as_ref().filter(|r| r.digest == digest) {
                        return Ok(BuildOutcome::Unchanged(record.clone()));
                    }
                    let record = store
                        .write(Environment::Dev, &digest, Source::Build, expected_revision(current.as_ref()))
                        .await?;
                    Ok::<_, PromotionError>(BuildOutcome::Written(record))
                }
            },
        )
        .await;

        let written = match outcome.result {
            Ok(written) => written,
            Err(err) => {
                let exhausted = PromotionError::BuildWriteExhausted {
                    digest: digest.clone(),
                    attempts: outcome.attempts,
                    last_error: err.to_string(),
                };
                self.metrics.record_build_failure();
                self.raise_alarm(
                    AlarmKind::BuildWriteExhausted,
                    Environment::Dev,
                    &digest,
                    exhausted.to_string(),
                );
                return Err(exhausted);
            }
        };
        self.latest_build.fetch_max(sequence, Ordering::SeqCst);

        match written {
            BuildOutcome::Written(record) => {
                self.metrics.record_digest(&record);
                self.sink.try_emit(&PromotionEvent::written(&record));
                info!(
                    to = %record.environment,
                    digest = %record.digest,
                    revision = record.revision,
                    sequence,
                    "Build recorded"
                );
                Ok(BuildOutcome::Written(record))
            }
            unchanged => {
                debug!(digest = %digest, sequence, "Build already recorded");
                Ok(unchanged)
            }
        }
    }

    fn observe_state(&self, pair: PromotionPair, state: PairState) {
        let previous = self.pair_states.insert(pair, state);
        if previous != Some(state) {
            self.metrics.record_transition(pair, state);
            debug!(pair = %pair, previous = ?previous, state = %state, "Pair state changed");
        }
    }

    /// Opens a request for `digest`, superseding whatever was pending.
    async fn propose(&self, pair: PromotionPair, digest: &Digest) {
        let request = PromotionRequest::new(pair, digest.clone());
        let superseded = self.ledger.open(request.clone());
        self.metrics.record_request(RequestStatus::Pending);
        info!(from = %pair.from, to = %pair.to, digest = %digest, request_id = %request.id, "Promotion proposed");

        for old in &superseded {
            self.retire(old, digest).await;
        }
        self.emit_proposal(&request).await;
        self.observe_state(pair, PairState::Proposed);
    }

    /// Reports a superseded request and closes its proposal.
    async fn retire(&self, old: &PromotionRequest, by: &Digest) {
        self.metrics.record_request(RequestStatus::Superseded);
        self.sink.try_emit(&PromotionEvent::superseded(old, by));
        info!(
            from = %old.from,
            to = %old.to,
            digest = %old.digest,
            superseded_by = %by,
            "Promotion superseded"
        );
        if let Some(handle) = &old.handle {
            self.withdraw_proposal(old, handle).await;
        }
    }

    async fn emit_proposal(&self, request: &PromotionRequest) {
        let outcome = retry_with_backoff(
            &self.config.emit_retry,
            "emit",
            self.config.io_timeout(),
            |_| {
                let emitter = Arc::clone(&self.emitter);
                let request = request.clone();
                async move { emitter.emit(&request).await.map_err(PromotionError::from) }
            },
        )
        .await;

        match outcome.result {
            Ok(handle) => {
                let created = handle.created;
                if let Some(updated) = self.ledger.set_handle(request.id, handle) {
                    self.sink.try_emit(&PromotionEvent::proposed(&updated));
                    info!(
                        to = %updated.to,
                        digest = %updated.digest,
                        locator = updated.handle.as_ref().map_or("", |h| h.locator.as_str()),
                        created,
                        "Change proposal open"
                    );
                }
            }
            Err(err) => {
                self.metrics.record_emit_failure();
                self.raise_alarm(
                    AlarmKind::EmitExhausted,
                    request.to,
                    &request.digest,
                    format!("opening proposal failed after {} attempts: {err}", outcome.attempts),
                );
            }
        }
    }

    async fn withdraw_proposal(&self, request: &PromotionRequest, handle: &ExternalRequestHandle) {
        let outcome = retry_with_backoff(
            &self.config.emit_retry,
            "withdraw",
            self.config.io_timeout(),
            |_| {
                let emitter = Arc::clone(&self.emitter);
                let handle = handle.clone();
                async move { emitter.withdraw(&handle).await.map_err(PromotionError::from) }
            },
        )
        .await;

        if let Err(err) = outcome.result {
            self.raise_alarm(
                AlarmKind::WithdrawExhausted,
                request.to,
                &request.digest,
                format!("closing proposal {} failed: {err}", handle.locator),
            );
        }
    }

    fn approve(&self, pending: &PromotionRequest) -> Result<PromotionRequest, PromotionError> {
        let approved = self
            .ledger
            .transition(pending.id, RequestStatus::Approved)
            .ok_or_else(|| no_match(pending.to, &pending.digest))?;
        self.metrics.record_request(RequestStatus::Approved);
        self.sink.try_emit(&PromotionEvent::approved(&approved));
        info!(from = %approved.from, to = %approved.to, digest = %approved.digest, "Promotion approved");
        Ok(approved)
    }

    /// Writes an approved request into its target. Caller holds the target lock.
    async fn apply_locked(
        &self,
        pair: PromotionPair,
        request: PromotionRequest,
    ) -> Result<DigestRecord, PromotionError> {
        if request.applied_revision.is_some() {
            let current = self.timed("read", self.store.read(pair.to)).await?;
            return current
                .filter(|r| r.digest == request.digest)
                .ok_or_else(|| no_match(pair.to, &request.digest));
        }

        let outcome = retry_with_backoff(
            &self.config.cas_retry,
            "apply",
            self.config.io_timeout(),
            |attempt| {
                let store = Arc::clone(&self.store);
                let digest = request.digest.clone();
                async move {
                    let upstream = store.read(pair.from).await?;
                    if upstream.as_ref().map(|r| &r.digest) != Some(&digest) {
                        return Err(PromotionError::SourceChanged {
                            from: pair.from,
                            to: pair.to,
                            expected: digest,
                            actual: upstream.map(|r| r.digest),
                        });
                    }

                    let current = store.read(pair.to).await?;
                    let source = Source::Promoted(pair.from);
                    if let Some(record) = current
                        .as_ref()
                        .filter(|r| r.digest == digest && r.source == source)
                    {
                        return Ok(record.clone());
                    }
                    if attempt > 0 {
                        debug!(to = %pair.to, digest = %digest, attempt, "Retrying apply");
                    }
                    let record = store
                        .write(pair.to, &digest, source, expected_revision(current.as_ref()))
                        .await?;
                    Ok::<_, PromotionError>(record)
                }
            },
        )
        .await;

        match outcome.result {
            Ok(record) => {
                let applied = self
                    .ledger
                    .mark_applied(request.id, record.revision)
                    .unwrap_or(request);
                self.metrics.record_digest(&record);
                self.observe_state(pair, PairState::Promoted);
                self.sink.try_emit(&PromotionEvent::written(&record));
                self.sink.try_emit(&PromotionEvent::applied(&applied, &record));
                info!(
                    from = %pair.from,
                    to = %pair.to,
                    digest = %record.digest,
                    revision = record.revision,
                    "Promotion applied"
                );
                Ok(record)
            }
            Err(err @ PromotionError::SourceChanged { .. }) => {
                self.metrics.record_apply_failure();
                self.raise_alarm(AlarmKind::SourceChanged, pair.to, &request.digest, err.to_string());
                Err(err)
            }
            Err(err) => {
                let exhausted = PromotionError::ApplyExhausted {
                    to: pair.to,
                    digest: request.digest.clone(),
                    attempts: outcome.attempts,
                    last_error: err.to_string(),
                };
                self.metrics.record_apply_failure();
                self.raise_alarm(
                    AlarmKind::ApplyExhausted,
                    pair.to,
                    &request.digest,
                    exhausted.to_string(),
                );
                Err(exhausted)
            }
        }
    }

    async fn cascade(&self, applied: &DigestRecord) {
        if !self.config.cascade_on_apply {
            return;
        }
        if let Some(next) = PromotionPair::out_of(applied.environment) {
            self.follow_up(next, &applied.digest).await;
        }
    }

    /// Evaluates the hop after a completed write. The write stands either
    /// way, so a failure here is alarmed rather than returned.
    async fn follow_up(&self, pair: PromotionPair, digest: &Digest) {
        if let Err(err) = self.evaluate(pair).await {
            warn!(pair = %pair, code = err.code(), error = %err, "Follow-up evaluation failed");
            self.metrics.record_cascade_failure();
            self.raise_alarm(
                AlarmKind::CascadeFailed,
                pair.to,
                digest,
                format!("evaluating {pair} failed: {err}"),
            );
        }
    }

    fn raise_alarm(
        &self,
        kind: AlarmKind,
        to: Environment,
        digest: &Digest,
        message: String,
    ) -> OperatorAlarm {
        let alarm = self.alarms.raise(kind, to, digest, message);
        self.sink.try_emit(&alarm_event(&alarm));
        alarm
    }

    /// Acknowledges an operator alarm.
    pub fn acknowledge_alarm(&self, id: Uuid) -> bool {
        self.alarms.acknowledge(id)
    }
}

fn pair_into(to: Environment) -> Result<PromotionPair, PromotionError> {
    PromotionPair::into_target(to).ok_or_else(|| {
        InvalidSignalError::new(format!("{to} has no upstream and cannot be a promotion target"))
            .into()
    })
}

fn no_match(to: Environment, digest: &Digest) -> PromotionError {
    PromotionError::NoMatchingRequest {
        to,
        digest: digest.clone(),
    }
}

fn alarm_event(alarm: &OperatorAlarm) -> PromotionEvent {
    PromotionEvent::new("alarm.raised")
        .add_data("alarm_id", json!(alarm.id.to_string()))
        .add_data("kind", json!(alarm.kind))
        .add_data("to", json!(alarm.to))
        .add_data("digest", json!(alarm.digest))
        .add_data("message", json!(alarm.message))
        .add_data("occurrences", json!(alarm.occurrences))
}
