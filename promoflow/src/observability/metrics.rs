//! Promotion counters and per-environment digest gauges.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::{Digest, DigestRecord, Environment, PairState, PromotionPair, RequestStatus};

/// Counters of transitions per state and pair, plus the recorded digest per environment.
#[derive(Debug, Default)]
pub struct PromotionMetrics {
    transitions: DashMap<(PromotionPair, PairState), AtomicU64>,
    requests: DashMap<RequestStatus, AtomicU64>,
    current: RwLock<BTreeMap<Environment, (Digest, u64)>>,
    signals_rejected: AtomicU64,
    stale_builds: AtomicU64,
    emit_failures: AtomicU64,
    apply_failures: AtomicU64,
    build_failures: AtomicU64,
    cascade_failures: AtomicU64,
}

impl PromotionMetrics {
    /// Creates an empty metrics registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `pair` entered `state`.
    pub fn record_transition(&self, pair: PromotionPair, state: PairState) {
        self.transitions
            .entry((pair, state))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records that a request entered `status`.
    pub fn record_request(&self, status: RequestStatus) {
        self.requests
            .entry(status)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records the digest now stored for an environment.
    pub fn record_digest(&self, record: &DigestRecord) {
        self.current
            .write()
            .insert(record.environment, (record.digest.clone(), record.revision));
    }

    /// Records a rejected upstream signal.
    pub fn record_signal_rejected(&self) {
        self.signals_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a discarded out-of-order build.
    pub fn record_stale_build(&self) {
        self.stale_builds.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exhausted emit.
    pub fn record_emit_failure(&self) {
        self.emit_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exhausted apply.
    pub fn record_apply_failure(&self) {
        self.apply_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of times `pair` entered `state`.
    #[must_use]
    pub fn transitions(&self, pair: PromotionPair, state: PairState) -> u64 {
        self.transitions
            .get(&(pair, state))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Number of requests that entered `status`.
    #[must_use]
    pub fn requests(&self, status: RequestStatus) -> u64 {
        self.requests
            .get(&status)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Digest last recorded for `env`.
    #[must_use]
    pub fn current_digest(&self, env: Environment) -> Option<Digest> {
        self.current.read().get(&env).map(|(d, _)| d.clone())
    }

    /// Number of rejected signals.
    #[must_use]
    pub fn signals_rejected(&self) -> u64 {
        self.signals_rejected.load(Ordering::Relaxed)
    }

    /// Number of discarded stale builds.
    #[must_use]
    pub fn stale_builds(&self) -> u64 {
        self.stale_builds.load(Ordering::Relaxed)
    }

    /// Number of exhausted emits.
    #[must_use]
    pub fn emit_failures(&self) -> u64 {
        self.emit_failures.load(Ordering::Relaxed)
    }

    /// Records a build that could not be written into `dev`.
    pub fn record_build_failure(&self) {
        self.build_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed evaluation of the next hop after a write.
    pub fn record_cascade_failure(&self) {
        self.cascade_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of exhausted applies.
    #[must_use]
    pub fn apply_failures(&self) -> u64 {
        self.apply_failures.load(Ordering::Relaxed)
    }

    /// Number of builds that could not be written.
    #[must_use]
    pub fn build_failures(&self) -> u64 {
        self.build_failures.load(Ordering::Relaxed)
    }

    /// Number of failed follow-up evaluations.
    #[must_use]
    pub fn cascade_failures(&self) -> u64 {
        self.cascade_failures.load(Ordering::Relaxed)
    }

    /// Converts metrics to a JSON snapshot.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let mut transitions = serde_json::Map::new();
        for pair in PromotionPair::all() {
            let mut states = serde_json::Map::new();
            for state in PairState::ALL {
                states.insert(state.to_string(), serde_json::json!(self.transitions(pair, state)));
            }
            transitions.insert(pair.to_string(), serde_json::Value::Object(states));
        }

        let environments: serde_json::Map<String, serde_json::Value> = self
            .current
            .read()
            .iter()
            .map(|(env, (digest, revision))| {
                (
                    env.to_string(),
                    serde_json::json!({"digest": digest, "revision": revision}),
                )
            })
            .collect();

        serde_json::json!({
            "transitions": transitions,
            "environments": environments,
            "signals_rejected": self.signals_rejected(),
            "stale_builds": self.stale_builds(),
            "emit_failures": self.emit_failures(),
            "apply_failures": self.apply_failures(),
            "build_failures": self.build_failures(),
            "cascade_failures": self.cascade_failures(),
        })
    }

    /// Renders the Prometheus text exposition format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP promoflow_pair_transitions_total Transitions into each promotion state per environment pair.\n");
        out.push_str("# TYPE promoflow_pair_transitions_total counter\n");
        for pair in PromotionPair::all() {
            for state in PairState::ALL {
                let _ = writeln!(
                    out,
                    "promoflow_pair_transitions_total{{from=\"{}\",to=\"{}\",state=\"{}\"}} {}",
                    pair.from,
                    pair.to,
                    state,
                    self.transitions(pair, state)
                );
            }
        }

        out.push_str("# HELP promoflow_requests_total Promotion requests entering each status.\n");
        out.push_str("# TYPE promoflow_requests_total counter\n");
        for status in [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Superseded,
        ] {
            let _ = writeln!(
                out,
                "promoflow_requests_total{{status=\"{status}\"}} {}",
                self.requests(status)
            );
        }

        out.push_str("# HELP promoflow_environment_digest_info Digest currently recorded per environment.\n");
        out.push_str("# TYPE promoflow_environment_digest_info gauge\n");
        let current = self.current.read();
        for (env, (digest, _)) in current.iter() {
            let _ = writeln!(
                out,
                "promoflow_environment_digest_info{{environment=\"{env}\",digest=\"{digest}\"}} 1"
            );
        }
        out.push_str("# HELP promoflow_environment_revision Revision of the recorded digest per environment.\n");
        out.push_str("# TYPE promoflow_environment_revision gauge\n");
        for (env, (_, revision)) in current.iter() {
            let _ = writeln!(out, "promoflow_environment_revision{{environment=\"{env}\"}} {revision}");
        }
        drop(current);

        for (name, help, value) in [
            ("promoflow_signals_rejected_total", "Upstream signals rejected as invalid.", self.signals_rejected()),
            ("promoflow_stale_builds_total", "Build signals discarded as older than the latest accepted build.", self.stale_builds()),
            ("promoflow_emit_failures_total", "Change proposals that could not be opened after retries.", self.emit_failures()),
            ("promoflow_apply_failures_total", "Approved promotions that could not be written after retries.", self.apply_failures()),
            ("promoflow_build_failures_total", "Builds that could not be written into dev after retries.", self.build_failures()),
            ("promoflow_cascade_failures_total", "Follow-up evaluations of the next hop that failed.", self.cascade_failures()),
        ] {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }

        out
    }
}
