//! Pure promotion decisions over a snapshot of one environment pair.

use uuid::Uuid;

use crate::core::{
    Digest, DigestRecord, PairState, PromotionPair, PromotionRequest, RequestStatus,
};

/// Everything the engine knows about one pair at evaluation time.
#[derive(Debug, Clone)]
pub struct PairSnapshot {
    /// The pair being evaluated.
    pub pair: PromotionPair,
    /// Current record of the upstream environment.
    pub from: Option<DigestRecord>,
    /// Current record of the target environment.
    pub to: Option<DigestRecord>,
    /// Every request ever opened into the target, oldest first.
    pub requests: Vec<PromotionRequest>,
}

impl PairSnapshot {
    /// The request currently pending for the target, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&PromotionRequest> {
        self.requests.iter().find(|r| r.is_pending())
    }

    /// The most recent request for `digest`, in any status.
    #[must_use]
    pub fn latest_for(&self, digest: &Digest) -> Option<&PromotionRequest> {
        self.requests
            .iter()
            .filter(|r| &r.digest == digest)
            .max_by_key(|r| (r.created_at, r.id))
    }
}

/// What the engine should do for a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The upstream has no digest yet.
    Idle,
    /// The target already runs the candidate, now or earlier.
    AlreadyPromoted {
        /// Pending request for an older candidate, to supersede.
        stale: Option<Uuid>,
    },
    /// The candidate's request is pending and its proposal is open.
    AlreadyProposed {
        /// The pending request.
        request: Uuid,
    },
    /// The candidate's request is pending but its proposal was never opened.
    RetryEmit {
        /// The pending request.
        request: Uuid,
    },
    /// The candidate was approved but not yet written into the target.
    AwaitingApply {
        /// The approved request.
        request: Uuid,
        /// Pending request for an older candidate, to supersede.
        stale: Option<Uuid>,
    },
    /// The candidate was rejected for this target.
    Rejected {
        /// The rejected request.
        request: Uuid,
        /// Pending request for an older candidate, to supersede.
        stale: Option<Uuid>,
    },
    /// Open a request for the candidate.
    Propose {
        /// The candidate.
        digest: Digest,
        /// Pending request to supersede first.
        supersede: Option<Uuid>,
    },
}

impl Decision {
    /// The pair state this decision corresponds to.
    #[must_use]
    pub const fn state(&self) -> PairState {
        match self {
            Self::Idle | Self::Rejected { .. } => PairState::Idle,
            Self::AlreadyPromoted { .. } => PairState::Promoted,
            Self::AlreadyProposed { .. } | Self::RetryEmit { .. } | Self::AwaitingApply { .. } => {
                PairState::Proposed
            }
            Self::Propose { .. } => PairState::CandidateAvailable,
        }
    }

    /// A pending request for an outdated candidate that must be superseded.
    #[must_use]
    pub const fn stale_request(&self) -> Option<Uuid> {
        match self {
            Self::AlreadyPromoted { stale }
            | Self::AwaitingApply { stale, .. }
            | Self::Rejected { stale, .. } => *stale,
            Self::Propose { supersede, .. } => *supersede,
            Self::Idle | Self::AlreadyProposed { .. } | Self::RetryEmit { .. } => None,
        }
    }

    /// Returns true if acting on the decision changes nothing.
    #[must_use]
    pub const fn is_quiescent(&self) -> bool {
        match self {
            Self::Idle | Self::AlreadyProposed { .. } => true,
            Self::RetryEmit { .. } | Self::Propose { .. } => false,
            Self::AlreadyPromoted { stale }
            | Self::AwaitingApply { stale, .. }
            | Self::Rejected { stale, .. } => stale.is_none(),
        }
    }
}

/// Decides what to do for a pair. Never blocks and has no side effects.
#[must_use]
pub fn decide(snapshot: &PairSnapshot) -> Decision {
    let Some(candidate) = snapshot.from.as_ref().map(|r| &r.digest) else {
        return Decision::Idle;
    };

    let pending = snapshot.pending();
    if let Some(request) = pending.filter(|r| &r.digest == candidate) {
        return if request.handle.is_some() {
            Decision::AlreadyProposed { request: request.id }
        } else {
            Decision::RetryEmit { request: request.id }
        };
    }
    // Anything still pending now carries an outdated digest.
    let stale = pending.map(|r| r.id);

    if snapshot.to.as_ref().is_some_and(|r| &r.digest == candidate) {
        return Decision::AlreadyPromoted { stale };
    }

    match snapshot.latest_for(candidate) {
        Some(r) if r.status == RequestStatus::Approved && r.applied_revision.is_some() => {
            Decision::AlreadyPromoted { stale }
        }
        Some(r) if r.status == RequestStatus::Approved => Decision::AwaitingApply {
            request: r.id,
            stale,
        },
        Some(r) if r.status == RequestStatus::Rejected => Decision::Rejected {
            request: r.id,
            stale,
        },
        _ => Decision::Propose {
            digest: candidate.clone(),
            supersede: stale,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Environment, ExternalRequestHandle, Source};
    use pretty_assertions::assert_eq;

    fn digest(s: &str) -> Digest {
        Digest::parse(s).unwrap()
    }

    fn stage_prod() -> PromotionPair {
        PromotionPair::into_target(Environment::Prod).unwrap()
    }

    fn record(env: Environment, d: &str, source: Source) -> DigestRecord {
        DigestRecord::new(env, digest(d), source, 1)
    }

    fn snapshot(from: Option<&str>, to: Option<&str>) -> PairSnapshot {
        PairSnapshot {
            pair: stage_prod(),
            from: from.map(|d| record(Environment::Stage, d, Source::Promoted(Environment::Dev))),
            to: to.map(|d| record(Environment::Prod, d, Source::Promoted(Environment::Stage))),
            requests: Vec::new(),
        }
    }

    fn request(d: &str, status: RequestStatus, emitted: bool) -> PromotionRequest {
        let mut req = PromotionRequest::new(stage_prod(), digest(d));
        req.status = status;
        if emitted {
            req.handle = Some(ExternalRequestHandle {
                key: "k".to_string(),
                locator: "memory://proposals/1".to_string(),
                created: true,
            });
        }
        req
    }

    #[test]
    fn test_empty_upstream_is_idle() {
        let decision = decide(&snapshot(None, None));
        assert_eq!(decision, Decision::Idle);
        assert_eq!(decision.state(), PairState::Idle);
        assert!(decision.is_quiescent());
    }

    #[test]
    fn test_new_candidate_is_proposed() {
        assert_eq!(
            decide(&snapshot(Some("sha256:aaa"), None)),
            Decision::Propose {
                digest: digest("sha256:aaa"),
                supersede: None
            }
        );
        assert_eq!(
            decide(&snapshot(Some("sha256:bbb"), Some("sha256:aaa"))).state(),
            PairState::CandidateAvailable
        );
    }

    #[test]
    fn test_target_holding_candidate_is_promoted() {
        let decision = decide(&snapshot(Some("sha256:aaa"), Some("sha256:aaa")));
        assert_eq!(decision, Decision::AlreadyPromoted { stale: None });
        assert!(decision.is_quiescent());
    }

    #[test]
    fn test_pending_same_digest_is_not_reproposed() {
        let mut snap = snapshot(Some("sha256:aaa"), None);
        let req = request("sha256:aaa", RequestStatus::Pending, true);
        snap.requests.push(req.clone());

        assert_eq!(decide(&snap), Decision::AlreadyProposed { request: req.id });
    }

    #[test]
    fn test_pending_without_handle_retries_emit() {
        let mut snap = snapshot(Some("sha256:aaa"), None);
        let req = request("sha256:aaa", RequestStatus::Pending, false);
        snap.requests.push(req.clone());

        let decision = decide(&snap);
        assert_eq!(decision, Decision::RetryEmit { request: req.id });
        assert!(!decision.is_quiescent());
    }

    #[test]
    fn test_newer_candidate_supersedes_pending() {
        let mut snap = snapshot(Some("sha256:bbb"), None);
        let old = request("sha256:aaa", RequestStatus::Pending, true);
        snap.requests.push(old.clone());

        let decision = decide(&snap);
        assert_eq!(
            decision,
            Decision::Propose {
                digest: digest("sha256:bbb"),
                supersede: Some(old.id)
            }
        );
        assert_eq!(decision.stale_request(), Some(old.id));
    }

    #[test]
    fn test_rejected_candidate_is_not_reproposed() {
        let mut snap = snapshot(Some("sha256:aaa"), None);
        let req = request("sha256:aaa", RequestStatus::Rejected, true);
        snap.requests.push(req.clone());

        let decision = decide(&snap);
        assert_eq!(decision, Decision::Rejected { request: req.id, stale: None });
        assert_eq!(decision.state(), PairState::Idle);
    }

    #[test]
    fn test_superseded_candidate_can_return() {
        let mut snap = snapshot(Some("sha256:aaa"), None);
        snap.requests.push(request("sha256:aaa", RequestStatus::Superseded, true));

        assert!(matches!(decide(&snap), Decision::Propose { supersede: None, .. }));
    }

    #[test]
    fn test_approved_unapplied_awaits_apply() {
        let mut snap = snapshot(Some("sha256:aaa"), None);
        let req = request("sha256:aaa", RequestStatus::Approved, true);
        snap.requests.push(req.clone());

        let decision = decide(&snap);
        assert_eq!(decision, Decision::AwaitingApply { request: req.id, stale: None });
        assert_eq!(decision.state(), PairState::Proposed);
    }

    #[test]
    fn test_previously_applied_triple_is_not_reproposed() {
        // stage went aaa -> bbb -> aaa; prod took aaa earlier and then bbb.
        let mut snap = snapshot(Some("sha256:aaa"), Some("sha256:bbb"));
        let mut applied = request("sha256:aaa", RequestStatus::Approved, true);
        applied.applied_revision = Some(1);
        snap.requests.push(applied);

        assert_eq!(decide(&snap), Decision::AlreadyPromoted { stale: None });
    }

    #[test]
    fn test_promoted_candidate_flags_stale_pending() {
        let mut snap = snapshot(Some("sha256:aaa"), Some("sha256:aaa"));
        let old = request("sha256:bbb", RequestStatus::Pending, true);
        snap.requests.push(old.clone());

        let decision = decide(&snap);
        assert_eq!(decision, Decision::AlreadyPromoted { stale: Some(old.id) });
        assert!(!decision.is_quiescent());
    }
}
