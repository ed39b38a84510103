//! Promotion requests and handles to their external change proposals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Digest, Environment, PromotionPair, RequestStatus};

/// Handle to a change proposal opened in an external review system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRequestHandle {
    /// Idempotency key the proposal was opened under.
    pub key: String,
    /// Locator in the external system (URL, path, PR number).
    pub locator: String,
    /// False when an already-open proposal was returned instead of a new one.
    pub created: bool,
}

/// A request to promote `digest` from `from` into `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRequest {
    /// Unique request ID.
    pub id: Uuid,
    /// Upstream environment.
    pub from: Environment,
    /// Target environment.
    pub to: Environment,
    /// Digest to promote.
    pub digest: Digest,
    /// Current status.
    pub status: RequestStatus,
    /// External proposal, once emitted.
    pub handle: Option<ExternalRequestHandle>,
    /// Target revision written when the approval was applied.
    pub applied_revision: Option<u64>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the request last changed.
    pub updated_at: DateTime<Utc>,
}

impl PromotionRequest {
    /// Creates a new pending request.
    #[must_use]
    pub fn new(pair: PromotionPair, digest: Digest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            from: pair.from,
            to: pair.to,
            digest,
            status: RequestStatus::Pending,
            handle: None,
            applied_revision: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The pair this request promotes across.
    #[must_use]
    pub const fn pair(&self) -> PromotionPair {
        PromotionPair {
            from: self.from,
            to: self.to,
        }
    }

    /// Returns true if the request is still waiting for approval.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Returns true if approved but not yet written into `to`.
    #[must_use]
    pub fn is_unapplied(&self) -> bool {
        self.status == RequestStatus::Approved && self.applied_revision.is_none()
    }

    /// Returns true if the request targets `to` with `digest`.
    #[must_use]
    pub fn matches(&self, to: Environment, digest: &Digest) -> bool {
        self.to == to && &self.digest == digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> PromotionPair {
        PromotionPair {
            from: Environment::Dev,
            to: Environment::Stage,
        }
    }

    #[test]
    fn test_new_request_is_pending() {
        let req = PromotionRequest::new(pair(), Digest::parse("sha256:aaa").unwrap());
        assert!(req.is_pending());
        assert!(!req.is_unapplied());
        assert!(req.handle.is_none());
        assert_eq!(req.pair(), pair());
    }

    #[test]
    fn test_unapplied() {
        let mut req = PromotionRequest::new(pair(), Digest::parse("sha256:aaa").unwrap());
        req.status = RequestStatus::Approved;
        assert!(req.is_unapplied());

        req.applied_revision = Some(1);
        assert!(!req.is_unapplied());
    }

    #[test]
    fn test_matches() {
        let digest = Digest::parse("sha256:aaa").unwrap();
        let req = PromotionRequest::new(pair(), digest.clone());
        assert!(req.matches(Environment::Stage, &digest));
        assert!(!req.matches(Environment::Prod, &digest));
        assert!(!req.matches(Environment::Stage, &Digest::parse("sha256:bbb").unwrap()));
    }
}
