//! Ledger of promotion requests.
//!
//! The ledger owns the "at most one pending request per target" invariant:
//! opening a request atomically supersedes whatever was pending for the same
//! target.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::{Digest, Environment, ExternalRequestHandle, PromotionRequest, RequestStatus};

/// In-process record of every promotion request and its status.
#[derive(Debug, Default)]
pub struct RequestLedger {
    requests: RwLock<HashMap<Uuid, PromotionRequest>>,
}

impl RequestLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `request` as pending and supersedes any other pending request
    /// for the same target. Returns the superseded requests.
    pub fn open(&self, request: PromotionRequest) -> Vec<PromotionRequest> {
        let mut requests = self.requests.write();
        let now = Utc::now();
        let mut superseded = Vec::new();
        for existing in requests.values_mut() {
            if existing.to == request.to && existing.is_pending() {
                existing.status = RequestStatus::Superseded;
                existing.updated_at = now;
                superseded.push(existing.clone());
            }
        }
        requests.insert(request.id, request);
        superseded
    }

    /// Moves a request to `status` if the transition is legal.
    pub fn transition(&self, id: Uuid, status: RequestStatus) -> Option<PromotionRequest> {
        let mut requests = self.requests.write();
        let request = requests.get_mut(&id)?;
        if !request.status.can_transition_to(status) {
            return None;
        }
        request.status = status;
        request.updated_at = Utc::now();
        Some(request.clone())
    }

    /// Attaches the external proposal handle.
    pub fn set_handle(&self, id: Uuid, handle: ExternalRequestHandle) -> Option<PromotionRequest> {
        let mut requests = self.requests.write();
        let request = requests.get_mut(&id)?;
        request.handle = Some(handle);
        request.updated_at = Utc::now();
        Some(request.clone())
    }

    /// Marks an approved request as written into its target.
    pub fn mark_applied(&self, id: Uuid, revision: u64) -> Option<PromotionRequest> {
        let mut requests = self.requests.write();
        let request = requests.get_mut(&id)?;
        if request.status != RequestStatus::Approved {
            return None;
        }
        request.applied_revision = Some(revision);
        request.updated_at = Utc::now();
        Some(request.clone())
    }

    /// Gets a request by ID.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<PromotionRequest> {
        self.requests.read().get(&id).cloned()
    }

    /// The pending request for `to`, if any.
    #[must_use]
    pub fn pending_for(&self, to: Environment) -> Option<PromotionRequest> {
        self.requests
            .read()
            .values()
            .find(|r| r.to == to && r.is_pending())
            .cloned()
    }

    /// The most recent request for `(to, digest)`, in any status.
    #[must_use]
    pub fn latest_for(&self, to: Environment, digest: &Digest) -> Option<PromotionRequest> {
        self.requests
            .read()
            .values()
            .filter(|r| r.matches(to, digest))
            .max_by_key(|r| (r.created_at, r.id))
            .cloned()
    }

    /// The oldest approved-but-unapplied request for `to`, if any.
    #[must_use]
    pub fn unapplied_for(&self, to: Environment) -> Option<PromotionRequest> {
        self.requests
            .read()
            .values()
            .filter(|r| r.to == to && r.is_unapplied())
            .min_by_key(|r| (r.created_at, r.id))
            .cloned()
    }

    /// All requests for `to`, oldest first.
    #[must_use]
    pub fn history(&self, to: Environment) -> Vec<PromotionRequest> {
        let mut history: Vec<_> = self
            .requests
            .read()
            .values()
            .filter(|r| r.to == to)
            .cloned()
            .collect();
        history.sort_by_key(|r| (r.created_at, r.id));
        history
    }

    /// All pending requests.
    #[must_use]
    pub fn pending(&self) -> Vec<PromotionRequest> {
        let mut pending: Vec<_> = self
            .requests
            .read()
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.to);
        pending
    }

    /// Total number of requests ever opened.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    /// Returns true if no request was ever opened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }
}
