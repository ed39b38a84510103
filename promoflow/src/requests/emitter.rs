//! Change-proposal emitters.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest as _, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::{Digest, Environment, ExternalRequestHandle, PromotionRequest};
use crate::errors::EmitFailure;

/// Derives the idempotency key of the proposal for `(from, to, digest)`.
#[must_use]
pub fn proposal_key(from: Environment, to: Environment, digest: &Digest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{from}:{to}:{digest}").as_bytes());
    let result = hasher.finalize();
    format!("promo-{from}-{to}-{}", hex::encode(&result[..8]))
}

/// Opens reviewable change proposals for promotion requests.
///
/// `emit` must be idempotent on `(from, to, digest)`: emitting twice returns
/// the already-open proposal instead of creating a second one.
#[async_trait]
pub trait RequestEmitter: Send + Sync {
    /// Opens (or finds) the proposal for `request`.
    async fn emit(&self, request: &PromotionRequest) -> Result<ExternalRequestHandle, EmitFailure>;

    /// Closes a proposal whose request was superseded.
    async fn withdraw(&self, _handle: &ExternalRequestHandle) -> Result<(), EmitFailure> {
        Ok(())
    }
}

/// An open proposal held by [`InMemoryRequestEmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenProposal {
    /// Handle returned to the engine.
    pub handle: ExternalRequestHandle,
    /// Upstream environment.
    pub from: Environment,
    /// Target environment.
    pub to: Environment,
    /// Digest proposed.
    pub digest: Digest,
}

/// Emitter that keeps proposals in memory; the reference implementation.
#[derive(Debug, Default)]
pub struct InMemoryRequestEmitter {
    open: DashMap<String, OpenProposal>,
    created: AtomicU64,
    withdrawn: AtomicU64,
}

impl InMemoryRequestEmitter {
    /// Creates an emitter with no open proposals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of proposals ever created.
    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of proposals withdrawn.
    #[must_use]
    pub fn withdrawn_count(&self) -> u64 {
        self.withdrawn.load(Ordering::SeqCst)
    }

    /// Currently open proposals, ordered by target.
    #[must_use]
    pub fn open_proposals(&self) -> Vec<OpenProposal> {
        let mut open: Vec<_> = self.open.iter().map(|e| e.value().clone()).collect();
        open.sort_by(|a, b| a.to.cmp(&b.to).then_with(|| a.handle.locator.cmp(&b.handle.locator)));
        open
    }

    /// Open proposals targeting `to`.
    #[must_use]
    pub fn open_for(&self, to: Environment) -> Vec<OpenProposal> {
        self.open_proposals().into_iter().filter(|p| p.to == to).collect()
    }
}

#[async_trait]
impl RequestEmitter for InMemoryRequestEmitter {
    async fn emit(&self, request: &PromotionRequest) -> Result<ExternalRequestHandle, EmitFailure> {
        let key = proposal_key(request.from, request.to, &request.digest);
        match self.open.entry(key.clone()) {
            Entry::Occupied(open) => Ok(ExternalRequestHandle {
                created: false,
                ..open.get().handle.clone()
            }),
            Entry::Vacant(slot) => {
                let number = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                let handle = ExternalRequestHandle {
                    key,
                    locator: format!("memory://proposals/{number}"),
                    created: true,
                };
                slot.insert(OpenProposal {
                    handle: handle.clone(),
                    from: request.from,
                    to: request.to,
                    digest: request.digest.clone(),
                });
                Ok(handle)
            }
        }
    }

    async fn withdraw(&self, handle: &ExternalRequestHandle) -> Result<(), EmitFailure> {
        if self.open.remove(&handle.key).is_some() {
            self.withdrawn.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PromotionPair;

    fn request(to: Environment, digest: &str) -> PromotionRequest {
        PromotionRequest::new(
            PromotionPair::into_target(to).unwrap(),
            Digest::parse(digest).unwrap(),
        )
    }

    #[test]
    fn test_proposal_key_is_stable_and_distinct() {
        let aaa = Digest::parse("sha256:aaa").unwrap();
        let bbb = Digest::parse("sha256:bbb").unwrap();
        let key = proposal_key(Environment::Dev, Environment::Stage, &aaa);

        assert_eq!(key, proposal_key(Environment::Dev, Environment::Stage, &aaa));
        assert!(key.starts_with("promo-dev-stage-"));
        assert_ne!(key, proposal_key(Environment::Dev, Environment::Stage, &bbb));
        assert_ne!(key, proposal_key(Environment::Stage, Environment::Prod, &aaa));
    }

    #[tokio::test]
    async fn test_emit_is_idempotent() {
        let emitter = InMemoryRequestEmitter::new();
        let req = request(Environment::Stage, "sha256:aaa");

        let first = emitter.emit(&req).await.unwrap();
        let second = emitter.emit(&req).await.unwrap();
        // A different request object for the same triple maps to the same proposal.
        let third = emitter.emit(&request(Environment::Stage, "sha256:aaa")).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert!(!third.created);
        assert_eq!(first.locator, second.locator);
        assert_eq!(first.locator, third.locator);
        assert_eq!(emitter.created_count(), 1);
        assert_eq!(emitter.open_proposals().len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_closes_proposal() {
        let emitter = InMemoryRequestEmitter::new();
        let handle = emitter.emit(&request(Environment::Prod, "sha256:aaa")).await.unwrap();

        emitter.withdraw(&handle).await.unwrap();
        emitter.withdraw(&handle).await.unwrap();

        assert!(emitter.open_for(Environment::Prod).is_empty());
        assert_eq!(emitter.withdrawn_count(), 1);
    }
}
