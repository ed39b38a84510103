//! Emitter that writes one reviewable proposal document per key into an
//! outbox directory.
//!
//! A file named `<key>.json` in the outbox is an open proposal. Withdrawn
//! proposals move to `closed/` under the outbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::emitter::{proposal_key, RequestEmitter};
use crate::core::{Digest, Environment, ExternalRequestHandle, PromotionRequest};
use crate::errors::EmitFailure;

const CLOSED_DIR: &str = "closed";

/// The document a reviewer sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDocument {
    /// Idempotency key.
    pub key: String,
    /// One-line summary.
    pub title: String,
    /// Human-readable description of the change.
    pub body: String,
    /// Upstream environment.
    pub from: Environment,
    /// Target environment.
    pub to: Environment,
    /// Digest proposed.
    pub digest: Digest,
    /// Request that opened the proposal.
    pub request_id: Uuid,
    /// When the proposal was opened.
    pub opened_at: DateTime<Utc>,
}

impl ProposalDocument {
    fn for_request(key: String, request: &PromotionRequest) -> Self {
        Self {
            title: format!(
                "Promote {} from {} to {}",
                request.digest.short(),
                request.from,
                request.to
            ),
            body: format!(
                "Sets `digest:` for the {to} environment to `{digest}`, \
                 currently running in {from}.\n\nApprove to promote; reject to keep {to} as is.",
                to = request.to,
                from = request.from,
                digest = request.digest,
            ),
            key,
            from: request.from,
            to: request.to,
            digest: request.digest.clone(),
            request_id: request.id,
            opened_at: Utc::now(),
        }
    }
}

/// Writes proposals as JSON files into a directory.
#[derive(Debug, Clone)]
pub struct OutboxRequestEmitter {
    dir: PathBuf,
}

impl OutboxRequestEmitter {
    /// Creates an emitter writing into `dir`. The directory is created on
    /// first emit.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The outbox directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads the open proposal for `key`, if any.
    pub fn open_proposal(&self, key: &str) -> Result<Option<ProposalDocument>, EmitFailure> {
        read_document(&self.proposal_path(key), key)
    }

    fn proposal_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn write_new(&self, document: &ProposalDocument) -> Result<bool, EmitFailure> {
        let fail = |reason: String| EmitFailure::new(document.key.clone(), reason);

        std::fs::create_dir_all(&self.dir).map_err(|e| fail(e.to_string()))?;
        let target = self.proposal_path(&document.key);
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| fail(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| fail(e.to_string()))?;
        tmp.write_all(&bytes).map_err(|e| fail(e.to_string()))?;
        tmp.as_file().sync_all().map_err(|e| fail(e.to_string()))?;

        match tmp.persist_noclobber(&target) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(fail(e.error.to_string())),
        }
    }

    fn close(&self, key: &str) -> Result<(), EmitFailure> {
        let fail = |reason: String| EmitFailure::new(key, reason);
        let source = self.proposal_path(key);
        if !source.exists() {
            return Ok(());
        }
        let closed = self.dir.join(CLOSED_DIR);
        std::fs::create_dir_all(&closed).map_err(|e| fail(e.to_string()))?;
        match std::fs::rename(&source, closed.join(format!("{key}.json"))) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(fail(e.to_string())),
        }
    }
}

fn read_document(path: &Path, key: &str) -> Result<Option<ProposalDocument>, EmitFailure> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| EmitFailure::new(key, format!("unreadable proposal: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EmitFailure::new(key, e.to_string())),
    }
}

#[async_trait]
impl RequestEmitter for OutboxRequestEmitter {
    async fn emit(&self, request: &PromotionRequest) -> Result<ExternalRequestHandle, EmitFailure> {
        let key = proposal_key(request.from, request.to, &request.digest);
        let document = ProposalDocument::for_request(key.clone(), request);
        let emitter = self.clone();

        let created = tokio::task::spawn_blocking(move || emitter.write_new(&document))
            .await
            .map_err(|e| EmitFailure::new(key.clone(), e.to_string()))??;

        let locator = self.proposal_path(&key).display().to_string();
        debug!(key = %key, locator = %locator, created, "Outbox proposal ready");
        Ok(ExternalRequestHandle {
            key,
            locator,
            created,
        })
    }

    async fn withdraw(&self, handle: &ExternalRequestHandle) -> Result<(), EmitFailure> {
        let emitter = self.clone();
        let key = handle.key.clone();
        tokio::task::spawn_blocking(move || emitter.close(&key))
            .await
            .map_err(|e| EmitFailure::new(handle.key.clone(), e.to_string()))?
    }
}
