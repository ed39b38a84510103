//! Fixtures for building an engine over in-memory parts.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::{Digest, DigestRecord, Environment, PromotionPair};
use crate::errors::StoreError;
use crate::events::CollectingEventSink;
use crate::machine::PromotionEngine;
use crate::requests::{InMemoryRequestEmitter, RequestEmitter};
use crate::retry::{JitterStrategy, RetryConfig};
use crate::store::{DigestStore, InMemoryDigestStore};

/// Parses a digest literal used in tests.
///
/// # Panics
///
/// Panics if `value` is not a valid digest.
#[must_use]
pub fn digest(value: &str) -> Digest {
    Digest::parse(value).unwrap_or_else(|e| panic!("invalid test digest '{value}': {e}"))
}

/// The pair promoting into `to`.
///
/// # Panics
///
/// Panics if `to` is `dev`.
#[must_use]
pub fn pair_into(to: Environment) -> PromotionPair {
    PromotionPair::into_target(to).unwrap_or_else(|| panic!("{to} has no upstream"))
}

/// Engine settings with millisecond backoff and no jitter.
#[must_use]
pub fn fast_config() -> EngineConfig {
    let retry = RetryConfig::new()
        .with_max_attempts(3)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
        .with_jitter(JitterStrategy::None);
    EngineConfig::new()
        .with_cas_retry(retry.clone())
        .with_emit_retry(retry)
        .with_io_timeout_ms(500)
}

/// An engine wired to a store, an emitter and a collecting sink.
#[derive(Clone)]
pub struct TestHarness {
    /// The engine under test.
    pub engine: Arc<PromotionEngine>,
    /// The store the engine writes.
    pub store: Arc<dyn DigestStore>,
    /// Every event the engine emitted.
    pub sink: Arc<CollectingEventSink>,
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("engine", &self.engine)
            .field("events", &self.sink.len())
            .finish_non_exhaustive()
    }
}

impl TestHarness {
    /// In-memory store, in-memory emitter, [`fast_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(InMemoryDigestStore::new()),
            Arc::new(InMemoryRequestEmitter::new()),
        )
    }

    /// Custom store and emitter with [`fast_config`].
    #[must_use]
    pub fn with_parts(store: Arc<dyn DigestStore>, emitter: Arc<dyn RequestEmitter>) -> Self {
        Self::with_config(store, emitter, fast_config())
    }

    /// Custom store, emitter and configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn DigestStore>,
        emitter: Arc<dyn RequestEmitter>,
        config: EngineConfig,
    ) -> Self {
        let sink = Arc::new(CollectingEventSink::new());
        let engine = PromotionEngine::new(store.clone(), emitter)
            .with_config(config)
            .with_sink(sink.clone());
        Self {
            engine: Arc::new(engine),
            store,
            sink,
        }
    }

    /// Reads the current record for `environment`.
    pub async fn record(&self, environment: Environment) -> Result<Option<DigestRecord>, StoreError> {
        self.store.read(environment).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_config_is_bounded() {
        let config = fast_config();
        assert_eq!(config.cas_retry.attempts(), 3);
        assert_eq!(config.io_timeout_ms, 500);
    }

    #[tokio::test]
    async fn test_harness_starts_empty() {
        let harness = TestHarness::new();
        assert!(harness.record(Environment::Dev).await.unwrap().is_none());
        assert!(harness.sink.is_empty());
        assert!(harness.engine.ledger().is_empty());
    }
}
