//! Store and emitter doubles that inject failures.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Digest, DigestRecord, Environment, ExternalRequestHandle, PromotionRequest, Source};
use crate::errors::{ConflictError, EmitFailure, StoreError};
use crate::requests::{InMemoryRequestEmitter, RequestEmitter};
use crate::store::{DigestStore, InMemoryDigestStore};

/// A store that fails the next N writes to chosen environments with a
/// conflict, as if another writer got there first. Reads can be made to
/// fail the same way.
pub struct FlakyStore {
    inner: Arc<dyn DigestStore>,
    conflicts: Mutex<Vec<(Environment, usize)>>,
    read_failures: Mutex<Vec<(Environment, usize)>>,
    write_calls: Mutex<usize>,
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore")
            .field("conflicts", &*self.conflicts.lock())
            .field("read_failures", &*self.read_failures.lock())
            .field("write_calls", &self.write_calls())
            .finish_non_exhaustive()
    }
}

impl FlakyStore {
    /// Wraps an in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::wrapping(Arc::new(InMemoryDigestStore::new()))
    }

    /// Wraps any store.
    #[must_use]
    pub fn wrapping(inner: Arc<dyn DigestStore>) -> Self {
        Self {
            inner,
            conflicts: Mutex::new(Vec::new()),
            read_failures: Mutex::new(Vec::new()),
            write_calls: Mutex::new(0),
        }
    }

    /// Makes the next `count` writes to `environment` conflict.
    #[must_use]
    pub fn with_conflicts(self, environment: Environment, count: usize) -> Self {
        self.inject_conflicts(environment, count);
        self
    }

    /// Makes the next `count` writes to `environment` conflict.
    pub fn inject_conflicts(&self, environment: Environment, count: usize) {
        self.conflicts.lock().push((environment, count));
    }

    /// Makes the next `count` reads of `environment` fail with an I/O error.
    pub fn inject_read_failures(&self, environment: Environment, count: usize) {
        self.read_failures.lock().push((environment, count));
    }

    /// Number of write calls seen, including injected failures.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        *self.write_calls.lock()
    }

}

fn take_injected(injected: &Mutex<Vec<(Environment, usize)>>, environment: Environment) -> bool {
    let mut injected = injected.lock();
    match injected.iter_mut().find(|(env, n)| *env == environment && *n > 0) {
        Some((_, n)) => {
            *n -= 1;
            true
        }
        None => false,
    }
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DigestStore for FlakyStore {
    async fn read(&self, environment: Environment) -> Result<Option<DigestRecord>, StoreError> {
        if take_injected(&self.read_failures, environment) {
            return Err(std::io::Error::other(format!("injected read failure on {environment}")).into());
        }
        self.inner.read(environment).await
    }

    async fn write(
        &self,
        environment: Environment,
        digest: &Digest,
        source: Source,
        expected_revision: u64,
    ) -> Result<DigestRecord, StoreError> {
        *self.write_calls.lock() += 1;
        if take_injected(&self.conflicts, environment) {
            return Err(ConflictError::new(environment, expected_revision, expected_revision + 1).into());
        }
        self.inner.write(environment, digest, source, expected_revision).await
    }
}

/// An emitter that fails the first N calls, then behaves like
/// [`InMemoryRequestEmitter`].
#[derive(Debug)]
pub struct FailingEmitter {
    inner: InMemoryRequestEmitter,
    remaining_failures: Mutex<usize>,
    call_count: Mutex<usize>,
}

impl FailingEmitter {
    /// Creates an emitter that fails `failures` times.
    #[must_use]
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryRequestEmitter::new(),
            remaining_failures: Mutex::new(failures),
            call_count: Mutex::new(0),
        }
    }

    /// Creates an emitter that never succeeds.
    #[must_use]
    pub fn always() -> Self {
        Self::new(usize::MAX)
    }

    /// Number of emit calls seen.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }

    /// Lets every further call through.
    pub fn heal(&self) {
        *self.remaining_failures.lock() = 0;
    }

    /// The wrapped emitter.
    #[must_use]
    pub const fn inner(&self) -> &InMemoryRequestEmitter {
        &self.inner
    }
}

#[async_trait]
impl RequestEmitter for FailingEmitter {
    async fn emit(&self, request: &PromotionRequest) -> Result<ExternalRequestHandle, EmitFailure> {
        *self.call_count.lock() += 1;
        {
            let mut remaining = self.remaining_failures.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EmitFailure::new(
                    format!("{}->{}", request.from, request.to),
                    "review system unavailable",
                ));
            }
        }
        self.inner.emit(request).await
    }

    async fn withdraw(&self, handle: &ExternalRequestHandle) -> Result<(), EmitFailure> {
        self.inner.withdraw(handle).await
    }
}

/// An emitter that sleeps before delegating, for timeout tests.
#[derive(Debug)]
pub struct SlowEmitter {
    inner: InMemoryRequestEmitter,
    delay: Duration,
}

impl SlowEmitter {
    /// Creates an emitter that takes `delay_ms` per call.
    #[must_use]
    pub fn new(delay_ms: u64) -> Self {
        Self {
            inner: InMemoryRequestEmitter::new(),
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[async_trait]
impl RequestEmitter for SlowEmitter {
    async fn emit(&self, request: &PromotionRequest) -> Result<ExternalRequestHandle, EmitFailure> {
        tokio::time::sleep(self.delay).await;
        self.inner.emit(request).await
    }
}
