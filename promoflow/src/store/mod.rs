//! Digest store adapters.
//!
//! A store holds the digest declared for each environment. Writes are
//! compare-and-swap against the revision the caller last read, so two
//! writers racing on one environment can never both succeed and the stored
//! revision never goes backwards. Persisting the record is the only side
//! effect of a write; deployment is left to whatever reconciles the
//! persisted value.

mod memory;
mod patch;
mod values_file;

pub use memory::InMemoryDigestStore;
pub use patch::{find_digest, patch_digest, DigestFieldError};
pub use values_file::ValuesFileStore;

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::core::{Digest, DigestRecord, Environment, Source};
use crate::errors::StoreError;

/// Read/CAS-write access to per-environment digest records.
#[async_trait]
pub trait DigestStore: Send + Sync {
    /// Reads the current record. `None` means nothing was ever written.
    async fn read(&self, environment: Environment) -> Result<Option<DigestRecord>, StoreError>;

    /// Writes `digest` if the stored revision still equals `expected_revision`
    /// (0 when the caller read no record). Returns the new record.
    async fn write(
        &self,
        environment: Environment,
        digest: &Digest,
        source: Source,
        expected_revision: u64,
    ) -> Result<DigestRecord, StoreError>;

    /// Reads every environment's current record.
    async fn snapshot(&self) -> Result<BTreeMap<Environment, DigestRecord>, StoreError> {
        let mut records = BTreeMap::new();
        for env in Environment::ALL {
            if let Some(record) = self.read(env).await? {
                records.insert(env, record);
            }
        }
        Ok(records)
    }
}
