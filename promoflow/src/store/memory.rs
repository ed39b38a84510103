//! In-memory digest store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::DigestStore;
use crate::core::{Digest, DigestRecord, Environment, Source};
use crate::errors::{ConflictError, StoreError};

/// Process-local store; CAS is enforced under a single mutex.
#[derive(Debug, Default)]
pub struct InMemoryDigestStore {
    records: Mutex<HashMap<Environment, DigestRecord>>,
}

impl InMemoryDigestStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = DigestRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.lock();
            for record in records {
                map.insert(record.environment, record);
            }
        }
        store
    }

    /// Returns the number of environments with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if no environment has a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl DigestStore for InMemoryDigestStore {
    async fn read(&self, environment: Environment) -> Result<Option<DigestRecord>, StoreError> {
        Ok(self.records.lock().get(&environment).cloned())
    }

    async fn write(
        &self,
        environment: Environment,
        digest: &Digest,
        source: Source,
        expected_revision: u64,
    ) -> Result<DigestRecord, StoreError> {
        let mut records = self.records.lock();
        let current = records.get(&environment);
        let actual = current.map_or(0, |r| r.revision);
        if actual != expected_revision {
            return Err(ConflictError::new(environment, expected_revision, actual).into());
        }

        let record = DigestRecord::next(environment, current, digest.clone(), source);
        records.insert(environment, record.clone());
        Ok(record)
    }
}
