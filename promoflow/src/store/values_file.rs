//! Digest store backed by per-environment Helm values files.
//!
//! The values file is what the reconciliation agent watches, so the store
//! edits nothing but its `digest:` value. Revision and provenance live in a
//! JSON sidecar next to it.
//!
//! A write replaces the sidecar with the new record marked pending, then
//! replaces the values file, then clears the mark. The revision is taken as
//! soon as the pending sidecar lands; a writer that stops before the last
//! step leaves a pending sidecar that the next read or write completes.
//! Reads and writes both hold the environment's lock, which is an
//! in-process mutex plus an exclusive lock on `<state_dir>/<env>.lock`, so
//! no reader sees a write half done and processes sharing the directory
//! serialize on the same file.

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::patch::{find_digest, patch_digest};
use super::DigestStore;
use crate::config::ValuesFileConfig;
use crate::core::{Digest, DigestRecord, Environment, Source};
use crate::errors::{ConflictError, StoreError};

/// On-disk form of the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    #[serde(flatten)]
    record: DigestRecord,
    /// Set while the values file may still hold the previous digest.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pending: bool,
}

struct Inner {
    layout: ValuesFileConfig,
    locks: HashMap<Environment, Mutex<()>>,
}

/// Holds an environment for one read or write. The file lock is released
/// when the handle closes, before the in-process mutex.
struct EnvGuard<'a> {
    _file: File,
    _local: parking_lot::MutexGuard<'a, ()>,
}

/// Store that patches `digest:` in place in each environment's values file.
#[derive(Clone)]
pub struct ValuesFileStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ValuesFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValuesFileStore")
            .field("root", &self.inner.layout.root)
            .field("file_pattern", &self.inner.layout.file_pattern)
            .finish()
    }
}

impl ValuesFileStore {
    /// Creates a store over the given layout.
    #[must_use]
    pub fn new(layout: ValuesFileConfig) -> Self {
        let locks = Environment::ALL.iter().map(|e| (*e, Mutex::new(()))).collect();
        Self {
            inner: Arc::new(Inner { layout, locks }),
        }
    }

    /// The layout this store reads and writes.
    #[must_use]
    pub fn layout(&self) -> &ValuesFileConfig {
        &self.inner.layout
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(inner.as_ref()))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

impl Inner {
    fn lock(&self, env: Environment) -> Result<EnvGuard<'_>, StoreError> {
        // Every environment is inserted in `ValuesFileStore::new`.
        let local = self.locks[&env].lock();

        let path = self.layout.lock_path(env);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;

        Ok(EnvGuard {
            _file: file,
            _local: local,
        })
    }

    fn read_record(&self, env: Environment) -> Result<Option<DigestRecord>, StoreError> {
        let _guard = self.lock(env)?;
        self.load(env)
    }

    /// Loads the committed record, finishing an interrupted write first.
    /// Caller holds the environment's lock.
    fn load(&self, env: Environment) -> Result<Option<DigestRecord>, StoreError> {
        let sidecar_path = self.layout.sidecar_path(env);
        let raw = match std::fs::read_to_string(&sidecar_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sidecar: Sidecar = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            path: sidecar_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let record = sidecar.record;

        let values_path = self.layout.values_path(env);
        let contents = read_values(env, &values_path)?;
        let declared = find_digest(&contents).map_err(|e| StoreError::DigestField {
            path: values_path.display().to_string(),
            found: e.0,
        })?;

        if sidecar.pending {
            if declared.as_deref() != Some(record.digest.as_str()) {
                let patched = patch_values(&values_path, &contents, &record.digest)?;
                replace_file(&values_path, patched.as_bytes())?;
            }
            self.store_sidecar(env, &record, false)?;
            warn!(
                environment = %env,
                digest = %record.digest,
                revision = record.revision,
                "Completed interrupted values file write"
            );
            return Ok(Some(record));
        }

        if declared.as_deref() != Some(record.digest.as_str()) {
            warn!(
                environment = %env,
                recorded = %record.digest,
                declared = ?declared,
                "Values file digest diverged from recorded revision"
            );
            return Err(StoreError::Corrupt {
                path: values_path.display().to_string(),
                reason: format!(
                    "declares {declared:?} but revision {} recorded {}",
                    record.revision, record.digest
                ),
            });
        }
        Ok(Some(record))
    }

    fn store_sidecar(&self, env: Environment, record: &DigestRecord, pending: bool) -> Result<(), StoreError> {
        let path = self.layout.sidecar_path(env);
        let sidecar = Sidecar {
            record: record.clone(),
            pending,
        };
        let bytes = serde_json::to_vec_pretty(&sidecar).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        replace_file(&path, &bytes)
    }

    fn write_record(
        &self,
        env: Environment,
        digest: &Digest,
        source: Source,
        expected_revision: u64,
    ) -> Result<DigestRecord, StoreError> {
        let _guard = self.lock(env)?;

        let current = self.load(env)?;
        let actual = current.as_ref().map_or(0, |r| r.revision);
        if actual != expected_revision {
            return Err(ConflictError::new(env, expected_revision, actual).into());
        }

        let values_path = self.layout.values_path(env);
        let contents = read_values(env, &values_path)?;
        let patched = patch_values(&values_path, &contents, digest)?;
        let record = DigestRecord::next(env, current.as_ref(), digest.clone(), source);

        self.store_sidecar(env, &record, true)?;
        replace_file(&values_path, patched.as_bytes())?;
        self.store_sidecar(env, &record, false)?;

        debug!(
            environment = %env,
            digest = %digest,
            revision = record.revision,
            path = %values_path.display(),
            "Patched values file"
        );
        Ok(record)
    }
}

fn read_values(env: Environment, path: &Path) -> Result<String, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::MissingValuesFile {
            environment: env,
            path: path.display().to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn patch_values(path: &Path, contents: &str, digest: &Digest) -> Result<String, StoreError> {
    patch_digest(contents, digest).map_err(|e| StoreError::DigestField {
        path: path.display().to_string(),
        found: e.0,
    })
}

fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl DigestStore for ValuesFileStore {
    async fn read(&self, environment: Environment) -> Result<Option<DigestRecord>, StoreError> {
        self.blocking(move |inner| inner.read_record(environment)).await
    }

    async fn write(
        &self,
        environment: Environment,
        digest: &Digest,
        source: Source,
        expected_revision: u64,
    ) -> Result<DigestRecord, StoreError> {
        let digest = digest.clone();
        self.blocking(move |inner| inner.write_record(environment, &digest, source, expected_revision))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expected_revision;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const STAGE_VALUES: &str = "\
image:
  repository: ghcr.io/acme/py-api
  digest: \"\"   # set by promotion
service:
  port: 8000
";

    fn digest(s: &str) -> Digest {
        Digest::parse(s).unwrap()
    }

    fn setup() -> (TempDir, ValuesFileStore) {
        let dir = TempDir::new().unwrap();
        for env in Environment::ALL {
            std::fs::write(dir.path().join(format!("values-{env}.yaml")), STAGE_VALUES).unwrap();
        }
        let store = ValuesFileStore::new(ValuesFileConfig::new(dir.path()));
        (dir, store)
    }

    #[tokio::test]
    async fn test_read_without_sidecar_is_absent() {
        let (_dir, store) = setup();
        assert!(store.read(Environment::Stage).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_patches_only_digest_line() {
        let (dir, store) = setup();
        let record = store
            .write(
                Environment::Stage,
                &digest("sha256:aaa"),
                Source::Promoted(Environment::Dev),
                0,
            )
            .await
            .unwrap();
        assert_eq!(record.revision, 1);

        let on_disk = std::fs::read_to_string(dir.path().join("values-stage.yaml")).unwrap();
        assert_eq!(
            on_disk,
            STAGE_VALUES.replace("digest: \"\"", "digest: \"sha256:aaa\"")
        );

        let read_back = store.read(Environment::Stage).await.unwrap().unwrap();
        assert_eq!(read_back.digest, digest("sha256:aaa"));
        assert_eq!(read_back.source, Source::Promoted(Environment::Dev));
        assert_eq!(read_back.revision, 1);
    }

    #[tokio::test]
    async fn test_write_cas_conflict() {
        let (_dir, store) = setup();
        store
            .write(Environment::Dev, &digest("sha256:aaa"), Source::Build, 0)
            .await
            .unwrap();

        let err = store
            .write(Environment::Dev, &digest("sha256:bbb"), Source::Build, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ConflictError { actual: 1, .. })));

        let current = store.read(Environment::Dev).await.unwrap().unwrap();
        assert_eq!(current.digest, digest("sha256:aaa"));
    }

    #[tokio::test]
    async fn test_missing_values_file() {
        let dir = TempDir::new().unwrap();
        let store = ValuesFileStore::new(ValuesFileConfig::new(dir.path()));

        let err = store
            .write(Environment::Prod, &digest("sha256:aaa"), Source::Promoted(Environment::Stage), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingValuesFile { .. }));
    }

    #[tokio::test]
    async fn test_manual_edit_is_reported() {
        let (dir, store) = setup();
        store
            .write(Environment::Dev, &digest("sha256:aaa"), Source::Build, 0)
            .await
            .unwrap();

        let path = dir.path().join("values-dev.yaml");
        let edited = std::fs::read_to_string(&path)
            .unwrap()
            .replace("sha256:aaa", "sha256:handedited");
        std::fs::write(&path, edited).unwrap();

        let err = store.read(Environment::Dev).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    /// Leaves `env` as a writer would after the pending sidecar landed,
    /// optionally after the values file was replaced too.
    fn interrupt_write(
        dir: &TempDir,
        store: &ValuesFileStore,
        env: Environment,
        to: &str,
        revision: u64,
        values_replaced: bool,
    ) {
        let record = DigestRecord::new(env, digest(to), Source::Build, revision);
        store.inner.store_sidecar(env, &record, true).unwrap();
        if values_replaced {
            let path = dir.path().join(format!("values-{env}.yaml"));
            let contents = std::fs::read_to_string(&path).unwrap();
            std::fs::write(&path, patch_digest(&contents, &digest(to)).unwrap()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_write_interrupted_before_values_file_is_completed() {
        let (dir, store) = setup();
        store
            .write(Environment::Dev, &digest("sha256:aaa"), Source::Build, 0)
            .await
            .unwrap();
        interrupt_write(&dir, &store, Environment::Dev, "sha256:bbb", 2, false);

        let record = store.read(Environment::Dev).await.unwrap().unwrap();
        assert_eq!(record.digest, digest("sha256:bbb"));
        assert_eq!(record.revision, 2);

        let values = std::fs::read_to_string(dir.path().join("values-dev.yaml")).unwrap();
        assert_eq!(find_digest(&values).unwrap().as_deref(), Some("sha256:bbb"));
        let sidecar = std::fs::read_to_string(store.layout().sidecar_path(Environment::Dev)).unwrap();
        assert!(!sidecar.contains("pending"));

        let next = store
            .write(Environment::Dev, &digest("sha256:ccc"), Source::Build, 2)
            .await
            .unwrap();
        assert_eq!(next.revision, 3);
    }

    #[tokio::test]
    async fn test_write_interrupted_after_values_file_is_completed_by_next_write() {
        let (dir, store) = setup();
        store
            .write(Environment::Dev, &digest("sha256:aaa"), Source::Build, 0)
            .await
            .unwrap();
        interrupt_write(&dir, &store, Environment::Dev, "sha256:bbb", 2, true);

        let err = store
            .write(Environment::Dev, &digest("sha256:ccc"), Source::Build, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ConflictError { expected: 1, actual: 2, .. })));

        let record = store
            .write(Environment::Dev, &digest("sha256:ccc"), Source::Build, 2)
            .await
            .unwrap();
        assert_eq!(record.revision, 3);
        assert_eq!(store.read(Environment::Dev).await.unwrap().unwrap().digest, digest("sha256:ccc"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reads_never_see_a_write_half_done() {
        let (_dir, store) = setup();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                for revision in 0..100u64 {
                    store
                        .write(Environment::Dev, &digest(&format!("sha256:{revision:04}")), Source::Build, revision)
                        .await
                        .unwrap();
                }
                done.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };
        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut last = 0;
                let mut reads = 0;
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    if let Some(record) = store.read(Environment::Dev).await.unwrap() {
                        assert!(record.revision >= last);
                        last = record.revision;
                    }
                    reads += 1;
                }
                reads
            })
        };

        writer.await.unwrap();
        assert!(reader.await.unwrap() > 0);
        assert_eq!(store.read(Environment::Dev).await.unwrap().unwrap().revision, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stores_sharing_a_directory_lose_no_update() {
        let (dir, _store) = setup();
        // Separate instances share no in-process mutex; only the lock file
        // serializes them, as with two engine processes.
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = ValuesFileStore::new(ValuesFileConfig::new(dir.path()));
                tokio::spawn(async move {
                    for i in 0..10 {
                        let value = digest(&format!("sha256:w{w}n{i}"));
                        loop {
                            let current = store.read(Environment::Stage).await.unwrap();
                            match store
                                .write(
                                    Environment::Stage,
                                    &value,
                                    Source::Promoted(Environment::Dev),
                                    expected_revision(current.as_ref()),
                                )
                                .await
                            {
                                Ok(_) => break,
                                Err(StoreError::Conflict(_)) => {}
                                Err(e) => panic!("unexpected store error: {e}"),
                            }
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let record = ValuesFileStore::new(ValuesFileConfig::new(dir.path()))
            .read(Environment::Stage)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.revision, 40);
    }

    #[tokio::test]
    async fn test_duplicate_digest_field_rejected() {
        let (dir, store) = setup();
        std::fs::write(
            dir.path().join("values-dev.yaml"),
            "api:\n  digest: \"\"\nworker:\n  digest: \"\"\n",
        )
        .unwrap();

        let err = store
            .write(Environment::Dev, &digest("sha256:aaa"), Source::Build, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DigestField { found: 2, .. }));
    }
}
