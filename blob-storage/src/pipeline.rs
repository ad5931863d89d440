use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tempfile::TempPath;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::digest::{copy_and_digest, copy_stream_and_digest, digest_file, Algorithm, Digests};
use crate::error::{BlobError, Result};
use crate::hooks::{CommitHook, HookRegistry};
use crate::metrics::SharedMetrics;
use crate::store::BlobStore;

/// Digests a client declared for its upload, keyed by algorithm.
///
/// An algorithm may be declared more than once; every value must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredDigests(BTreeMap<Algorithm, Vec<String>>);

impl DeclaredDigests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an expected hex digest for `algorithm`, keeping earlier values.
    pub fn insert(&mut self, algorithm: Algorithm, expected: impl Into<String>) {
        self.0.entry(algorithm).or_default().push(expected.into());
    }

    /// First value declared for `algorithm`.
    pub fn get(&self, algorithm: Algorithm) -> Option<&str> {
        self.0
            .get(&algorithm)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn algorithms(&self) -> Vec<Algorithm> {
        self.0.keys().copied().collect()
    }

    /// Every declared value, grouped by algorithm in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (Algorithm, &str)> {
        self.0
            .iter()
            .flat_map(|(a, values)| values.iter().map(move |v| (*a, v.as_str())))
    }
}

impl FromIterator<(Algorithm, String)> for DeclaredDigests {
    fn from_iter<I: IntoIterator<Item = (Algorithm, String)>>(iter: I) -> Self {
        let mut declared = Self::new();
        for (algorithm, expected) in iter {
            declared.insert(algorithm, expected);
        }
        declared
    }
}

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Canonical (SHA-256) digest of the uploaded bytes.
    pub digest: String,
    /// False when the blob was already stored and nothing was written.
    pub created: bool,
    pub size: u64,
}

/// An upload written to a staging file and hashed, not yet committed.
///
/// Dropping it removes the staging file.
#[derive(Debug)]
pub struct StagedUpload {
    path: TempPath,
    digest: String,
    size: u64,
}

impl StagedUpload {
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Ingestion, retrieval and removal of blobs on top of a [`BlobStore`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: Arc<BlobStore>,
    hooks: Arc<HookRegistry>,
    metrics: SharedMetrics,
}

impl Pipeline {
    pub fn new(store: Arc<BlobStore>, hooks: Arc<HookRegistry>, metrics: SharedMetrics) -> Self {
        Self {
            store,
            hooks,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub(crate) fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Streams an upload and commits it. See [`Pipeline::stage`] and [`Pipeline::commit_staged`].
    pub async fn ingest<R>(&self, reader: &mut R, declared: &DeclaredDigests) -> Result<IngestOutcome>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let staged = self.stage(reader).await?;
        self.commit_staged(staged, declared).await
    }

    /// Writes `reader` into a fresh staging file while computing its canonical digest.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn stage<R>(&self, reader: &mut R) -> Result<StagedUpload>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (mut file, path) = self.store.staging_file()?;
        let digests = copy_and_digest(reader, &mut file, &[Algorithm::CANONICAL]).await?;
        drop(file);
        self.staged(path, digests)
    }

    /// Same as [`Pipeline::stage`] for a body that arrives as a stream of chunks.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn stage_stream<S>(&self, stream: S) -> Result<StagedUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let (mut file, path) = self.store.staging_file()?;
        let digests = copy_stream_and_digest(stream, &mut file, &[Algorithm::CANONICAL]).await?;
        drop(file);
        self.staged(path, digests)
    }

    fn staged(&self, path: TempPath, digests: Digests) -> Result<StagedUpload> {
        let digest = digests
            .get(Algorithm::CANONICAL)
            .map(str::to_string)
            .ok_or_else(|| io::Error::other("canonical digest was not computed"))?;
        let size = digests.len();
        self.metrics.bytes_received(size);
        debug!(digest = %digest, size, staging = %path.display(), "staged upload");

        Ok(StagedUpload { path, digest, size })
    }

    /// Verifies declared digests, runs the hooks and commits the staged upload.
    ///
    /// A mismatching declared digest aborts with [`BlobError::IntegrityMismatch`]
    /// before anything reaches the store. An already stored blob is reported
    /// with `created == false`. The staging file is gone when this returns.
    #[tracing::instrument(skip(self, staged, declared), fields(digest = %staged.digest, size = staged.size))]
    pub async fn commit_staged(
        &self,
        staged: StagedUpload,
        declared: &DeclaredDigests,
    ) -> Result<IngestOutcome> {
        if !declared.is_empty() {
            let computed = digest_file(&staged.path, &declared.algorithms()).await?;
            for (algorithm, expected) in declared.iter() {
                let actual = computed.get(algorithm).unwrap_or_default();
                if !actual.eq_ignore_ascii_case(expected.trim()) {
                    warn!(%algorithm, expected, actual, "declared digest mismatch");
                    self.metrics.integrity_rejected();
                    return Err(BlobError::IntegrityMismatch {
                        algorithm,
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
        }

        self.run_hooks("pre-commit", self.hooks.pre_commit_hooks(), &staged.digest, &staged.path)
            .await;

        // on success the staging file is renamed away and dropping `staged` is a no-op
        let created = match self.store.commit(&staged.digest, &staged.path).await {
            Ok(()) => {
                self.metrics.blob_committed();
                true
            }
            Err(BlobError::AlreadyExists(_)) => {
                self.metrics.blob_already_present();
                false
            }
            Err(e) => return Err(e),
        };

        let blob_path = self.store.blob_path(&staged.digest)?;
        self.run_hooks("post-commit", self.hooks.post_commit_hooks(), &staged.digest, &blob_path)
            .await;

        info!(created, "ingested blob");
        Ok(IngestOutcome {
            digest: staged.digest.clone(),
            created,
            size: staged.size,
        })
    }

    /// Deletes the blob. Deleting an unknown digest succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, digest: &str) -> Result<()> {
        if self.store.delete(digest).await? {
            self.metrics.blob_deleted();
            info!("removed blob");
        } else {
            debug!("blob was not present");
        }
        Ok(())
    }

    /// Runs `hooks` one after another on the blocking pool, so hooks may do
    /// synchronous I/O without stalling the runtime.
    async fn run_hooks(
        &self,
        stage: &'static str,
        hooks: Vec<Arc<dyn CommitHook>>,
        digest: &str,
        path: &Path,
    ) {
        if hooks.is_empty() {
            return;
        }
        let digest = digest.to_string();
        let path = path.to_path_buf();
        let metrics = self.metrics.clone();
        let task = tokio::task::spawn_blocking(move || {
            for hook in hooks {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    hook.call(&digest, &path)
                }));
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(hook = hook.name(), stage, digest = %digest, error = %e, "commit hook failed");
                        metrics.hook_failed();
                    }
                    Err(_) => {
                        warn!(hook = hook.name(), stage, digest = %digest, "commit hook panicked");
                        metrics.hook_failed();
                    }
                }
            }
        });
        if let Err(e) = task.await {
            warn!(stage, error = %e, "commit hooks did not complete");
        }
    }
}
