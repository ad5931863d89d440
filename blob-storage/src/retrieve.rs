use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf};
use tracing::{debug, warn};

use crate::digest::{copy_and_digest, is_canonical_digest, Algorithm};
use crate::error::{BlobError, Result};
use crate::metrics::SharedMetrics;
use crate::pipeline::Pipeline;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A verified, transient copy of a stored blob.
///
/// The copy lives in the staging directory and is removed when this value
/// (or the stream made from it) is dropped.
#[derive(Debug)]
pub struct Retrieved {
    file: File,
    digest: String,
    size: u64,
    metrics: SharedMetrics,
    _staging: TempPath,
}

impl Retrieved {
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads the whole blob into memory.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size as usize);
        self.read_to_end(&mut data).await?;
        Ok(data)
    }

    /// Turns the blob into a stream of chunks, suitable for a response body.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures::stream::try_unfold(self, next_chunk)
    }
}

async fn next_chunk(mut blob: Retrieved) -> io::Result<Option<(Bytes, Retrieved)>> {
    let mut buf = BytesMut::with_capacity(STREAM_CHUNK_SIZE);
    let n = blob.file.read_buf(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    blob.metrics.bytes_sent(n as u64);
    Ok(Some((buf.freeze(), blob)))
}

impl AsyncRead for Retrieved {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

impl Pipeline {
    /// Fetches a blob, re-verifying its content against its digest.
    ///
    /// The blob is copied to a staging file while its lock is held, so a
    /// concurrent delete or commit can not interleave with the read. If the
    /// content no longer matches the digest the stored blob is purged and
    /// [`BlobError::Corrupted`] is returned.
    #[tracing::instrument(skip(self))]
    pub async fn retrieve(&self, digest: &str) -> Result<Retrieved> {
        let store = self.store();
        if !store.exists(digest).await? {
            return Err(BlobError::NotFound(digest.to_string()));
        }

        let (mut copy, staging) = store.staging_file()?;
        let guard = store.lock(digest).await?;
        // deleted while we waited for the lock
        let mut source = store.open(digest).await?;
        let digests = copy_and_digest(&mut source, &mut copy, &[Algorithm::CANONICAL]).await?;
        drop(source);

        let actual = digests.get(Algorithm::CANONICAL).unwrap_or_default();
        if actual != digest && !is_canonical_digest(digest) {
            // e.g. an upper-case alias on a case-insensitive filesystem
            debug!(actual, "name is not a canonical digest, not purging");
            return Err(BlobError::NotFound(digest.to_string()));
        }
        if actual != digest {
            warn!(actual, "stored blob failed verification, purging it");
            store.delete_locked(&guard).await?;
            self.metrics().blob_corrupted();
            return Err(BlobError::Corrupted {
                digest: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        drop(guard);

        copy.seek(SeekFrom::Start(0)).await?;
        debug!(size = digests.len(), "blob verified");
        Ok(Retrieved {
            file: copy,
            digest: digest.to_string(),
            size: digests.len(),
            metrics: self.metrics().clone(),
            _staging: staging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::TryStreamExt;
    use tempfile::TempDir;

    use crate::hooks::HookRegistry;
    use crate::pipeline::DeclaredDigests;
    use crate::store::BlobStore;

    fn setup() -> (TempDir, Pipeline) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::new(dir.path()).unwrap());
        let pipeline = Pipeline::new(store, Arc::new(HookRegistry::new()), SharedMetrics::default());
        (dir, pipeline)
    }

    fn staging_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path().join("tmp")).unwrap().count() == 0
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (dir, pipeline) = setup();
        let inputs: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"data".to_vec(),
            (0..STREAM_CHUNK_SIZE * 2 + 5).map(|i| (i % 251) as u8).collect(),
        ];

        for input in inputs {
            let outcome = pipeline
                .ingest(&mut &input[..], &DeclaredDigests::new())
                .await
                .unwrap();
            let blob = pipeline.retrieve(&outcome.digest).await.unwrap();
            assert_eq!(blob.digest(), outcome.digest);
            assert_eq!(blob.size(), input.len() as u64);
            assert_eq!(blob.into_bytes().await.unwrap(), input);
        }
        assert!(staging_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_stream_and_cleanup() {
        let (dir, pipeline) = setup();
        let input: Vec<u8> = (0..STREAM_CHUNK_SIZE * 3).map(|i| (i % 13) as u8).collect();
        let outcome = pipeline
            .ingest(&mut &input[..], &DeclaredDigests::new())
            .await
            .unwrap();

        let blob = pipeline.retrieve(&outcome.digest).await.unwrap();
        assert!(!staging_is_empty(&dir));

        let chunks: Vec<Bytes> = blob.into_stream().try_collect().await.unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), input);
        assert!(staging_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_not_found() {
        let (_dir, pipeline) = setup();
        let result = pipeline.retrieve("abcdef").await;
        assert!(matches!(result, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_short_key() {
        let (_dir, pipeline) = setup();
        let result = pipeline.retrieve("a").await;
        assert!(matches!(result, Err(BlobError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_corrupted_blob_is_purged() {
        let (dir, pipeline) = setup();
        let outcome = pipeline
            .ingest(&mut &b"data"[..], &DeclaredDigests::new())
            .await
            .unwrap();
        let path = pipeline.store().blob_path(&outcome.digest).unwrap();
        std::fs::write(&path, b"tampered").unwrap();

        let result = pipeline.retrieve(&outcome.digest).await;
        assert!(matches!(result, Err(BlobError::Corrupted { .. })));
        assert!(!path.exists());
        assert!(staging_is_empty(&dir));

        // a later retrieve reports the blob as gone
        assert!(matches!(
            pipeline.retrieve(&outcome.digest).await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_non_canonical_alias_is_never_purged() {
        let (dir, pipeline) = setup();
        let outcome = pipeline
            .ingest(&mut &b"data"[..], &DeclaredDigests::new())
            .await
            .unwrap();
        let blob = pipeline.store().blob_path(&outcome.digest).unwrap();

        // what a case-insensitive filesystem resolves an upper-case request to
        let upper = outcome.digest.to_uppercase();
        let alias = pipeline.store().blob_path(&upper).unwrap();
        std::fs::create_dir_all(alias.parent().unwrap()).unwrap();
        std::fs::hard_link(&blob, &alias).unwrap();

        let result = pipeline.retrieve(&upper).await;
        assert!(matches!(result, Err(BlobError::NotFound(_))));
        assert!(alias.exists());
        assert!(blob.exists());
        assert!(staging_is_empty(&dir));

        let data = pipeline
            .retrieve(&outcome.digest)
            .await
            .unwrap()
            .into_bytes()
            .await
            .unwrap();
        assert_eq!(data, b"data");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_retrieve_races_delete() {
        let (_dir, pipeline) = setup();
        let outcome = pipeline
            .ingest(&mut &b"data"[..], &DeclaredDigests::new())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let pipeline = pipeline.clone();
            let digest = outcome.digest.clone();
            handles.push(tokio::spawn(async move {
                if i == 10 {
                    pipeline.remove(&digest).await.map(|_| None)
                } else {
                    match pipeline.retrieve(&digest).await {
                        Ok(blob) => blob.into_bytes().await.map(Some),
                        Err(BlobError::NotFound(_)) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        for handle in handles {
            if let Some(data) = handle.await.unwrap().unwrap() {
                assert_eq!(data, b"data");
            }
        }
        assert!(pipeline.store().locks().is_empty());
    }
}
