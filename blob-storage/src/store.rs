use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs::{self, File};
use tracing::{debug, info, warn};

use crate::error::{BlobError, Result};
use crate::lock::{KeyGuard, LockRegistry};
use crate::path::{self, STAGING_DIR, STORE_DIR};

/// File name prefix of staging files.
const STAGING_PREFIX: &str = "blob-";

/// Filesystem blob store keyed by digest.
///
/// Every mutation of a digest's file happens while holding that digest's lock
/// from the [`LockRegistry`], so concurrent commits and deletes of the same
/// digest are serialized while different digests proceed in parallel.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    locks: LockRegistry,
}

impl BlobStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(STORE_DIR))?;
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        info!(root = %root.display(), "opened blob store");
        Ok(Self {
            root,
            locks: LockRegistry::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding in-flight staging files; on the same filesystem as the store.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Final location of the blob named `digest`.
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        path::blob_path(&self.root, digest)
    }

    /// Checks whether a blob is committed under `digest`.
    pub async fn exists(&self, digest: &str) -> Result<bool> {
        let path = self.blob_path(digest)?;
        exists_at(&path).await
    }

    /// Acquires the exclusive lock for `digest`.
    pub async fn lock(&self, digest: &str) -> Result<KeyGuard> {
        path::blob_path(&self.root, digest)?;
        Ok(self.locks.lock(digest).await)
    }

    /// Moves `source` into the store under `digest`.
    ///
    /// Returns [`BlobError::AlreadyExists`] and leaves `source` in place if the
    /// digest is already committed. `source` must live on the same filesystem,
    /// see [`BlobStore::staging_file`].
    pub async fn commit(&self, digest: &str, source: &Path) -> Result<()> {
        let target = self.blob_path(digest)?;
        fs::create_dir_all(path::shard_path(&self.root, digest)?).await?;

        let _guard = self.locks.lock(digest).await;
        // rename silently replaces an existing target on most platforms
        if exists_at(&target).await? {
            debug!(digest, "blob already present");
            return Err(BlobError::AlreadyExists(digest.to_string()));
        }
        fs::rename(source, &target).await?;
        debug!(digest, path = %target.display(), "committed blob");
        Ok(())
    }

    /// Opens the stored blob for reading.
    pub async fn open(&self, digest: &str) -> Result<File> {
        let path = self.blob_path(digest)?;
        match File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(digest.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the blob. Returns whether a file was actually removed; a missing blob is not an error.
    pub async fn delete(&self, digest: &str) -> Result<bool> {
        let guard = self.lock(digest).await?;
        self.delete_locked(&guard).await
    }

    /// Removes the blob whose lock the caller already holds.
    pub async fn delete_locked(&self, guard: &KeyGuard) -> Result<bool> {
        let path = self.blob_path(guard.digest())?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(digest = guard.digest(), "deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates an empty staging file, removed when the returned [`TempPath`] is dropped.
    pub fn staging_file(&self) -> Result<(File, TempPath)> {
        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(self.staging_dir())?;
        let (file, path) = file.into_parts();
        Ok((File::from_std(file), path))
    }

    /// Deletes staging files left behind by a process that did not shut down
    /// cleanly. Only call this while no other process works on the same root.
    pub fn clear_staging(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in std::fs::read_dir(self.staging_dir())? {
            let entry = entry?;
            let is_staging = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGING_PREFIX));
            if is_staging && entry.file_type()?.is_file() {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if removed > 0 {
            warn!(removed, "removed leftover staging files");
        }
        Ok(removed)
    }

    /// Lists the digests of all committed blobs.
    pub async fn list_digests(&self) -> Result<Vec<String>> {
        let mut digests = Vec::new();
        let mut shards = fs::read_dir(self.root.join(STORE_DIR)).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut blobs = fs::read_dir(shard.path()).await?;
            while let Some(blob) = blobs.next_entry().await? {
                if let Some(name) = blob.file_name().to_str() {
                    digests.push(name.to_string());
                }
            }
        }
        digests.sort();
        Ok(digests)
    }
}

async fn exists_at(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
