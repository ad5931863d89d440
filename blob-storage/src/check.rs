use tracing::{info, warn};

use crate::digest::{digest_reader, is_canonical_digest, Algorithm};
use crate::error::{BlobError, Result};
use crate::store::BlobStore;

/// Outcome of an integrity sweep over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Number of blobs that were hashed.
    pub checked: usize,
    /// Digests whose content no longer matches their name.
    pub corrupt: Vec<String>,
    /// Files in the store whose names are not canonical digests; never verified or purged.
    pub skipped: Vec<String>,
    /// Whether the corrupt blobs were removed.
    pub purged: bool,
}

impl CheckReport {
    pub fn is_healthy(&self) -> bool {
        self.corrupt.is_empty()
    }
}

/// Re-hashes every stored blob and reports the ones that do not match their digest.
///
/// Each blob is hashed while holding its lock. With `purge` set, corrupt blobs
/// are deleted, just like a failed verification on read would.
pub async fn check_store(store: &BlobStore, purge: bool) -> Result<CheckReport> {
    let mut report = CheckReport {
        purged: purge,
        ..Default::default()
    };

    for digest in store.list_digests().await? {
        if !is_canonical_digest(&digest) {
            warn!(name = %digest, "skipping file that is not named by a canonical digest");
            report.skipped.push(digest);
            continue;
        }
        let guard = match store.lock(&digest).await {
            Ok(guard) => guard,
            Err(BlobError::InvalidKey(key)) => {
                warn!(key = %key, "skipping file with invalid name");
                continue;
            }
            Err(e) => return Err(e),
        };
        let mut file = match store.open(&digest).await {
            Ok(file) => file,
            // removed since the listing
            Err(BlobError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        let digests = digest_reader(&mut file, &[Algorithm::CANONICAL]).await?;
        drop(file);
        report.checked += 1;

        let actual = digests.get(Algorithm::CANONICAL).unwrap_or_default();
        if actual != digest {
            warn!(digest = %digest, actual, "blob failed verification");
            if purge {
                store.delete_locked(&guard).await?;
            }
            report.corrupt.push(digest);
        }
    }

    info!(
        checked = report.checked,
        corrupt = report.corrupt.len(),
        skipped = report.skipped.len(),
        purged = purge,
        "integrity check finished"
    );
    Ok(report)
}
