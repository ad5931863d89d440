use std::path::{Path, PathBuf};

use crate::error::{BlobError, Result};

/// Directory under the root that holds all committed blobs.
pub const STORE_DIR: &str = "store";

/// Directory under the root that holds staging files.
pub const STAGING_DIR: &str = "tmp";

/// Number of leading digest characters used as the shard directory name.
pub const SHARD_PREFIX_LEN: usize = 2;

fn validate(digest: &str) -> Result<()> {
    if digest.len() < SHARD_PREFIX_LEN
        || !digest.is_char_boundary(SHARD_PREFIX_LEN)
        || &digest[..SHARD_PREFIX_LEN] == ".."
        || digest.contains(['/', '\\', '\0'])
    {
        return Err(BlobError::InvalidKey(digest.to_string()));
    }
    Ok(())
}

/// Returns `root/store/<digest[0:2]>`.
pub fn shard_path(root: &Path, digest: &str) -> Result<PathBuf> {
    validate(digest)?;
    Ok(root.join(STORE_DIR).join(&digest[..SHARD_PREFIX_LEN]))
}

/// Returns `root/store/<digest[0:2]>/<digest>`.
pub fn blob_path(root: &Path, digest: &str) -> Result<PathBuf> {
    Ok(shard_path(root, digest)?.join(digest))
}
