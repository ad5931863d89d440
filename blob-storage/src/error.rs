use std::fmt;
use std::io;

use crate::digest::Algorithm;

pub type Result<T> = std::result::Result<T, BlobError>;

/// Errors returned by the blob store and the pipelines built on it.
#[derive(Debug)]
pub enum BlobError {
    /// The identifier can not be used as a digest (too short, or not a single path component).
    InvalidKey(String),
    /// No blob is stored under the digest.
    NotFound(String),
    /// A blob with this digest is already committed. The pipeline treats this as success.
    AlreadyExists(String),
    /// A client-declared digest disagrees with the uploaded bytes.
    IntegrityMismatch {
        algorithm: Algorithm,
        expected: String,
        actual: String,
    },
    /// The stored bytes no longer hash to the digest they are stored under.
    Corrupted { digest: String, actual: String },
    /// Any unexpected filesystem or stream failure.
    InternalIO(io::Error),
}

impl BlobError {
    /// Short machine readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BlobError::InvalidKey(_) => "invalid_key",
            BlobError::NotFound(_) => "not_found",
            BlobError::AlreadyExists(_) => "already_exists",
            BlobError::IntegrityMismatch { .. } => "integrity_mismatch",
            BlobError::Corrupted { .. } => "corrupted",
            BlobError::InternalIO(_) => "internal_io",
        }
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::InvalidKey(key) => write!(f, "invalid blob key: {:?}", key),
            BlobError::NotFound(digest) => write!(f, "blob {} not found", digest),
            BlobError::AlreadyExists(digest) => write!(f, "blob {} already exists", digest),
            BlobError::IntegrityMismatch {
                algorithm,
                expected,
                actual,
            } => write!(
                f,
                "declared {} digest {} does not match computed {}",
                algorithm, expected, actual
            ),
            BlobError::Corrupted { digest, actual } => {
                write!(f, "blob {} is corrupted (content hashes to {})", digest, actual)
            }
            BlobError::InternalIO(e) => write!(f, "internal I/O error: {}", e),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobError::InternalIO(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BlobError {
    fn from(e: io::Error) -> Self {
        BlobError::InternalIO(e)
    }
}
