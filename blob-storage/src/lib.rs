//! # Blob Storage Library
//!
//! A content-addressable blob store: bytes are identified by their SHA-256
//! digest and kept at `<root>/store/<first two hex chars>/<digest>`.
//!
//! ## Features
//!
//! - **Per-digest locking**: concurrent operations on the same digest are
//!   serialized, different digests never wait on each other
//! - **Atomic commits**: uploads are staged in `<root>/tmp` and renamed into place
//! - **Declared digests**: clients may send MD5, SHA-1, SHA-256 or SHA-512
//!   digests which are checked before anything is committed
//! - **Verified reads**: every retrieval recomputes the digest, corrupt blobs are purged
//! - **Hooks**: pre- and post-commit callbacks for side effects outside the store
//!
//! ## Example
//!
//! ```no_run
//! use blob_storage::{BlobStore, DeclaredDigests, HookRegistry, Pipeline};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(BlobStore::new("./data")?);
//! let pipeline = Pipeline::new(store, Arc::new(HookRegistry::new()), Default::default());
//!
//! let outcome = pipeline
//!     .ingest(&mut &b"hello world"[..], &DeclaredDigests::default())
//!     .await?;
//! println!("stored {} (new: {})", outcome.digest, outcome.created);
//!
//! let blob = pipeline.retrieve(&outcome.digest).await?;
//! println!("{} bytes", blob.size());
//! # Ok(())
//! # }
//! ```

pub mod check;
pub mod digest;
pub mod error;
pub mod hooks;
pub mod lock;
pub mod metrics;
pub mod path;
pub mod pipeline;
pub mod retrieve;
pub mod store;

pub use check::{check_store, CheckReport};
pub use digest::{is_canonical_digest, Algorithm, Digests, MultiHasher};
pub use error::{BlobError, Result};
pub use hooks::{CommitHook, HookRegistry};
pub use lock::{KeyGuard, LockRegistry};
pub use metrics::{MetricsCollector, NoOpMetrics, SharedMetrics};
pub use pipeline::{DeclaredDigests, IngestOutcome, Pipeline, StagedUpload};
pub use retrieve::Retrieved;
pub use store::BlobStore;
