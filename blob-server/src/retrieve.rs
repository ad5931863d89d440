use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use blob_storage::{BlobError, BlobStore, HookRegistry, Pipeline, SharedMetrics};
use clap::Parser;
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;

#[derive(Parser, Debug)]
pub struct RetrieveConfig {
    #[arg(long, env = "STORAGE_PATH", default_value = "/tmp")]
    pub storage_path: PathBuf,

    #[arg(required = true, help = "SHA-256 digest of the blob")]
    pub digest: String,

    #[arg(required = true, help = "Destination file path")]
    pub dest: PathBuf,
}

/// Copies a verified blob out of the store into `dest`.
#[tokio::main]
pub async fn retrieve(args: RetrieveConfig) -> Result<()> {
    let store = Arc::new(BlobStore::new(&args.storage_path)?);
    let pipeline = Pipeline::new(store, Arc::new(HookRegistry::new()), SharedMetrics::default());

    let blob = match pipeline.retrieve(&args.digest).await {
        Ok(blob) => blob,
        Err(BlobError::NotFound(_)) => {
            eprintln!("Blob not found");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut file = tokio::fs::File::create(&args.dest)
        .await
        .with_context(|| format!("creating {}", args.dest.display()))?;
    let mut chunks = std::pin::pin!(blob.into_stream());
    while let Some(chunk) = chunks.try_next().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(())
}
