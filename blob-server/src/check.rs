use std::path::PathBuf;

use anyhow::Result;
use blob_storage::{check_store, BlobStore};
use clap::Parser;

#[derive(Parser, Debug)]
pub struct CheckConfig {
    #[arg(long, env = "STORAGE_PATH", default_value = "/tmp")]
    pub storage_path: PathBuf,

    #[arg(long, help = "Delete blobs whose content does not match their digest")]
    pub purge: bool,
}

/// Verifies every stored blob and prints the ones that are corrupt.
#[tokio::main]
pub async fn check_integrity(args: CheckConfig) -> Result<()> {
    let store = BlobStore::new(&args.storage_path)?;
    let report = check_store(&store, args.purge).await?;

    for digest in &report.corrupt {
        println!("corrupt: {digest}");
    }
    for name in &report.skipped {
        println!("skipped (not a digest name): {name}");
    }
    println!(
        "checked {} blobs, {} corrupt{}",
        report.checked,
        report.corrupt.len(),
        if report.purged && !report.is_healthy() { " (purged)" } else { "" }
    );

    if !report.is_healthy() && !report.purged {
        anyhow::bail!("found {} corrupt blobs", report.corrupt.len());
    }
    Ok(())
}
