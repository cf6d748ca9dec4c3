//! Fetch Tiny-ImageNet-200 and write it as per-sample WebP files

use dataset_release::{Config, Result, init_tracing, log_summary, tiny_imagenet};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let summary = tiny_imagenet::run(&Config::default()).await?;
    log_summary(&summary);
    Ok(())
}
