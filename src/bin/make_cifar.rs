//! Fetch CIFAR-10 and CIFAR-100 and write them as per-sample WebP files

use dataset_release::cifar::{self, CifarDataset};
use dataset_release::{Config, Result, init_tracing, log_summary};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::default();
    for dataset in [CifarDataset::cifar10(), CifarDataset::cifar100()] {
        let summary = cifar::run(&config, &dataset).await?;
        log_summary(&summary);
    }
    Ok(())
}
