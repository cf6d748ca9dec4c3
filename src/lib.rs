//! # dataset-release
//!
//! Converts CIFAR-10, CIFAR-100 and Tiny-ImageNet-200 from their upstream
//! distribution formats into one lossless WebP file per sample, and packages
//! the converted splits for release.
//!
//! ## Pipelines
//!
//! - **CIFAR** ([`cifar`]): fetch the Python tarball, unpickle each batch,
//!   reshape to channel-last, write `data/cifar{10,100}/{train,test}/`.
//! - **Tiny-ImageNet** ([`tiny_imagenet`]): fetch the zip, label classes in
//!   `wnids.txt` order, read the train and validation images, write
//!   `data/tiny_imagenet_200/{train,test}/`.
//! - **Release** ([`release`]): zip every `data/<dataset>/<split>/` into
//!   `release/<dataset>_<split>.zip` with an `.md5` digest beside it.
//!
//! Each sample lands in `{id}.{label}.webp`, both fields zero-padded so file
//! names sort in sample order.
//!
//! ## Quick Start
//!
//! ```no_run
//! use dataset_release::{cifar, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     for dataset in [cifar::CifarDataset::cifar10(), cifar::CifarDataset::cifar100()] {
//!         let summary = cifar::run(&config, &dataset).await?;
//!         println!("{}: {} samples", summary.dataset, summary.total_samples());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// CIFAR-10 / CIFAR-100 conversion
pub mod cifar;
/// Configuration types
pub mod config;
/// Per-sample WebP encoding and naming
pub mod encoder;
/// Error types
pub mod error;
/// Archive extraction
pub mod extraction;
/// Archive download
pub mod fetch;
/// Python pickle decoding
pub mod pickle;
/// Progress bars
pub mod progress;
/// Release packaging
pub mod release;
/// Tiny-ImageNet-200 conversion
pub mod tiny_imagenet;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{Config, DatasetSource};
pub use error::{Error, Result};
pub use types::{ConversionSummary, ReleaseArtifact, SampleBatch, Split, SplitSummary};

/// Install the `tracing` subscriber used by the binaries
///
/// Logs at `info` unless `RUST_LOG` says otherwise. Calling it twice is
/// harmless; the second call leaves the first subscriber in place.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Log a finished conversion, one line per split
pub fn log_summary(summary: &ConversionSummary) {
    for split in &summary.splits {
        tracing::info!(
            dataset = %summary.dataset,
            split = %split.split,
            samples = split.samples,
            dir = %split.dir.display(),
            "split ready"
        );
    }
    tracing::info!(
        dataset = %summary.dataset,
        total = summary.total_samples(),
        "dataset converted"
    );
}
