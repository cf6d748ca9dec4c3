//! CIFAR-10 / CIFAR-100 conversion
//!
//! The Python distributions of both datasets store samples in pickled
//! dictionaries: `data` is a `uint8` array of shape `(n, 3072)` with each row
//! laid out channel-first (`3 × 32 × 32`), and the labels live under
//! `labels` (CIFAR-10) or `fine_labels` (CIFAR-100).

use ndarray::Array4;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{Config, DatasetSource};
use crate::encoder::write_split;
use crate::error::{Error, Result};
use crate::fetch::download_and_extract;
use crate::pickle::{self, Value};
use crate::types::{ConversionSummary, SampleBatch, Split, SplitSummary};

/// Image height in pixels
pub const HEIGHT: usize = 32;
/// Image width in pixels
pub const WIDTH: usize = 32;
/// Colour channels per pixel
pub const CHANNELS: usize = 3;

/// Label keys in lookup order; the first one present wins
const LABEL_KEYS: [&str; 2] = ["labels", "fine_labels"];

/// Where a CIFAR variant comes from and which batch files make up each split
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CifarDataset {
    /// Output directory name under `data/`
    pub name: &'static str,
    /// Remote archive
    pub source: DatasetSource,
    /// Directory the archive unpacks to
    pub extracted_dir: &'static str,
    /// Training batch files, in concatenation order
    pub train_files: Vec<&'static str>,
    /// Test batch files, in concatenation order
    pub test_files: Vec<&'static str>,
}

impl CifarDataset {
    /// CIFAR-10: five training batches and one test batch
    pub fn cifar10() -> Self {
        Self {
            name: "cifar10",
            source: DatasetSource::cifar10(),
            extracted_dir: "cifar-10-batches-py",
            train_files: vec![
                "data_batch_1",
                "data_batch_2",
                "data_batch_3",
                "data_batch_4",
                "data_batch_5",
            ],
            test_files: vec!["test_batch"],
        }
    }

    /// CIFAR-100: one training file and one test file
    pub fn cifar100() -> Self {
        Self {
            name: "cifar100",
            source: DatasetSource::cifar100(),
            extracted_dir: "cifar-100-python",
            train_files: vec!["train"],
            test_files: vec!["test"],
        }
    }

    /// Same layout, fetched from another location
    pub fn with_source(mut self, source: DatasetSource) -> Self {
        self.source = source;
        self
    }

    /// Batch files of `split` inside `download_dir`
    pub fn batch_paths(&self, download_dir: &Path, split: Split) -> Vec<PathBuf> {
        let files = match split {
            Split::Train => &self.train_files,
            Split::Test => &self.test_files,
        };
        let root = download_dir.join(self.extracted_dir);
        files.iter().map(|f| root.join(f)).collect()
    }
}

fn read_labels(entry: &Value, path: &Path) -> Result<Vec<u32>> {
    let labels = LABEL_KEYS
        .iter()
        .find_map(|key| entry.get(key))
        .ok_or_else(|| {
            Error::invalid_dataset(path, format!("none of {:?} present", LABEL_KEYS))
        })?;

    labels
        .as_seq()
        .ok_or_else(|| Error::invalid_dataset(path, "labels are not a list"))?
        .iter()
        .map(|label| {
            label
                .as_int()
                .and_then(|l| u32::try_from(l).ok())
                .ok_or_else(|| Error::invalid_dataset(path, format!("invalid label {:?}", label)))
        })
        .collect()
}

fn read_images(entry: &Value, path: &Path) -> Result<Array4<u8>> {
    let Some(Value::NdArray(data)) = entry.get("data") else {
        return Err(Error::invalid_dataset(path, "missing 'data' array"));
    };

    let row_len = CHANNELS * HEIGHT * WIDTH;
    if data.dtype != "u1" {
        return Err(Error::invalid_dataset(
            path,
            format!("expected uint8 pixels, found dtype {}", data.dtype),
        ));
    }
    if data.fortran_order {
        return Err(Error::invalid_dataset(path, "column-major pixel data"));
    }
    let count = match data.shape.as_slice() {
        [n, len] if *len == row_len => *n,
        shape => {
            return Err(Error::invalid_dataset(
                path,
                format!("expected shape (n, {}), found {:?}", row_len, shape),
            ));
        }
    };

    // n (c h w) -> n h w c
    let chw = Array4::from_shape_vec((count, CHANNELS, HEIGHT, WIDTH), data.data.clone())?;
    Ok(chw
        .permuted_axes([0, 2, 3, 1])
        .as_standard_layout()
        .into_owned())
}

/// Decode one pickled batch file into images and labels
pub fn load_batch(path: &Path) -> Result<SampleBatch> {
    let file = File::open(path).map_err(|e| Error::io_context(e, "failed to open", path))?;
    let entry = pickle::read_pickle(&mut BufReader::new(file)).map_err(|source| Error::Pickle {
        path: path.to_path_buf(),
        source,
    })?;

    let images = read_images(&entry, path)?;
    let labels = read_labels(&entry, path)?;
    let batch = SampleBatch::new(images, labels)?;

    debug!(?path, count = batch.len(), "batch decoded");
    Ok(batch)
}

/// Decode batch files in order and concatenate them into one split
pub fn load_batches(paths: &[PathBuf]) -> Result<SampleBatch> {
    let batches = paths
        .iter()
        .map(|p| load_batch(p))
        .collect::<Result<Vec<_>>>()?;
    SampleBatch::concat(&batches)
}

/// Download, decode and write both splits of a CIFAR variant
pub async fn run(config: &Config, dataset: &CifarDataset) -> Result<ConversionSummary> {
    download_and_extract(&dataset.source, &config.download_dir).await?;

    let mut splits = Vec::new();
    for split in [Split::Train, Split::Test] {
        let paths = dataset.batch_paths(&config.download_dir, split);
        let dir = config.split_dir(dataset.name, split);

        let out = dir.clone();
        let samples =
            tokio::task::spawn_blocking(move || write_split(&load_batches(&paths)?, &out))
                .await??;

        info!(dataset = dataset.name, %split, samples, "split converted");
        splits.push(SplitSummary {
            split,
            samples,
            dir,
        });
    }

    Ok(ConversionSummary {
        dataset: dataset.name.to_string(),
        splits,
    })
}
