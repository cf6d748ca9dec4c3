//! Core types shared by the pipelines

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Named partition of a dataset, processed independently
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    /// Training samples
    Train,
    /// Held-out samples (Tiny-ImageNet's validation set lands here)
    Test,
}

impl Split {
    /// Directory name under `data/<dataset>/`
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Archive type detected by file name
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveType {
    /// Gzip-compressed tarball (.tar.gz, .tgz)
    TarGz,
    /// ZIP archive (.zip)
    Zip,
}

/// Images packed as `(n, height, width, channels)` with one label per image
///
/// The image and label counts always agree; every constructor checks it.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBatch {
    images: Array4<u8>,
    labels: Vec<u32>,
}

impl SampleBatch {
    /// Pair an image array with its labels
    pub fn new(images: Array4<u8>, labels: Vec<u32>) -> Result<Self> {
        let count = images.len_of(Axis(0));
        if count != labels.len() {
            return Err(Error::LabelCountMismatch {
                images: count,
                labels: labels.len(),
            });
        }
        Ok(Self { images, labels })
    }

    /// Pack individually decoded `(h, w, c)` images along a new leading axis
    ///
    /// All images must share one shape. An empty list yields an empty batch.
    pub fn from_images(images: &[Array3<u8>], labels: Vec<u32>) -> Result<Self> {
        if images.is_empty() {
            return Self::new(Array4::zeros((0, 0, 0, 3)), labels);
        }
        let views: Vec<ArrayView3<'_, u8>> = images.iter().map(|i| i.view()).collect();
        let packed = ndarray::stack(Axis(0), &views)?;
        Self::new(packed, labels)
    }

    /// Concatenate batches in order
    pub fn concat(batches: &[SampleBatch]) -> Result<Self> {
        let views: Vec<ArrayView4<'_, u8>> = batches.iter().map(|b| b.images.view()).collect();
        let images = ndarray::concatenate(Axis(0), &views)?;
        let labels = batches
            .iter()
            .flat_map(|b| b.labels.iter().copied())
            .collect();
        Self::new(images, labels)
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch holds no samples
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// All images, `(n, h, w, c)`
    pub fn images(&self) -> &Array4<u8> {
        &self.images
    }

    /// All labels, in sample order
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// One image, `(h, w, c)`
    pub fn image(&self, index: usize) -> ArrayView3<'_, u8> {
        self.images.index_axis(Axis(0), index)
    }

    /// Iterate over `(image, label)` pairs in sample order
    pub fn iter(&self) -> impl Iterator<Item = (ArrayView3<'_, u8>, u32)> {
        self.images
            .axis_iter(Axis(0))
            .zip(self.labels.iter().copied())
    }
}

/// Result of converting one split
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitSummary {
    /// Which split
    pub split: Split,
    /// Number of encoded files written
    pub samples: usize,
    /// Directory the files were written to
    pub dir: PathBuf,
}

/// Result of converting one dataset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Dataset directory name (e.g. "cifar10")
    pub dataset: String,
    /// Per-split results, train first
    pub splits: Vec<SplitSummary>,
}

impl ConversionSummary {
    /// Total samples across all splits
    pub fn total_samples(&self) -> usize {
        self.splits.iter().map(|s| s.samples).sum()
    }
}

/// One release bundle and its digest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseArtifact {
    /// The `<dataset>_<split>.zip` archive
    pub archive: PathBuf,
    /// The sibling `<dataset>_<split>.md5` file
    pub digest_file: PathBuf,
    /// Lowercase hex MD5 of the archive
    pub digest: String,
    /// Number of files stored in the archive
    pub entries: usize,
}
