//! Per-sample encoding and naming
//!
//! Every sample of a split becomes one lossless WebP file named
//! `{id}.{label}.webp`. Both fields are zero-padded to widths derived from
//! the split itself (digit count of the sample count, digit count of the
//! largest label), so the file names sort in sample order.

use image::codecs::webp::WebPEncoder;
use image::error::{ImageError, ParameterError, ParameterErrorKind};
use image::{ExtendedColorType, ImageEncoder};
use ndarray::ArrayView3;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::progress;
use crate::types::SampleBatch;

/// Extension of encoded sample files
pub const SAMPLE_EXTENSION: &str = "webp";

/// Number of decimal digits in `n` (1 for zero)
pub fn digit_count(n: u64) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

/// Padding width of the ID field for a split of `count` samples
pub fn id_width(count: usize) -> usize {
    digit_count(count as u64)
}

/// Padding width of the label field: digits of the largest label
pub fn label_width(labels: &[u32]) -> usize {
    labels
        .iter()
        .max()
        .map_or(1, |&max| digit_count(u64::from(max)))
}

/// `{id}.{label}.webp`, both fields zero-padded
pub fn sample_file_name(id: usize, label: u32, id_width: usize, label_width: usize) -> String {
    format!(
        "{:0id_width$}.{:0label_width$}.{}",
        id, label, SAMPLE_EXTENSION
    )
}

/// Encode an `(h, w, 3)` image as lossless WebP
pub fn encode_webp(image: ArrayView3<'_, u8>) -> Result<Vec<u8>> {
    let (height, width, channels) = image.dim();
    if channels != 3 {
        return Err(dimension_error());
    }
    let width = u32::try_from(width).map_err(|_| dimension_error())?;
    let height = u32::try_from(height).map_err(|_| dimension_error())?;

    // iter() walks in logical (row-major, channel-last) order whatever the memory layout
    let raw: Vec<u8> = image.iter().copied().collect();

    let mut out = Vec::new();
    WebPEncoder::new_lossless(&mut out).write_image(
        &raw,
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

fn dimension_error() -> Error {
    Error::Image(ImageError::Parameter(ParameterError::from_kind(
        ParameterErrorKind::DimensionMismatch,
    )))
}

/// Encode and write every sample of `batch` into `dir`
///
/// Creates `dir` if needed and returns the number of files written. The first
/// encode or write failure aborts; files written before it stay on disk.
pub fn write_split(batch: &SampleBatch, dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io_context(e, "failed to create", dir))?;

    let id_width = id_width(batch.len());
    let label_width = label_width(batch.labels());

    info!(?dir, count = batch.len(), id_width, label_width, "saving images");

    let bar = progress::items_bar(batch.len(), &format!("Saving to {}", dir.display()));
    let mut written = 0;
    for (id, (image, label)) in batch.iter().enumerate() {
        let path = dir.join(sample_file_name(id, label, id_width, label_width));
        let bytes = encode_webp(image)?;
        std::fs::write(&path, bytes).map_err(|e| Error::io_context(e, "failed to write", &path))?;
        written += 1;
        bar.inc(1);
    }
    bar.finish_and_clear();

    debug!(?dir, written, "split written");
    Ok(written)
}
