//! Tiny-ImageNet-200 conversion
//!
//! The upstream zip unpacks to `tiny-imagenet-200/` with:
//!
//! - `wnids.txt`: one class code (WordNet ID) per line; the line position is
//!   the label
//! - `train/<wnid>/images/*.JPEG`
//! - `val/images/*.JPEG` plus `val/val_annotations.txt` mapping each file to
//!   its class code
//!
//! The unlabelled `test/` directory is ignored. The validation set is written
//! as the `test` split.

use image::{DynamicImage, ImageReader};
use ndarray::{Array3, Array4};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{Config, DatasetSource};
use crate::encoder::write_split;
use crate::error::{Error, Result};
use crate::fetch::download_and_extract;
use crate::progress;
use crate::types::{ConversionSummary, SampleBatch, Split, SplitSummary};

/// Output directory name under `data/`
pub const DATASET_NAME: &str = "tiny_imagenet_200";
/// Directory the archive unpacks to
pub const EXTRACTED_DIR: &str = "tiny-imagenet-200";

const MANIFEST: &str = "wnids.txt";
const IMAGE_EXTENSION: &str = "JPEG";

/// Class code to dense label, in manifest order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelIndex {
    codes: Vec<String>,
    labels: HashMap<String, u32>,
}

impl LabelIndex {
    /// Build from class codes in listing order
    ///
    /// A code listed twice would map two labels to one class, so it is
    /// rejected.
    pub fn from_codes<I, S>(codes: I, source: &Path) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for code in codes {
            let code = code.into();
            let label = u32::try_from(index.codes.len())
                .map_err(|_| Error::invalid_dataset(source, "too many classes"))?;
            if index.labels.insert(code.clone(), label).is_some() {
                return Err(Error::invalid_dataset(
                    source,
                    format!("class {} listed twice", code),
                ));
            }
            index.codes.push(code);
        }
        Ok(index)
    }

    /// Read `wnids.txt`; lines are trimmed and blank lines skipped
    pub fn from_manifest(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io_context(e, "failed to read", path))?;
        let index = Self::from_codes(
            text.lines().map(str::trim).filter(|l| !l.is_empty()),
            path,
        )?;
        info!(?path, classes = index.len(), "label index loaded");
        Ok(index)
    }

    /// Label of `code`; `referenced_by` names the file that used it
    pub fn label_of(&self, code: &str, referenced_by: &Path) -> Result<u32> {
        self.labels
            .get(code)
            .copied()
            .ok_or_else(|| Error::UnknownClass {
                code: code.to_string(),
                path: referenced_by.to_path_buf(),
            })
    }

    /// Class codes paired with their labels, in label order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.codes.iter().zip(0u32..).map(|(c, l)| (c.as_str(), l))
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the manifest listed no classes
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Decode an image as `(h, w, 3)`
///
/// Greyscale images are repeated across three channels. Anything other than
/// 8-bit greyscale or RGB is rejected.
pub fn read_image(path: &Path) -> Result<Array3<u8>> {
    let decoded = ImageReader::open(path)
        .map_err(|e| Error::io_context(e, "failed to open", path))?
        .with_guessed_format()
        .map_err(|e| Error::io_context(e, "failed to read", path))?
        .decode()?;

    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    match decoded {
        DynamicImage::ImageRgb8(rgb) => Ok(Array3::from_shape_vec(
            (height, width, 3),
            rgb.into_raw(),
        )?),
        DynamicImage::ImageLuma8(gray) => {
            let raw = gray.into_raw();
            Ok(Array3::from_shape_fn((height, width, 3), |(y, x, _)| {
                raw[y * width + x]
            }))
        }
        other => Err(Error::UnsupportedImage {
            path: path.to_path_buf(),
            color: format!("{:?}", other.color()),
        }),
    }
}

/// Packs decoded images straight into one `(n, h, w, c)` pixel buffer
///
/// The buffer is sized for the whole split once the first image fixes the
/// shape; every later image must match it.
struct Packer {
    capacity: usize,
    shape: Option<(usize, usize, usize)>,
    pixels: Vec<u8>,
    labels: Vec<u32>,
}

impl Packer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            shape: None,
            pixels: Vec::new(),
            labels: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, path: &Path, image: Array3<u8>, label: u32) -> Result<()> {
        let dim = image.dim();
        match self.shape {
            None => {
                self.shape = Some(dim);
                self.pixels.reserve_exact(self.capacity * image.len());
            }
            Some(expected) if expected != dim => {
                return Err(Error::ShapeMismatch {
                    path: path.to_path_buf(),
                    expected,
                    actual: dim,
                });
            }
            Some(_) => {}
        }
        match image.as_slice() {
            Some(raw) => self.pixels.extend_from_slice(raw),
            None => self.pixels.extend(image.iter().copied()),
        }
        self.labels.push(label);
        Ok(())
    }

    fn finish(self) -> Result<SampleBatch> {
        let (h, w, c) = self.shape.unwrap_or((0, 0, 3));
        let images = Array4::from_shape_vec((self.labels.len(), h, w, c), self.pixels)?;
        SampleBatch::new(images, self.labels)
    }
}

fn sorted_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| Error::io_context(e, "failed to list", dir))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| Error::io_context(e, "failed to list", dir))?
            .path();
        if path.is_file() && path.extension().is_some_and(|e| e == IMAGE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Training split: each class in manifest order, its images in file-name order
pub fn load_train(root: &Path, index: &LabelIndex) -> Result<SampleBatch> {
    let mut per_class = Vec::with_capacity(index.len());
    for (code, label) in index.iter() {
        let files = sorted_images(&root.join("train").join(code).join("images"))?;
        debug!(code, label, count = files.len(), "class listed");
        per_class.push((label, files));
    }

    let total = per_class.iter().map(|(_, f)| f.len()).sum();
    let bar = progress::items_bar(total, "Reading train images");
    let mut packer = Packer::new(total);
    for (label, files) in per_class {
        for path in files {
            packer.push(&path, read_image(&path)?, label)?;
            bar.inc(1);
        }
    }
    bar.finish_and_clear();

    packer.finish()
}

/// Validation split, in annotation-file order
///
/// Each line of `val/val_annotations.txt` is tab-separated; the first field is
/// the file name under `val/images/`, the second its class code.
pub fn load_val(root: &Path, index: &LabelIndex) -> Result<SampleBatch> {
    let val_dir = root.join("val");
    let annotations = val_dir.join("val_annotations.txt");
    let text = std::fs::read_to_string(&annotations)
        .map_err(|e| Error::io_context(e, "failed to read", &annotations))?;

    let mut entries = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(file_name), Some(code)) = (fields.next(), fields.next()) else {
            return Err(Error::invalid_dataset(
                &annotations,
                format!("line {} has fewer than two fields", line_no + 1),
            ));
        };
        let label = index.label_of(code.trim(), &annotations)?;
        entries.push((val_dir.join("images").join(file_name.trim()), label));
    }

    let bar = progress::items_bar(entries.len(), "Reading val images");
    let mut packer = Packer::new(entries.len());
    for (path, label) in entries {
        packer.push(&path, read_image(&path)?, label)?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    packer.finish()
}

/// Download, decode and write Tiny-ImageNet-200 from its usual location
pub async fn run(config: &Config) -> Result<ConversionSummary> {
    run_from(config, &DatasetSource::tiny_imagenet()).await
}

/// Same as [`run`], fetching the archive from `source`
pub async fn run_from(config: &Config, source: &DatasetSource) -> Result<ConversionSummary> {
    download_and_extract(source, &config.download_dir).await?;

    let root = config.download_dir.join(EXTRACTED_DIR);
    let index = LabelIndex::from_manifest(&root.join(MANIFEST))?;

    let mut splits = Vec::new();
    for split in [Split::Train, Split::Test] {
        let dir = config.split_dir(DATASET_NAME, split);

        let (root, index, out) = (root.clone(), index.clone(), dir.clone());
        let samples = tokio::task::spawn_blocking(move || {
            let batch = match split {
                Split::Train => load_train(&root, &index)?,
                Split::Test => load_val(&root, &index)?,
            };
            write_split(&batch, &out)
        })
        .await??;

        info!(dataset = DATASET_NAME, %split, samples, "split converted");
        splits.push(SplitSummary {
            split,
            samples,
            dir,
        });
    }

    Ok(ConversionSummary {
        dataset: DATASET_NAME.to_string(),
        splits,
    })
}
