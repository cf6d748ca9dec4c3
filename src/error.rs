//! Error types for dataset-release
//!
//! Every pipeline stage reports failures through the single [`Error`] enum.
//! Nothing is retried or recovered: errors propagate with `?` up to the
//! binary's `main`, which prints them and exits non-zero.

use std::path::PathBuf;
use thiserror::Error;

use crate::pickle::PickleError;

/// Result type alias for dataset-release operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dataset-release
///
/// Variants are grouped by the stage that raises them: network, archive,
/// codec and filesystem.
#[derive(Debug, Error)]
pub enum Error {
    /// Network error while connecting or streaming a response body
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that was requested
        url: String,
        /// The status code returned by the server
        status: u16,
    },

    /// Archive could not be read or unpacked
    #[error("failed to extract {archive}: {reason}")]
    Archive {
        /// The archive being processed
        archive: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Pickled batch file could not be decoded
    #[error("failed to unpickle {path}: {source}")]
    Pickle {
        /// The batch file being decoded
        path: PathBuf,
        /// The underlying pickle error
        #[source]
        source: PickleError,
    },

    /// Extracted dataset files do not have the expected structure
    #[error("invalid dataset file {path}: {reason}")]
    InvalidDataset {
        /// The offending file or directory
        path: PathBuf,
        /// What was expected
        reason: String,
    },

    /// Class code not listed in the manifest
    #[error("unknown class code {code:?} referenced by {path}")]
    UnknownClass {
        /// The class code that could not be resolved
        code: String,
        /// The file that referenced it
        path: PathBuf,
    },

    /// Image could not be decoded or encoded
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Source image uses a colour layout the converter does not handle
    #[error("unsupported image layout {color} in {path}")]
    UnsupportedImage {
        /// The image file
        path: PathBuf,
        /// Debug name of the decoded colour type
        color: String,
    },

    /// Images of one split do not share the same dimensions
    #[error("image {path} is {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        /// The image file whose shape differs
        path: PathBuf,
        /// Shape of the first image in the split (height, width, channels)
        expected: (usize, usize, usize),
        /// Shape of this image
        actual: (usize, usize, usize),
    },

    /// Sample and label counts disagree
    #[error("{images} images but {labels} labels")]
    LabelCountMismatch {
        /// Number of images
        images: usize,
        /// Number of labels
        labels: usize,
    },

    /// Array could not be reshaped
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// ZIP archive could not be written
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Blocking task panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::Archive`] for the given archive path
    pub fn archive(archive: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Archive {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an [`Error::InvalidDataset`] for the given path
    pub fn invalid_dataset(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidDataset {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attach context to an I/O error without losing its kind
    pub(crate) fn io_context(
        err: std::io::Error,
        action: &str,
        path: &std::path::Path,
    ) -> Self {
        Error::Io(std::io::Error::new(
            err.kind(),
            format!("{} '{}': {}", action, path.display(), err),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let err = Error::HttpStatus {
            url: "https://example.com/a.zip".to_string(),
            status: 404,
        };
        assert_eq!(err.to_string(), "HTTP 404 fetching https://example.com/a.zip");
    }

    #[test]
    fn test_io_context_preserves_kind() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::io_context(inner, "failed to open", std::path::Path::new("/x/y"));
        match err {
            Error::Io(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::NotFound);
                assert!(e.to_string().contains("/x/y"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_label_count_mismatch_display() {
        let err = Error::LabelCountMismatch {
            images: 3,
            labels: 2,
        };
        assert_eq!(err.to_string(), "3 images but 2 labels");
    }
}
