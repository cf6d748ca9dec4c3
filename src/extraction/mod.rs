//! Archive extraction
//!
//! Unpacks the upstream dataset archives: gzip tarballs (CIFAR) and ZIP files
//! (Tiny-ImageNet). The archive type is detected from the file name.

mod tar_gz;
mod zip;


pub use tar_gz::TarGzExtractor;
pub use zip::ZipExtractor;

use crate::error::{Error, Result};
use crate::types::ArchiveType;
use std::path::{Path, PathBuf};
use tracing::info;

/// Detect archive type from a file name
///
/// `.tar.gz` and `.tgz` are gzip tarballs, `.zip` is ZIP. Matching ignores case.
pub fn detect_archive_type(path: &Path) -> Option<ArchiveType> {
    let name = path.file_name()?.to_str()?.to_lowercase();

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveType::TarGz)
    } else if name.ends_with(".zip") {
        Some(ArchiveType::Zip)
    } else {
        None
    }
}

/// Unified archive extraction dispatcher
///
/// Detects the archive type and routes to the matching extractor. Returns the
/// regular files written under `dest_path`.
pub fn extract_archive(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
    let archive_type = detect_archive_type(archive_path).ok_or_else(|| {
        Error::archive(
            archive_path,
            format!("unknown archive type for file: {}", archive_path.display()),
        )
    })?;

    info!(?archive_path, ?archive_type, ?dest_path, "extracting archive");

    match archive_type {
        ArchiveType::TarGz => TarGzExtractor::extract(archive_path, dest_path),
        ArchiveType::Zip => ZipExtractor::extract(archive_path, dest_path),
    }
}
