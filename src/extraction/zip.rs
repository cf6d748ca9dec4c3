use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archive extractor for ZIP files
pub struct ZipExtractor;

impl ZipExtractor {
    /// Extract a single ZIP entry to disk, creating directories as needed
    fn extract_zip_entry(
        mut file: zip::read::ZipFile,
        dest_path: &Path,
        archive_path: &Path,
    ) -> Result<Option<PathBuf>> {
        let file_path = match file.enclosed_name() {
            Some(path) => dest_path.join(path),
            None => {
                warn!(entry = file.name(), "skipping entry with unsafe path");
                return Ok(None);
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&file_path)
                .map_err(|e| Error::io_context(e, "failed to create directory", &file_path))?;
            return Ok(None);
        }

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io_context(e, "failed to create directory", parent))?;
        }

        let mut outfile = std::fs::File::create(&file_path)
            .map_err(|e| Error::io_context(e, "failed to create output file", &file_path))?;

        std::io::copy(&mut file, &mut outfile).map_err(|e| {
            Error::archive(
                archive_path,
                format!("failed to extract {}: {}", file_path.display(), e),
            )
        })?;

        Ok(Some(file_path))
    }

    /// Extract every entry of a ZIP archive into `dest_path`
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting ZIP extraction");

        std::fs::create_dir_all(dest_path)
            .map_err(|e| Error::io_context(e, "failed to create destination", dest_path))?;

        let file = std::fs::File::open(archive_path)
            .map_err(|e| Error::io_context(e, "failed to open ZIP archive", archive_path))?;

        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            Error::archive(archive_path, format!("failed to read ZIP archive: {}", e))
        })?;

        let mut extracted_files = Vec::new();

        for i in 0..archive.len() {
            let file = archive.by_index(i).map_err(|e| {
                Error::archive(archive_path, format!("failed to read ZIP entry: {}", e))
            })?;

            if let Some(file_path) = Self::extract_zip_entry(file, dest_path, archive_path)? {
                extracted_files.push(file_path);
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "ZIP extraction successful"
        );

        Ok(extracted_files)
    }
}
