use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Archive extractor for gzip-compressed tarballs
pub struct TarGzExtractor;

impl TarGzExtractor {
    /// Extract every entry of a `.tar.gz` into `dest_path`
    ///
    /// Entries whose path would land outside `dest_path` are skipped.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting tar.gz extraction");

        std::fs::create_dir_all(dest_path)
            .map_err(|e| Error::io_context(e, "failed to create destination", dest_path))?;

        let file = File::open(archive_path)
            .map_err(|e| Error::io_context(e, "failed to open archive", archive_path))?;
        let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

        let entries = archive
            .entries()
            .map_err(|e| Error::archive(archive_path, format!("failed to read tarball: {}", e)))?;

        let mut extracted_files = Vec::new();
        for entry in entries {
            let mut entry = entry.map_err(|e| {
                Error::archive(archive_path, format!("failed to read tar entry: {}", e))
            })?;

            let entry_path = entry
                .path()
                .map_err(|e| Error::archive(archive_path, format!("invalid entry path: {}", e)))?
                .into_owned();
            let is_file = entry.header().entry_type().is_file();

            let unpacked = entry.unpack_in(dest_path).map_err(|e| {
                Error::archive(
                    archive_path,
                    format!("failed to unpack {}: {}", entry_path.display(), e),
                )
            })?;

            if !unpacked {
                warn!(?entry_path, "skipping entry with unsafe path");
                continue;
            }
            if is_file {
                extracted_files.push(dest_path.join(&entry_path));
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "tar.gz extraction successful"
        );

        Ok(extracted_files)
    }
}
