//! Archive fetching
//!
//! Streams a remote archive to disk and unpacks it next to itself. There is
//! no retry, no resume and no integrity check: a non-success status aborts
//! the run before anything is written.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::DatasetSource;
use crate::error::{Error, Result};
use crate::extraction::extract_archive;
use crate::progress;

/// Download `url` to `dest`, returning the number of bytes written
///
/// Chunks are written as they arrive. Progress is shown as a byte bar when the
/// server sends `Content-Length`, and as a spinner otherwise.
pub async fn download_file(url: &str, dest: &Path) -> Result<u64> {
    let mut response = reqwest::get(url).await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string());
    info!(url, ?dest, "downloading {}", file_name);

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| Error::io_context(e, "failed to create", dest))?;

    let bar = progress::bytes_bar(response.content_length(), &file_name);
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io_context(e, "failed to write", dest))?;
        written += chunk.len() as u64;
        bar.set_position(written);
    }
    file.flush()
        .await
        .map_err(|e| Error::io_context(e, "failed to flush", dest))?;
    bar.finish_and_clear();

    debug!(url, bytes = written, "download complete");
    Ok(written)
}

/// Download `source` into `download_dir` and extract it there
///
/// Returns the path of the downloaded archive. Both the archive and its
/// extracted contents stay on disk.
pub async fn download_and_extract(source: &DatasetSource, download_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(download_dir)
        .await
        .map_err(|e| Error::io_context(e, "failed to create", download_dir))?;

    let archive_path = download_dir.join(&source.file_name);
    download_file(&source.url, &archive_path).await?;

    let archive = archive_path.clone();
    let dest = download_dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || extract_archive(&archive, &dest)).await??;

    info!(
        ?archive_path,
        extracted_count = files.len(),
        "archive extracted"
    );
    Ok(archive_path)
}
