//! Release packaging
//!
//! Every `data/<dataset>/<split>/` directory becomes
//! `release/<dataset>_<split>.zip` with an MD5 digest of the archive in a
//! sibling `.md5` file. Archives are rebuilt from scratch on every run.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{Error, Result};
use crate::progress;
use crate::types::ReleaseArtifact;

const COMPRESSION_LEVEL: i32 = 9;
const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// Entries of `dir` sorted by name, keeping only those `keep` accepts
fn sorted_entries(dir: &Path, keep: fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io_context(e, "failed to list", dir))? {
        let path = entry
            .map_err(|e| Error::io_context(e, "failed to list", dir))?
            .path();
        if keep(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Zip the regular files of `dir` into `output`, flat and in name order
///
/// Entries are bzip2-compressed at the highest level and carry a fixed
/// timestamp, so identical input produces a byte-identical archive. Returns
/// the number of entries written.
pub fn zip_dir(dir: &Path, output: &Path) -> Result<usize> {
    let files = sorted_entries(dir, Path::is_file)?;
    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let out = File::create(output).map_err(|e| Error::io_context(e, "failed to create", output))?;
    let mut writer = ZipWriter::new(BufWriter::new(out));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Bzip2)
        .compression_level(Some(COMPRESSION_LEVEL))
        .last_modified_time(DateTime::default());

    let bar = progress::items_bar(files.len(), &format!("Zipping to {}", file_name));
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::invalid_dataset(path, "file has no name"))?;
        let data =
            std::fs::read(path).map_err(|e| Error::io_context(e, "failed to read", path))?;

        writer.start_file(name, options)?;
        writer
            .write_all(&data)
            .map_err(|e| Error::io_context(e, "failed to write", output))?;
        bar.inc(1);
    }
    writer
        .finish()?
        .flush()
        .map_err(|e| Error::io_context(e, "failed to flush", output))?;
    bar.finish_and_clear();

    debug!(?dir, ?output, entries = files.len(), "directory zipped");
    Ok(files.len())
}

/// Lowercase hex MD5 of a file's contents
pub fn file_digest(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io_context(e, "failed to open", path))?;
    let mut reader = BufReader::new(file);
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| Error::io_context(e, "failed to read", path))?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Archive and digest one split directory as `<dataset>_<split>`
pub fn release_split(
    split_dir: &Path,
    dataset: &str,
    split: &str,
    release_dir: &Path,
) -> Result<ReleaseArtifact> {
    let stem = format!("{}_{}", dataset, split);
    let archive = release_dir.join(format!("{}.zip", stem));
    let digest_file = release_dir.join(format!("{}.md5", stem));

    let entries = zip_dir(split_dir, &archive)?;
    let digest = file_digest(&archive)?;
    std::fs::write(&digest_file, &digest)
        .map_err(|e| Error::io_context(e, "failed to write", &digest_file))?;

    info!(?archive, entries, %digest, "release artifact written");
    Ok(ReleaseArtifact {
        archive,
        digest_file,
        digest,
        entries,
    })
}

/// Package every `<dataset>/<split>` directory under `data_dir`
///
/// Datasets and splits are visited in name order; plain files at either level
/// are ignored.
pub fn release_all(data_dir: &Path, release_dir: &Path) -> Result<Vec<ReleaseArtifact>> {
    std::fs::create_dir_all(release_dir)
        .map_err(|e| Error::io_context(e, "failed to create", release_dir))?;

    let mut artifacts = Vec::new();
    for dataset_dir in sorted_entries(data_dir, Path::is_dir)? {
        let dataset = dir_name(&dataset_dir)?;
        for split_dir in sorted_entries(&dataset_dir, Path::is_dir)? {
            let split = dir_name(&split_dir)?;
            artifacts.push(release_split(&split_dir, &dataset, &split, release_dir)?);
        }
    }

    info!(count = artifacts.len(), ?release_dir, "release complete");
    Ok(artifacts)
}

fn dir_name(dir: &Path) -> Result<String> {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::invalid_dataset(dir, "directory has no name"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn split_with(dir: &Path, files: &[(&str, &str)]) {
        std::fs::create_dir_all(dir).unwrap();
        for (name, data) in files {
            std::fs::write(dir.join(name), data).unwrap();
        }
    }

    #[test]
    fn test_zip_dir_sorted_flat_entries() {
        let temp_dir = TempDir::new().unwrap();
        let split = temp_dir.path().join("train");
        split_with(&split, &[("b.webp", "bbbb"), ("a.webp", "aaaa")]);
        std::fs::create_dir(split.join("nested")).unwrap();
        let output = temp_dir.path().join("out.zip");

        assert_eq!(zip_dir(&split, &output).unwrap(), 2);

        let mut archive = zip::ZipArchive::new(File::open(&output).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let names: Vec<_> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"a.webp".to_string()));
        assert_eq!(archive.by_index(0).unwrap().name(), "a.webp");

        let mut entry = archive.by_name("b.webp").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Bzip2);
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"bbbb");
    }

    #[test]
    fn test_file_digest_known_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            file_digest(&path).unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn test_digest_is_deterministic_and_content_sensitive() {
        let temp_dir = TempDir::new().unwrap();
        let split = temp_dir.path().join("test");
        split_with(&split, &[("a.webp", "first image"), ("b.webp", "second image")]);

        let first = temp_dir.path().join("first.zip");
        let second = temp_dir.path().join("second.zip");
        zip_dir(&split, &first).unwrap();
        zip_dir(&split, &second).unwrap();
        let digest = file_digest(&first).unwrap();
        assert_eq!(digest, file_digest(&second).unwrap());

        std::fs::write(split.join("a.webp"), b"first imagf").unwrap();
        let changed = temp_dir.path().join("changed.zip");
        zip_dir(&split, &changed).unwrap();
        assert_ne!(digest, file_digest(&changed).unwrap());
    }

    #[test]
    fn test_release_all_layout() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        let release = temp_dir.path().join("release");
        split_with(&data.join("cifar10/train"), &[("0.0.webp", "x")]);
        split_with(&data.join("cifar10/test"), &[("0.1.webp", "y")]);
        split_with(&data.join("tiny_imagenet_200/train"), &[("0.0.webp", "z")]);
        std::fs::write(data.join("README"), b"ignored").unwrap();
        std::fs::write(data.join("cifar10/notes.txt"), b"ignored").unwrap();

        let artifacts = release_all(&data, &release).unwrap();
        let stems: Vec<_> = artifacts
            .iter()
            .map(|a| a.archive.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            stems,
            vec![
                "cifar10_test.zip",
                "cifar10_train.zip",
                "tiny_imagenet_200_train.zip"
            ]
        );

        for artifact in &artifacts {
            assert_eq!(artifact.entries, 1);
            assert_eq!(artifact.digest_file, artifact.archive.with_extension("md5"));
            let written = std::fs::read_to_string(&artifact.digest_file).unwrap();
            assert_eq!(written, artifact.digest);
            assert_eq!(written.len(), 32);
            assert_eq!(written, file_digest(&artifact.archive).unwrap());
        }
    }

    #[test]
    fn test_release_all_empty_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        let release = temp_dir.path().join("release");

        assert!(release_all(&data, &release).unwrap().is_empty());
        assert!(release.is_dir());
    }
}
