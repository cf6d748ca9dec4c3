//! Configuration types for dataset-release
//!
//! The pipelines work from three fixed directories relative to the current
//! working directory and a handful of fixed download URLs. The binaries always
//! use [`Config::default`]; the struct exists so tests can redirect output.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Local filesystem layout shared by all pipelines
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Raw and extracted archives (default: "./download")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Encoded samples, laid out as `<dataset>/<split>/` (default: "./data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Release bundles and digest files (default: "./release")
    #[serde(default = "default_release_dir")]
    pub release_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            data_dir: default_data_dir(),
            release_dir: default_release_dir(),
        }
    }
}

impl Config {
    /// Config rooted at `root` instead of the current directory
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            download_dir: root.join("download"),
            data_dir: root.join("data"),
            release_dir: root.join("release"),
        }
    }

    /// Output directory for one split of one dataset
    pub fn split_dir(&self, dataset: &str, split: crate::types::Split) -> PathBuf {
        self.data_dir.join(dataset).join(split.dir_name())
    }
}

/// A remote archive: where to fetch it and what to call it locally
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSource {
    /// Full download URL
    pub url: String,
    /// File name of the archive inside the download directory
    pub file_name: String,
}

impl DatasetSource {
    /// Source whose URL ends with `file_name`
    pub fn new(base_url: &str, file_name: &str) -> Self {
        Self {
            url: format!("{}/{}", base_url.trim_end_matches('/'), file_name),
            file_name: file_name.to_string(),
        }
    }

    /// CIFAR-10, Python pickle version
    pub fn cifar10() -> Self {
        Self::new(CIFAR_BASE_URL, "cifar-10-python.tar.gz")
    }

    /// CIFAR-100, Python pickle version
    pub fn cifar100() -> Self {
        Self::new(CIFAR_BASE_URL, "cifar-100-python.tar.gz")
    }

    /// Tiny-ImageNet-200
    pub fn tiny_imagenet() -> Self {
        Self::new(TINY_IMAGENET_BASE_URL, "tiny-imagenet-200.zip")
    }
}

const CIFAR_BASE_URL: &str = "https://www.cs.toronto.edu/~kriz";
const TINY_IMAGENET_BASE_URL: &str = "https://cs231n.stanford.edu";

fn default_download_dir() -> PathBuf {
    PathBuf::from("download")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_release_dir() -> PathBuf {
    PathBuf::from("release")
}
