//! Zip every converted split and write its MD5 digest

use dataset_release::{Config, Result, init_tracing, release};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();

    let config = Config::default();
    for artifact in release::release_all(&config.data_dir, &config.release_dir)? {
        info!(
            archive = %artifact.archive.display(),
            entries = artifact.entries,
            digest = %artifact.digest,
            "released"
        );
    }
    Ok(())
}
