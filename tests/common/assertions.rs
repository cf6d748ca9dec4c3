//! Assertions over written splits

use image::RgbImage;
use std::path::Path;

/// File names in `dir`, sorted
pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("cannot list {}: {}", dir.display(), e))
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Split `{id}.{label}.webp` into its numeric fields, checking the padding
pub fn parse_sample_name(name: &str, id_width: usize, label_width: usize) -> (usize, u32) {
    let fields: Vec<&str> = name.split('.').collect();
    assert_eq!(fields.len(), 3, "unexpected sample name {name}");
    assert_eq!(fields[2], "webp");
    assert_eq!(fields[0].len(), id_width, "id padding in {name}");
    assert_eq!(fields[1].len(), label_width, "label padding in {name}");
    (fields[0].parse().unwrap(), fields[1].parse().unwrap())
}

/// Check ids are `0..n` in listing order and return the labels in that order
pub fn assert_contiguous_ids(names: &[String], label_width: usize) -> Vec<u32> {
    let id_width = names.len().to_string().len();
    names
        .iter()
        .enumerate()
        .map(|(expected, name)| {
            let (id, label) = parse_sample_name(name, id_width, label_width);
            assert_eq!(id, expected, "ids must be contiguous");
            label
        })
        .collect()
}

/// Decode a written sample
pub fn decode_sample(path: &Path) -> RgbImage {
    image::open(path)
        .unwrap_or_else(|e| panic!("cannot decode {}: {}", path.display(), e))
        .into_rgb8()
}
