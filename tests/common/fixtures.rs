//! Synthetic dataset archives

use flate2::Compression;
use flate2::write::GzEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::{Cursor, Write};

/// Bytes per CIFAR sample (3 × 32 × 32, channel-first)
pub const CIFAR_ROW: usize = 3 * 32 * 32;

/// A Python 2 style CIFAR batch pickle: `{"data": uint8[rows, 3072], <label_key>: [..]}`
pub fn cifar_batch(pixels: &[u8], label_key: &str, labels: &[u8]) -> Vec<u8> {
    assert_eq!(pixels.len(), labels.len() * CIFAR_ROW);
    let rows = labels.len() as i32;

    let mut b = Vec::new();
    b.extend_from_slice(b"\x80\x02}q\x01(U\x04dataq\x02");
    b.extend_from_slice(b"cnumpy.core.multiarray\n_reconstruct\nq\x03");
    b.extend_from_slice(b"cnumpy\nndarray\nq\x04K\x00\x85U\x01b\x87Rq\x05");
    b.extend_from_slice(b"(K\x01J");
    b.extend_from_slice(&rows.to_le_bytes());
    b.extend_from_slice(b"M\x00\x0c\x86");
    b.extend_from_slice(b"cnumpy\ndtype\nq\x06U\x02u1K\x00K\x01\x87Rq\x07");
    b.extend_from_slice(b"(K\x03U\x01|NNNJ\xff\xff\xff\xffJ\xff\xff\xff\xffK\x00tb");
    b.push(0x89);
    b.push(b'T');
    b.extend_from_slice(&(pixels.len() as i32).to_le_bytes());
    b.extend_from_slice(pixels);
    b.extend_from_slice(b"tbU");
    b.push(label_key.len() as u8);
    b.extend_from_slice(label_key.as_bytes());
    b.extend_from_slice(b"]q\x08(");
    for &l in labels {
        b.push(b'K');
        b.push(l);
    }
    b.extend_from_slice(b"eu.");
    b
}

/// Channel-first pixels where sample `i` of the batch has red `seed + i`,
/// green `x` and blue `y` at every pixel
pub fn cifar_pixels(rows: usize, seed: u8) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(rows * CIFAR_ROW);
    for i in 0..rows {
        pixels.extend(std::iter::repeat_n(seed.wrapping_add(i as u8), 32 * 32));
        pixels.extend((0..32 * 32).map(|p| (p % 32) as u8));
        pixels.extend((0..32 * 32).map(|p| (p / 32) as u8));
    }
    pixels
}

/// Gzipped tarball holding `files` (path, contents)
pub fn tar_gz(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Zip archive holding `files` (path, contents), stored uncompressed
pub fn zip_archive(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (path, data) in files {
        writer.start_file(path.as_str(), options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A 64 × 64 RGB image encoded losslessly, whatever extension it is stored under
pub fn tiny_image(seed: u8) -> (RgbImage, Vec<u8>) {
    let img = RgbImage::from_fn(64, 64, |x, y| Rgb([seed, x as u8 * 3, y as u8 * 2]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    (img, bytes)
}

/// A 64 × 64 greyscale image, PNG-encoded
pub fn tiny_grey_image(value: u8) -> Vec<u8> {
    let img = image::GrayImage::from_pixel(64, 64, image::Luma([value]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}
