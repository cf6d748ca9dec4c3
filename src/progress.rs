//! Terminal progress bars for the long-running loops

use indicatif::{ProgressBar, ProgressStyle};

const BYTES_TEMPLATE: &str =
    "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})";
const SPINNER_TEMPLATE: &str = "{spinner} {msg} [{elapsed_precise}] {bytes} ({bytes_per_sec})";
const ITEMS_TEMPLATE: &str = "{msg} [{elapsed_precise}] [{bar:40}] {pos}/{len} {per_sec}";

fn style(template: &str, fallback: fn() -> ProgressStyle) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| fallback())
}

/// Byte-count bar for a download; a spinner when the length is unknown
pub fn bytes_bar(total: Option<u64>, message: &str) -> ProgressBar {
    let bar = match total {
        Some(len) => ProgressBar::new(len).with_style(
            style(BYTES_TEMPLATE, ProgressStyle::default_bar).progress_chars("#>-"),
        ),
        None => ProgressBar::new_spinner()
            .with_style(style(SPINNER_TEMPLATE, ProgressStyle::default_spinner)),
    };
    bar.with_message(message.to_string())
}

/// Item-count bar (images written, files zipped)
pub fn items_bar(total: usize, message: &str) -> ProgressBar {
    ProgressBar::new(total as u64)
        .with_style(style(ITEMS_TEMPLATE, ProgressStyle::default_bar).progress_chars("#>-"))
        .with_message(message.to_string())
}
