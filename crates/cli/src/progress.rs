//! User-facing progress lines on stdout.
//!
//! These are part of the tool's output contract; everything else goes
//! through tracing on stderr.

#![allow(clippy::print_stdout)]

/// Printed once the target manifest is in hand.
pub const MANIFEST_FETCHED: &str = "Manifest fetched successfully.";

/// Printed after the last layer has been processed.
pub const EXTRACTION_COMPLETE: &str = "Extraction complete.";

/// Archive name used for layer `ordinal`.
#[must_use]
pub fn layer_file_name(ordinal: usize) -> String {
    format!("layer-{ordinal}.tar.gz")
}

pub(crate) fn manifest_fetched() {
    println!("{MANIFEST_FETCHED}");
}

pub(crate) fn extracting(ordinal: usize) {
    println!("Extracting {}...", layer_file_name(ordinal));
}

pub(crate) fn complete() {
    println!("{EXTRACTION_COMPLETE}");
}
