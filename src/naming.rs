//! Centralized filename parsing for the `<synset>_<number>.JPEG` convention.
//!
//! Every image in the collection is named after the category it belongs to:
//! the synset id is the first underscore-delimited segment of the filename.
//! This module is the single place that knows the convention, so the rest of
//! the crate never needs a lookup table to answer "which category is this
//! file in?".
//!
//! ```text
//! n01440764_10026.JPEG  →  synset "n01440764", image number 10026
//! n01443537_100.JPEG    →  synset "n01443537", image number 100
//! ```
//!
//! The split is textual: everything before the first `_` is the category,
//! even when the name does not look like a synset id.

use std::collections::BTreeMap;

/// Extension of the image files served by the collection.
pub const IMAGE_EXTENSION: &str = "JPEG";

/// Result of parsing an image filename like `n01440764_10026.JPEG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    /// Everything before the first underscore (the whole name if there is none).
    pub synset: String,
    /// Numeric image id after the underscore, if it parses.
    pub number: Option<u64>,
    /// Extension without the dot, if present.
    pub extension: Option<String>,
}

/// Category id of a filename: the text before the first underscore.
///
/// - `"n01440764_10026.JPEG"` → `"n01440764"`
/// - `"n01440764"` → `"n01440764"`
/// - `"_x.JPEG"` → `""`
pub fn category_of(filename: &str) -> &str {
    filename.split('_').next().unwrap_or(filename)
}

/// Parse a filename into its synset, image number, and extension.
pub fn parse_filename(filename: &str) -> ParsedFilename {
    let synset = category_of(filename).to_string();
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext.to_string())),
        None => (filename, None),
    };
    let number = stem
        .split_once('_')
        .and_then(|(_, rest)| rest.parse::<u64>().ok());
    ParsedFilename {
        synset,
        number,
        extension,
    }
}

/// True for names carrying the collection's image extension (case-sensitive,
/// matching the `*.JPEG` files the archives contain).
pub fn is_image_filename(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext == IMAGE_EXTENSION)
}

/// Group filenames by category, preserving input order within each group.
pub fn group_by_category<I, S>(filenames: I) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in filenames {
        let name = name.as_ref();
        groups
            .entry(category_of(name).to_string())
            .or_default()
            .push(name.to_string());
    }
    groups
}

/// Sorted, de-duplicated category ids of the given filenames.
pub fn unique_categories<I, S>(filenames: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    group_by_category(filenames).into_keys().collect()
}
