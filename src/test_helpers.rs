//! Shared test utilities for the imagenet-cache test suite.
//!
//! Provides synthetic JPEG fixtures and in-memory stand-ins for the two
//! network collaborators (`Catalog` and `FileTransfer`), so nothing in the
//! unit tests touches the network.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let transfer = CountingTransfer::new();
//! let cache = FileCache::open(tmp.path()).unwrap();
//! cache.ensure_local("n01_1.JPEG", &transfer).unwrap();
//! assert_eq!(transfer.calls(), 1);
//!
//! let catalog = MockCatalog::new()
//!     .with_synset("n01", "fish", "a fish", &["n02"])
//!     .with_archive("n01", &["n01_1.JPEG", "n01_2.JPEG"]);
//! ```

use crate::catalog::{Catalog, CatalogError};
use crate::transfer::{FileTransfer, TransferError};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

// =========================================================================
// Synthetic images
// =========================================================================

/// RGB image with a horizontal red ramp and a vertical green ramp.
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 128])
    });
    DynamicImage::ImageRgb8(img)
}

/// Encode a flat-colored image as JPEG bytes.
pub fn jpeg_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb(color));
    encode_jpeg(&DynamicImage::ImageRgb8(img))
}

fn encode_jpeg(img: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 95);
    encoder.encode_image(&img.to_rgb8()).unwrap();
    buf
}

/// Write a gradient JPEG of the given size to `path`.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, encode_jpeg(&gradient_image(width, height))).unwrap();
}

/// Deterministic flat color for a filename, so different files decode to
/// distinguishable arrays.
pub fn color_for(filename: &str) -> [u8; 3] {
    let n = crate::naming::parse_filename(filename).number.unwrap_or(0);
    [(n * 40 % 256) as u8, (n * 90 % 256) as u8, 200]
}

// =========================================================================
// Transfer stand-in
// =========================================================================

/// `FileTransfer` that synthesizes a small JPEG per request and counts calls.
pub struct CountingTransfer {
    calls: AtomicUsize,
    fail: bool,
    fetched: Mutex<Vec<String>>,
}

impl CountingTransfer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch fails with `TransferError::NoSource`.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Filenames requested so far, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl FileTransfer for CountingTransfer {
    fn fetch(&self, filename: &str, dest_dir: &Path) -> Result<PathBuf, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(filename.to_string());
        if self.fail {
            return Err(TransferError::NoSource);
        }
        // Written aside and renamed, as the real transfers do, so concurrent
        // fetches of one name never expose a half-written file.
        let dest = dest_dir.join(filename);
        let mut partial = tempfile::NamedTempFile::new_in(dest_dir)?;
        partial.write_all(&jpeg_bytes(16, 12, color_for(filename)))?;
        partial.persist(&dest).map_err(|e| e.error)?;
        Ok(dest)
    }

    fn describe(&self) -> String {
        "counting transfer".to_string()
    }
}

// =========================================================================
// Catalog stand-in
// =========================================================================

/// In-memory `Catalog` with per-endpoint call counters.
#[derive(Default)]
pub struct MockCatalog {
    synsets: Vec<String>,
    words: BTreeMap<String, String>,
    definitions: BTreeMap<String, String>,
    hyponyms: BTreeMap<String, Vec<String>>,
    archives: BTreeMap<String, Vec<(String, Vec<u8>)>>,
    calls: Mutex<BTreeMap<&'static str, usize>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category with its words, definition and direct children.
    pub fn with_synset(mut self, id: &str, words: &str, definition: &str, children: &[&str]) -> Self {
        self.synsets.push(id.to_string());
        self.words.insert(id.to_string(), words.to_string());
        self.definitions.insert(id.to_string(), definition.to_string());
        if !children.is_empty() {
            self.hyponyms.insert(
                id.to_string(),
                children.iter().map(|c| c.to_string()).collect(),
            );
        }
        self
    }

    /// Register a category that has no words or definition entry.
    pub fn with_bare_synset(mut self, id: &str) -> Self {
        self.synsets.push(id.to_string());
        self
    }

    /// Archive for `id` holding one small JPEG per filename.
    pub fn with_archive(mut self, id: &str, filenames: &[&str]) -> Self {
        let entries = filenames
            .iter()
            .map(|f| (f.to_string(), jpeg_bytes(16, 12, color_for(f))))
            .collect();
        self.archives.insert(id.to_string(), entries);
        self
    }

    /// Archive for `id` with arbitrary entries (name, bytes).
    pub fn with_raw_archive(mut self, id: &str, entries: Vec<(String, Vec<u8>)>) -> Self {
        self.archives.insert(id.to_string(), entries);
        self
    }

    /// How many times the named endpoint was called.
    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls.lock().unwrap().get(endpoint).copied().unwrap_or(0)
    }

    fn record(&self, endpoint: &'static str) {
        *self.calls.lock().unwrap().entry(endpoint).or_insert(0) += 1;
    }
}

/// Build an uncompressed tar stream from (name, bytes) entries.
pub fn tar_bytes(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

impl Catalog for MockCatalog {
    fn synset_list(&self) -> Result<Vec<String>, CatalogError> {
        self.record("synset_list");
        Ok(self.synsets.clone())
    }

    fn words(&self) -> Result<BTreeMap<String, String>, CatalogError> {
        self.record("words");
        Ok(self.words.clone())
    }

    fn definitions(&self) -> Result<BTreeMap<String, String>, CatalogError> {
        self.record("definitions");
        Ok(self.definitions.clone())
    }

    fn hyponyms(&self, synset: &str) -> Result<Vec<String>, CatalogError> {
        self.record("hyponyms");
        Ok(self.hyponyms.get(synset).cloned().unwrap_or_default())
    }

    fn open_archive(&self, synset: &str) -> Result<Box<dyn Read + Send>, CatalogError> {
        self.record("open_archive");
        let entries = self
            .archives
            .get(synset)
            .ok_or_else(|| CatalogError::Other(format!("no archive for {synset}")))?;
        Ok(Box::new(Cursor::new(tar_bytes(entries))))
    }
}
