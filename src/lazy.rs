//! Lazy, indexable view over processed images.
//!
//! A [`LazyImages`] is an ordered list of filenames plus a [`Loader`].
//! Nothing is computed until an element is asked for, only the requested
//! indices are evaluated, and nothing is kept between accesses: reading the
//! same index twice processes the image twice (the file itself stays in the
//! cache after the first fetch).
//!
//! ```text
//! view.get(3)          → one image, no batch axis
//! view.slice(0..10)    → batch of 10
//! view.take(&[5, 1])   → batch of 2, in the requested order
//! view.iter()          → one image at a time
//! ```

use crate::imaging::{Pixels, PreprocessSpec};
use crate::loader::{LoadError, Loader};
use std::ops::Range;
use std::sync::Arc;

/// Ordered sequence of processed images, computed on access.
#[derive(Clone)]
pub struct LazyImages {
    loader: Loader,
    filenames: Arc<[String]>,
}

impl LazyImages {
    pub fn new(loader: Loader, filenames: Vec<String>) -> Self {
        Self {
            loader,
            filenames: filenames.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn spec(&self) -> &PreprocessSpec {
        self.loader.spec()
    }

    /// Same filenames under a different spec.
    pub fn with_spec(&self, spec: PreprocessSpec) -> Result<Self, LoadError> {
        Ok(Self {
            loader: self.loader.with_spec(spec)?,
            filenames: self.filenames.clone(),
        })
    }

    /// Same filenames with every image flattened to one dimension.
    pub fn flattened(&self) -> Self {
        Self {
            loader: self.loader.flattened(),
            filenames: self.filenames.clone(),
        }
    }

    /// Process the image at `index`.
    pub fn get(&self, index: usize) -> Result<Pixels, LoadError> {
        let filename = self.filename(index)?;
        self.loader.load_one(filename)
    }

    /// Process a contiguous range as one batch.
    pub fn slice(&self, range: Range<usize>) -> Result<Pixels, LoadError> {
        if range.start > range.end || range.end > self.len() {
            return Err(LoadError::OutOfRange {
                index: range.end.max(range.start),
                len: self.len(),
            });
        }
        self.loader.load(&self.filenames[range])
    }

    /// Process arbitrary indices as one batch, in the order given.
    pub fn take(&self, indices: &[usize]) -> Result<Pixels, LoadError> {
        let names = indices
            .iter()
            .map(|&i| self.filename(i))
            .collect::<Result<Vec<_>, _>>()?;
        self.loader.load(&names)
    }

    /// Evaluate every element in order, one at a time.
    pub fn iter(&self) -> impl Iterator<Item = Result<Pixels, LoadError>> + '_ {
        self.filenames.iter().map(|f| self.loader.load_one(f))
    }

    fn filename(&self, index: usize) -> Result<&str, LoadError> {
        self.filenames
            .get(index)
            .map(String::as_str)
            .ok_or(LoadError::OutOfRange {
                index,
                len: self.len(),
            })
    }
}
