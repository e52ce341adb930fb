//! Cache-and-preprocess evaluator.
//!
//! Turns a list of filenames into a batch of processed arrays. Each filename
//! is handled independently: resolve it through the [`FileCache`] (fetching
//! on a miss), then run [`imaging::process`](crate::imaging::process) with the
//! loader's spec. Work is spread over the rayon pool and reassembled in input
//! order.
//!
//! The first failing element aborts the batch. Files already fetched stay in
//! the cache; nothing is rolled back.

use crate::cache::{CacheError, FileCache};
use crate::imaging::{self, ImagingError, Pixels, PreprocessSpec};
use crate::transfer::FileTransfer;
use rayon::prelude::*;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Failed to process {filename}: {source}")]
    Process {
        filename: String,
        #[source]
        source: ImagingError,
    },
    #[error("Imaging error: {0}")]
    Imaging(#[from] ImagingError),
    #[error("Index {index} out of range for {len} images")]
    OutOfRange { index: usize, len: usize },
}

/// Resolves filenames through the cache and preprocesses them.
#[derive(Clone)]
pub struct Loader {
    cache: Arc<FileCache>,
    transfer: Arc<dyn FileTransfer>,
    spec: PreprocessSpec,
}

impl Loader {
    /// Fails when `spec` is inconsistent (see [`PreprocessSpec::validate`]).
    pub fn new(
        cache: Arc<FileCache>,
        transfer: Arc<dyn FileTransfer>,
        spec: PreprocessSpec,
    ) -> Result<Self, LoadError> {
        spec.validate()?;
        Ok(Self {
            cache,
            transfer,
            spec,
        })
    }

    pub fn spec(&self) -> &PreprocessSpec {
        &self.spec
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Same cache and transfer, different spec.
    pub fn with_spec(&self, spec: PreprocessSpec) -> Result<Self, LoadError> {
        Self::new(self.cache.clone(), self.transfer.clone(), spec)
    }

    /// Flattening never invalidates a spec, so this cannot fail.
    pub(crate) fn flattened(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            transfer: self.transfer.clone(),
            spec: self.spec.clone().flattened(),
        }
    }

    /// Process a single file; no batch axis.
    pub fn load_one(&self, filename: &str) -> Result<Pixels, LoadError> {
        let path = self.cache.ensure_local(filename, self.transfer.as_ref())?;
        imaging::process(&path, &self.spec).map_err(|source| LoadError::Process {
            filename: filename.to_string(),
            source,
        })
    }

    /// Process every file and stack the results along a new leading axis.
    ///
    /// Output row `i` always corresponds to `filenames[i]`. An empty input
    /// yields an empty batch of the spec's item shape.
    pub fn load<S: AsRef<str> + Sync>(&self, filenames: &[S]) -> Result<Pixels, LoadError> {
        if filenames.is_empty() {
            return Ok(Pixels::empty_batch(self.spec.dtype, &self.spec.output_shape()));
        }
        let items = filenames
            .par_iter()
            .map(|f| self.load_one(f.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pixels::stack(&items)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{ColorMode, DType};
    use crate::test_helpers::{CountingTransfer, color_for, jpeg_bytes};
    use crate::transfer::CopyTransfer;
    use ndarray::Axis;
    use tempfile::TempDir;

    fn wide_pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap()
    }

    fn loader(tmp: &TempDir, transfer: Arc<CountingTransfer>, spec: PreprocessSpec) -> Loader {
        let cache = Arc::new(FileCache::open(tmp.path()).unwrap());
        Loader::new(cache, transfer, spec).unwrap()
    }

    fn raw_spec() -> PreprocessSpec {
        PreprocessSpec {
            dtype: DType::Uint8,
            ..PreprocessSpec::resize_only(4, 4)
        }
    }

    #[test]
    fn batch_shape_prepends_batch_axis() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp, Arc::new(CountingTransfer::new()), PreprocessSpec::resize_only(32, 32));
        let out = l.load(&["a_1.JPEG", "a_2.JPEG", "b_3.JPEG"]).unwrap();
        assert_eq!(out.shape(), &[3, 32, 32, 3]);
        assert_eq!(out.dtype(), DType::Float32);
    }

    #[test]
    fn output_order_matches_input_order() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp, Arc::new(CountingTransfer::new()), raw_spec());
        let names: Vec<String> = (1..=6).map(|n| format!("n01_{n}.JPEG")).collect();
        let out = l.load(&names).unwrap();
        let a = out.as_u8().unwrap();

        for (i, name) in names.iter().enumerate() {
            let [r, g, _] = color_for(name);
            // JPEG is lossy; flat colors survive within a small tolerance.
            assert!((a[[i, 1, 1, 0]] as i32 - r as i32).abs() <= 6, "row {i} red");
            assert!((a[[i, 1, 1, 1]] as i32 - g as i32).abs() <= 6, "row {i} green");
        }
    }

    #[test]
    fn second_load_is_served_from_cache() {
        let tmp = TempDir::new().unwrap();
        let transfer = Arc::new(CountingTransfer::new());
        let l = loader(&tmp, transfer.clone(), raw_spec());
        let first = l.load(&["a_1.JPEG", "a_2.JPEG"]).unwrap();
        let second = l.load(&["a_1.JPEG", "a_2.JPEG"]).unwrap();
        assert_eq!(first, second);
        assert_eq!(transfer.calls(), 2);
        assert!(l.cache().contains("a_1.JPEG"));
    }

    #[test]
    fn output_order_holds_on_a_wide_pool() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp, Arc::new(CountingTransfer::new()), raw_spec());
        let names: Vec<String> = (1..=24).map(|n| format!("n01_{n}.JPEG")).collect();
        let out = wide_pool().install(|| l.load(&names)).unwrap();
        let a = out.as_u8().unwrap();

        for (i, name) in names.iter().enumerate() {
            let [r, g, _] = color_for(name);
            assert!((a[[i, 1, 1, 0]] as i32 - r as i32).abs() <= 6, "row {i} red");
            assert!((a[[i, 1, 1, 1]] as i32 - g as i32).abs() <= 6, "row {i} green");
        }
    }

    #[test]
    fn repeated_uncached_name_on_a_wide_pool() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(
            remote.path().join("a_1.JPEG"),
            jpeg_bytes(800, 600, [40, 90, 200]),
        )
        .unwrap();
        let cache = Arc::new(FileCache::open(local.path()).unwrap());
        let l = Loader::new(cache, Arc::new(CopyTransfer::new(remote.path())), raw_spec()).unwrap();

        let out = wide_pool().install(|| l.load(&["a_1.JPEG"; 8])).unwrap();
        assert_eq!(out.shape(), &[8, 4, 4, 3]);
        let a = out.as_u8().unwrap();
        let first = a.index_axis(Axis(0), 0);
        for i in 1..8 {
            assert_eq!(a.index_axis(Axis(0), i), first, "row {i}");
        }
        assert_eq!(l.cache().files().into_iter().collect::<Vec<_>>(), vec!["a_1.JPEG"]);

        let mut on_disk: Vec<_> = std::fs::read_dir(local.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        on_disk.sort();
        assert_eq!(on_disk, vec!["a_1.JPEG", "cached_set.json"]);
    }

    #[test]
    fn empty_batch_has_item_shape() {
        let tmp = TempDir::new().unwrap();
        let spec = PreprocessSpec {
            mode: ColorMode::L,
            ..raw_spec()
        };
        let l = loader(&tmp, Arc::new(CountingTransfer::new()), spec);
        let out = l.load::<&str>(&[]).unwrap();
        assert_eq!(out.shape(), &[0, 4, 4]);
        assert!(out.is_empty());
    }

    #[test]
    fn load_one_has_no_batch_axis() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp, Arc::new(CountingTransfer::new()), raw_spec().flattened());
        assert_eq!(l.load_one("a_1.JPEG").unwrap().shape(), &[4 * 4 * 3]);
    }

    #[test]
    fn transfer_failure_aborts_batch() {
        let tmp = TempDir::new().unwrap();
        let l = loader(&tmp, Arc::new(CountingTransfer::failing()), raw_spec());
        assert!(matches!(
            l.load(&["a_1.JPEG", "a_2.JPEG"]),
            Err(LoadError::Cache(CacheError::Transfer { .. }))
        ));
    }

    #[test]
    fn corrupt_cached_file_is_process_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad_1.JPEG"), b"garbage").unwrap();
        let l = loader(&tmp, Arc::new(CountingTransfer::new()), raw_spec());
        match l.load(&["bad_1.JPEG"]) {
            Err(LoadError::Process { filename, .. }) => assert_eq!(filename, "bad_1.JPEG"),
            other => panic!("expected process error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_spec_is_rejected_up_front() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(FileCache::open(tmp.path()).unwrap());
        let spec = PreprocessSpec {
            dtype: DType::Uint8,
            normalize: true,
            ..Default::default()
        };
        assert!(matches!(
            Loader::new(cache, Arc::new(CountingTransfer::new()), spec),
            Err(LoadError::Imaging(ImagingError::InvalidSpec(_)))
        ));
    }
}
