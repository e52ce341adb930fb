//! Local image cache with download-on-miss.
//!
//! The collection is far too large to mirror, so images are pulled one at a
//! time the first time something asks for them. The cache is a directory plus
//! a **presence set**: the names of the files known to be materialized there.
//!
//! # Design
//!
//! - A lookup for a name in the presence set returns its path with no I/O.
//! - A miss calls the [`FileTransfer`] collaborator, records the name, and
//!   persists the whole set before returning.
//! - Nothing is ever evicted. The set only grows for the life of the process.
//!
//! A crash between the transfer and the save leaves a file on disk that the
//! set does not know about. The next access downloads it again, which is
//! wasteful but not incorrect: transfers are idempotent per filename.
//!
//! ## Concurrency
//!
//! [`FileCache::ensure_local`] takes `&self` so one cache can be shared by
//! every rayon worker of a batch. The set sits behind a `Mutex` that is held
//! for the membership check and for the record-and-save step, never across a
//! transfer. Two workers missing on the same name at once will both transfer
//! and both record it; the persisted set ends up the same either way.
//!
//! ## Storage
//!
//! The presence set is a JSON file at `<cache_dir>/cached_set.json`. When it
//! is missing or unreadable the set is rebuilt from the `*.JPEG` files
//! already in the directory.

use crate::naming::is_image_filename;
use crate::transfer::{FileTransfer, TransferError};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the presence-set file within the cache directory.
const CACHE_SET_FILENAME: &str = "cached_set.json";

/// Version of the presence-set format. Bump to force a rescan of every cache.
const CACHE_SET_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Transfer of {filename} failed: {source}")]
    Transfer {
        filename: String,
        #[source]
        source: TransferError,
    },
}

/// On-disk form of the presence set.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CacheSetFile {
    version: u32,
    files: BTreeSet<String>,
}

/// A directory of images plus the set of names known to be in it.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    present: Mutex<BTreeSet<String>>,
    hits: AtomicU32,
    downloads: AtomicU32,
}

impl FileCache {
    /// Open (creating if needed) the cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let present = match load_set(&dir) {
            Some(set) => set,
            None => {
                let set = scan_dir(&dir)?;
                debug!(count = set.len(), dir = %dir.display(), "seeded cache set from directory");
                set
            }
        };
        Ok(Self::with_set(dir, present))
    }

    /// Build a cache around an explicit presence set (nothing is read from disk).
    pub fn with_set(dir: impl Into<PathBuf>, present: BTreeSet<String>) -> Self {
        Self {
            dir: dir.into(),
            present: Mutex::new(present),
            hits: AtomicU32::new(0),
            downloads: AtomicU32::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `filename` lives (or will live) in the cache.
    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.lock().contains(filename)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the presence set.
    pub fn files(&self) -> BTreeSet<String> {
        self.lock().clone()
    }

    /// Return the local path of `filename`, transferring it first on a miss.
    pub fn ensure_local(
        &self,
        filename: &str,
        transfer: &dyn FileTransfer,
    ) -> Result<PathBuf, CacheError> {
        let path = self.path_for(filename);
        if self.contains(filename) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(filename, "cache hit");
            return Ok(path);
        }

        info!(filename, via = %transfer.describe(), "downloading file");
        transfer
            .fetch(filename, &self.dir)
            .map_err(|source| CacheError::Transfer {
                filename: filename.to_string(),
                source,
            })?;

        let mut set = self.lock();
        set.insert(filename.to_string());
        self.persist(&set)?;
        drop(set);

        self.downloads.fetch_add(1, Ordering::Relaxed);
        Ok(path)
    }

    /// Add names of files placed in the directory by something other than
    /// [`Self::ensure_local`] (a bulk archive download) and persist the set.
    pub fn record<I, S>(&self, filenames: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = self.lock();
        set.extend(filenames.into_iter().map(Into::into));
        self.persist(&set)
    }

    /// Write the presence set to `<dir>/cached_set.json`.
    pub fn save(&self) -> Result<(), CacheError> {
        let set = self.lock();
        self.persist(&set)
    }

    /// Hits and downloads served since the cache was opened.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
        }
    }

    fn persist(&self, set: &BTreeSet<String>) -> Result<(), CacheError> {
        let file = CacheSetFile {
            version: CACHE_SET_VERSION,
            files: set.clone(),
        };
        let json = serde_json::to_string(&file)?;
        let tmp = self.dir.join(format!("{CACHE_SET_FILENAME}.tmp"));
        std::fs::write(&tmp, json)?;
        std::fs::rename(tmp, set_path(&self.dir))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        // A panic in another worker cannot leave the set half-updated: every
        // mutation is a single insert.
        self.present.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve the presence-set path for a cache directory.
pub fn set_path(dir: &Path) -> PathBuf {
    dir.join(CACHE_SET_FILENAME)
}

/// Load the persisted set; `None` if absent, unparseable, or from another version.
fn load_set(dir: &Path) -> Option<BTreeSet<String>> {
    let content = std::fs::read_to_string(set_path(dir)).ok()?;
    match serde_json::from_str::<CacheSetFile>(&content) {
        Ok(file) if file.version == CACHE_SET_VERSION => Some(file.files),
        Ok(file) => {
            warn!(version = file.version, "ignoring cache set with unknown version");
            None
        }
        Err(e) => {
            warn!(error = %e, "ignoring unreadable cache set");
            None
        }
    }
}

/// Names of the image files directly inside `dir`.
fn scan_dir(dir: &Path) -> Result<BTreeSet<String>, CacheError> {
    let mut set = BTreeSet::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && is_image_filename(name)
        {
            set.insert(name.to_string());
        }
    }
    Ok(set)
}

/// Summary of cache behavior for a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub downloads: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.downloads
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} downloaded ({} total)",
                self.hits,
                self.downloads,
                self.total()
            )
        } else {
            write!(f, "{} downloaded", self.downloads)
        }
    }
}
