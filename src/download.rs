//! Bulk download of whole categories from the catalog's archive endpoint.
//!
//! The catalog serves each category as one tar stream, so sampling a few
//! images still means reading the whole archive. For every requested
//! category:
//!
//! 1. stream the archive and extract each entry into `dest`;
//! 2. keep every name ([`Count::All`]) or a random sample of `n`
//!    ([`Count::Exactly`]), deleting the files that were not kept.
//!
//! With `first_only` and a fixed count, reading stops after the first `n`
//! entries and nothing is deleted. Sampling uses one RNG for the whole call,
//! seeded from `seed` when given, so a seeded download is reproducible.

use crate::catalog::{Catalog, CatalogError};
use crate::metadata::{ImageRow, ImageTable};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, info};

/// Categories the archive endpoint is known not to serve.
pub const NOT_DOWNLOADABLE: &[&str] = &["n04399382"];

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Requested {requested} images of {synset} but its archive holds {available}")]
    SampleTooLarge {
        synset: String,
        requested: usize,
        available: usize,
    },
}

/// How many images to keep per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Count {
    #[default]
    All,
    Exactly(usize),
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub count: Count,
    /// RNG seed for sampling; entropy when absent.
    pub seed: Option<u64>,
    /// Stop reading each archive after `count` entries instead of sampling.
    pub first_only: bool,
}

/// Progress of a bulk download.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    SynsetStarted {
        index: usize,
        total: usize,
        synset: String,
    },
    SynsetFinished {
        synset: String,
        extracted: usize,
        kept: usize,
    },
}

/// Download every category in `synsets` into `dest`.
///
/// Returns one row per kept file, grouped by category in request order.
pub fn download_synsets<S: AsRef<str>>(
    catalog: &dyn Catalog,
    synsets: &[S],
    options: &DownloadOptions,
    dest: &Path,
    events: Option<&Sender<DownloadEvent>>,
) -> Result<ImageTable, DownloadError> {
    std::fs::create_dir_all(dest)?;
    let mut rng = options
        .seed
        .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    let emit = |event| {
        if let Some(tx) = events {
            tx.send(event).ok();
        }
    };

    let total = synsets.len();
    let mut table = ImageTable::default();
    for (index, synset) in synsets.iter().enumerate() {
        let synset = synset.as_ref();
        info!(synset, index, total, "downloading archive");
        emit(DownloadEvent::SynsetStarted {
            index,
            total,
            synset: synset.to_string(),
        });

        let limit = match (options.first_only, options.count) {
            (true, Count::Exactly(n)) => Some(n),
            _ => None,
        };
        let names = extract_archive(catalog.open_archive(synset)?, dest, limit)?;
        let kept = select_kept(synset, &names, options, &mut rng)?;

        if limit.is_none() {
            let keep: BTreeSet<&str> = kept.iter().map(String::as_str).collect();
            for name in names.iter().filter(|n| !keep.contains(n.as_str())) {
                std::fs::remove_file(dest.join(name))?;
            }
        }

        emit(DownloadEvent::SynsetFinished {
            synset: synset.to_string(),
            extracted: names.len(),
            kept: kept.len(),
        });
        table.extend(ImageTable::new(
            kept.into_iter()
                .map(|filename| ImageRow {
                    filename,
                    synset: synset.to_string(),
                })
                .collect(),
        ));
    }
    Ok(table)
}

/// Download the yearly challenge categories, minus [`NOT_DOWNLOADABLE`].
///
/// Duplicates are removed and the remaining ids are processed in sorted
/// order.
pub fn download_challenge_synsets<S: AsRef<str>>(
    catalog: &dyn Catalog,
    synsets: &[S],
    options: &DownloadOptions,
    dest: &Path,
    events: Option<&Sender<DownloadEvent>>,
) -> Result<ImageTable, DownloadError> {
    let ids = challenge_synsets(synsets);
    download_synsets(catalog, &ids, options, dest, events)
}

/// Sorted, de-duplicated ids with the deny list removed.
pub fn challenge_synsets<S: AsRef<str>>(synsets: &[S]) -> Vec<String> {
    synsets
        .iter()
        .map(AsRef::as_ref)
        .filter(|id| !NOT_DOWNLOADABLE.contains(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Unpack regular-file entries into `dest`, returning their names in
/// archive order. Stops after `limit` files when given.
fn extract_archive(
    reader: impl std::io::Read,
    dest: &Path,
    limit: Option<usize>,
) -> Result<Vec<String>, DownloadError> {
    let mut archive = tar::Archive::new(reader);
    let mut names = Vec::new();
    for entry in archive.entries()? {
        if limit.is_some_and(|n| names.len() >= n) {
            break;
        }
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        // unpack_in refuses names that would escape `dest`.
        if entry.unpack_in(dest)? {
            names.push(name);
        } else {
            debug!(name = %name, "skipped archive entry outside destination");
        }
    }
    Ok(names)
}

fn select_kept(
    synset: &str,
    names: &[String],
    options: &DownloadOptions,
    rng: &mut StdRng,
) -> Result<Vec<String>, DownloadError> {
    match options.count {
        Count::All => Ok(names.to_vec()),
        Count::Exactly(n) if options.first_only => Ok(names.iter().take(n).cloned().collect()),
        Count::Exactly(n) => {
            if n > names.len() {
                return Err(DownloadError::SampleTooLarge {
                    synset: synset.to_string(),
                    requested: n,
                    available: names.len(),
                });
            }
            Ok(rand::seq::index::sample(rng, names.len(), n)
                .into_iter()
                .map(|i| names[i].clone())
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockCatalog;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{prefix}_{i}.JPEG")).collect()
    }

    fn catalog() -> MockCatalog {
        let a = names("n01", 6);
        let b = names("n02", 3);
        MockCatalog::new()
            .with_archive("n01", &a.iter().map(String::as_str).collect::<Vec<_>>())
            .with_archive("n02", &b.iter().map(String::as_str).collect::<Vec<_>>())
    }

    fn files_in(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn all_keeps_every_file() {
        let tmp = TempDir::new().unwrap();
        let table =
            download_synsets(&catalog(), &["n01", "n02"], &DownloadOptions::default(), tmp.path(), None)
                .unwrap();
        assert_eq!(table.len(), 9);
        assert_eq!(table.rows()[0].synset, "n01");
        assert_eq!(table.rows()[8].synset, "n02");
        assert_eq!(files_in(tmp.path()).len(), 9);
    }

    #[test]
    fn sample_keeps_n_and_deletes_the_rest() {
        let tmp = TempDir::new().unwrap();
        let options = DownloadOptions {
            count: Count::Exactly(2),
            seed: Some(7),
            first_only: false,
        };
        let table = download_synsets(&catalog(), &["n01"], &options, tmp.path(), None).unwrap();
        assert_eq!(table.len(), 2);
        let on_disk = files_in(tmp.path());
        assert_eq!(on_disk.len(), 2);
        for f in table.filenames() {
            assert!(on_disk.contains(&f));
        }
    }

    #[test]
    fn seeded_sample_is_reproducible() {
        let options = DownloadOptions {
            count: Count::Exactly(3),
            seed: Some(42),
            first_only: false,
        };
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let first = download_synsets(&catalog(), &["n01", "n02"], &options, a.path(), None).unwrap();
        let second = download_synsets(&catalog(), &["n01", "n02"], &options, b.path(), None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn first_only_stops_early_and_deletes_nothing() {
        let tmp = TempDir::new().unwrap();
        let options = DownloadOptions {
            count: Count::Exactly(2),
            seed: None,
            first_only: true,
        };
        let table = download_synsets(&catalog(), &["n01"], &options, tmp.path(), None).unwrap();
        assert_eq!(table.filenames(), vec!["n01_1.JPEG", "n01_2.JPEG"]);
        assert_eq!(files_in(tmp.path()).len(), 2);
    }

    #[test]
    fn oversized_sample_is_error() {
        let tmp = TempDir::new().unwrap();
        let options = DownloadOptions {
            count: Count::Exactly(10),
            ..Default::default()
        };
        let result = download_synsets(&catalog(), &["n02"], &options, tmp.path(), None);
        assert!(matches!(
            result,
            Err(DownloadError::SampleTooLarge {
                requested: 10,
                available: 3,
                ..
            })
        ));
    }

    #[test]
    fn missing_archive_surfaces_catalog_error() {
        let tmp = TempDir::new().unwrap();
        let result =
            download_synsets(&catalog(), &["n99"], &DownloadOptions::default(), tmp.path(), None);
        assert!(matches!(result, Err(DownloadError::Catalog(_))));
    }

    #[test]
    fn progress_events_per_synset() {
        let tmp = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel();
        download_synsets(&catalog(), &["n02"], &DownloadOptions::default(), tmp.path(), Some(&tx))
            .unwrap();
        drop(tx);
        let events: Vec<_> = rx.into_iter().collect();
        assert_eq!(
            events,
            vec![
                DownloadEvent::SynsetStarted {
                    index: 0,
                    total: 1,
                    synset: "n02".into()
                },
                DownloadEvent::SynsetFinished {
                    synset: "n02".into(),
                    extracted: 3,
                    kept: 3
                },
            ]
        );
    }

    #[test]
    fn challenge_list_drops_deny_list_and_duplicates() {
        let ids = challenge_synsets(&["n02", "n04399382", "n01", "n02"]);
        assert_eq!(ids, vec!["n01", "n02"]);
    }

    #[test]
    fn challenge_download_skips_denied_ids() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog();
        let table = download_challenge_synsets(
            &catalog,
            &["n04399382", "n02"],
            &DownloadOptions::default(),
            tmp.path(),
            None,
        )
        .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(catalog.calls("open_archive"), 1);
    }
}
