//! # imagenet-cache
//!
//! Local access to a large image collection whose images are organized into
//! *synsets*: categories of a WordNet-style hierarchy, identified by ids like
//! `n01440764`. Every image is named `<synset>_<number>.JPEG`, so its category
//! can always be read off its filename.
//!
//! The collection is far too large to mirror. This crate fetches what is
//! asked for, remembers what it already has, and turns files into numeric
//! arrays only when an element is actually read.
//!
//! # Architecture
//!
//! ```text
//!             catalog (HTTP)                    transfer (rsync/http/copy)
//!                  │                                      │
//!   metadata ◄─────┤                                      ▼
//!   (tree, index,  │                           cache: dir + presence set
//!    synset meta,  │                                      │
//!    image table)  │                                      ▼
//!                  │                        loader: ensure_local → preprocess
//!   download ◄─────┘                                      │
//!   (tar archives)                                        ▼
//!                                           lazy: index / slice / take
//! ```
//!
//! [`dataset::Dataset`] ties the pieces together for one scope of the
//! collection and memoizes every metadata value it computes.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`naming`] | `<synset>_<number>.JPEG` convention: category derivation and grouping |
//! | [`catalog`] | Remote catalog endpoints: category list, words, definitions, hyponyms, archives |
//! | [`transfer`] | Single-file fetchers behind the [`transfer::FileTransfer`] trait |
//! | [`cache`] | Image directory plus persisted presence set, download on miss |
//! | [`imaging`] | Preprocessing: decode, resize, crop, mask, mode, dtype, normalize, flatten |
//! | [`loader`] | Cache-and-preprocess evaluator over the rayon pool |
//! | [`lazy`] | Indexable view that evaluates only what is read |
//! | [`metadata`] | Hierarchy, filename index, synset records, image table: load or build |
//! | [`download`] | Bulk archive download with optional seeded sampling |
//! | [`dataset`] | Facade over one scope of the collection |
//! | [`config`] | `config.toml` loading, stock defaults, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## JSON For Everything Persisted
//!
//! The hierarchy, filename index, synset records, image table and cache
//! presence set are all plain JSON written with `serde_json`. Each file is
//! written to a temporary name and renamed into place, so a crash leaves
//! either the old file or the new one. A file that fails to parse is treated
//! as missing and rebuilt.
//!
//! ## No Eviction
//!
//! The cache only grows. A file, once fetched, is assumed to stay valid for
//! the life of the collection.
//!
//! ## Laziness Without Memoization
//!
//! [`lazy::LazyImages`] keeps no processed arrays. Reading the same index twice
//! processes the image twice; only the file fetch is cached. Processed arrays
//! for the full collection would not fit in memory, and a caller that wants
//! reuse can hold on to what it read.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod download;
pub mod imaging;
pub mod lazy;
pub mod loader;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_helpers;
