//! Derived dataset metadata: hierarchy, filename index, per-synset records,
//! and the flat image table.
//!
//! Every artifact follows the same **load-or-build** policy: read the JSON
//! file if it exists and parses, otherwise reconstruct it from the
//! [`Catalog`] (and the transfer collaborator for the filename index) and
//! persist the result. An unparseable file is treated as missing.
//!
//! ## Persisted layout
//!
//! ```text
//! <root>/synset_list.json           category list  [id]
//! <root>/words.json                 words          id → words
//! <root>/definitions.json           definitions    id → definition
//! <root>/full_tree_structure.json   Hierarchy      id → {parents, children}
//! <root>/filenames_dict.json        FilenameIndex  id → [filename]
//! <meta_dir>/synset_meta.json       SynsetMeta     id → SynsetRecord
//! <meta_dir>/meta.json              ImageTable     [{filename, synset}]
//! ```
//!
//! Building the hierarchy costs one hyponym query per category, so for the
//! full catalog it is a long operation; progress is reported through an
//! optional [`MetadataEvent`] channel.

use crate::catalog::{Catalog, CatalogError};
use crate::naming::{category_of, group_by_category, is_image_filename};
use crate::transfer::{FileTransfer, TransferError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{info, warn};

pub const SYNSET_LIST_FILENAME: &str = "synset_list.json";
pub const WORDS_FILENAME: &str = "words.json";
pub const DEFINITIONS_FILENAME: &str = "definitions.json";
pub const TREE_FILENAME: &str = "full_tree_structure.json";
pub const FILENAME_INDEX_FILENAME: &str = "filenames_dict.json";
pub const SYNSET_META_FILENAME: &str = "synset_meta.json";
pub const IMAGE_TABLE_FILENAME: &str = "meta.json";

/// Hierarchy progress is reported once per this many categories.
const PROGRESS_INTERVAL: usize = 100;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("{path} could not be parsed after download")]
    Unreadable { path: PathBuf },
}

/// Which persisted artifact an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    SynsetList,
    Words,
    Definitions,
    Hierarchy,
    FilenameIndex,
    SynsetMeta,
    ImageTable,
}

impl Artifact {
    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::SynsetList => SYNSET_LIST_FILENAME,
            Artifact::Words => WORDS_FILENAME,
            Artifact::Definitions => DEFINITIONS_FILENAME,
            Artifact::Hierarchy => TREE_FILENAME,
            Artifact::FilenameIndex => FILENAME_INDEX_FILENAME,
            Artifact::SynsetMeta => SYNSET_META_FILENAME,
            Artifact::ImageTable => IMAGE_TABLE_FILENAME,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::SynsetList => "synset list",
            Artifact::Words => "words",
            Artifact::Definitions => "definitions",
            Artifact::Hierarchy => "hierarchy",
            Artifact::FilenameIndex => "filename index",
            Artifact::SynsetMeta => "synset metadata",
            Artifact::ImageTable => "image table",
        };
        f.write_str(name)
    }
}

/// Progress of a metadata rebuild.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEvent {
    /// The persisted file was missing or unreadable; reconstruction started.
    Building { artifact: Artifact },
    /// Hyponym queries completed so far.
    HierarchyProgress { done: usize, total: usize },
    /// The rebuilt artifact was written.
    Saved { artifact: Artifact, path: PathBuf },
}

fn emit(events: Option<&Sender<MetadataEvent>>, event: MetadataEvent) {
    if let Some(tx) = events {
        // A dropped receiver only means nobody is listening.
        tx.send(event).ok();
    }
}

// ============================================================================
// JSON persistence
// ============================================================================

/// Read a persisted artifact. `None` when absent or unparseable.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable metadata file");
            None
        }
    }
}

/// Write an artifact atomically (temp file + rename), creating the parent
/// directory.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MetadataError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn persist<T: Serialize>(
    path: &Path,
    value: &T,
    artifact: Artifact,
    events: Option<&Sender<MetadataEvent>>,
) -> Result<(), MetadataError> {
    save_json(path, value)?;
    info!(%artifact, path = %path.display(), "saved");
    emit(
        events,
        MetadataEvent::Saved {
            artifact,
            path: path.to_path_buf(),
        },
    );
    Ok(())
}

// ============================================================================
// Catalog tables
// ============================================================================

/// Read a catalog table from `path`, or fetch it and persist it there.
fn load_or_fetch<T, F>(
    path: &Path,
    artifact: Artifact,
    fetch: F,
    events: Option<&Sender<MetadataEvent>>,
) -> Result<T, MetadataError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T, CatalogError>,
{
    if let Some(value) = load_json(path) {
        return Ok(value);
    }
    info!(%artifact, "could not load from file, fetching from the catalog");
    emit(events, MetadataEvent::Building { artifact });
    let value = fetch()?;
    persist(path, &value, artifact, events)?;
    Ok(value)
}

/// Every category id in the catalog, cached at `<root>/synset_list.json`.
pub fn load_or_fetch_synset_list(
    root: &Path,
    catalog: &dyn Catalog,
    events: Option<&Sender<MetadataEvent>>,
) -> Result<Vec<String>, MetadataError> {
    load_or_fetch(
        &root.join(SYNSET_LIST_FILENAME),
        Artifact::SynsetList,
        || catalog.synset_list(),
        events,
    )
}

/// Category id → words, cached at `<root>/words.json`.
pub fn load_or_fetch_words(
    root: &Path,
    catalog: &dyn Catalog,
    events: Option<&Sender<MetadataEvent>>,
) -> Result<BTreeMap<String, String>, MetadataError> {
    load_or_fetch(
        &root.join(WORDS_FILENAME),
        Artifact::Words,
        || catalog.words(),
        events,
    )
}

/// Category id → definition, cached at `<root>/definitions.json`.
pub fn load_or_fetch_definitions(
    root: &Path,
    catalog: &dyn Catalog,
    events: Option<&Sender<MetadataEvent>>,
) -> Result<BTreeMap<String, String>, MetadataError> {
    load_or_fetch(
        &root.join(DEFINITIONS_FILENAME),
        Artifact::Definitions,
        || catalog.definitions(),
        events,
    )
}

// ============================================================================
// Hierarchy
// ============================================================================

/// Parent and child links of one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relations {
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Category hierarchy: id → direct parents and children.
///
/// An id with no entry is a root and a leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hierarchy {
    nodes: BTreeMap<String, Relations>,
}

impl Hierarchy {
    /// Build from child lists, deriving the mirrored parent lists.
    ///
    /// Children keep the order the catalog returned them in; parents are
    /// appended in the iteration order of `children`.
    pub fn from_children<I>(children: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut nodes: BTreeMap<String, Relations> = BTreeMap::new();
        for (parent, kids) in children {
            for kid in &kids {
                nodes
                    .entry(kid.clone())
                    .or_default()
                    .parents
                    .push(parent.clone());
            }
            nodes.entry(parent).or_default().children = kids;
        }
        Self { nodes }
    }

    pub fn children(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|r| r.children.as_slice())
            .unwrap_or_default()
    }

    pub fn parents(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|r| r.parents.as_slice())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<&Relations> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entries for the given ids only. Missing ids get empty relations.
    pub fn subset<S: AsRef<str>>(&self, ids: &[S]) -> Hierarchy {
        let nodes = ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                (id.to_string(), self.nodes.get(id).cloned().unwrap_or_default())
            })
            .collect();
        Hierarchy { nodes }
    }

    /// True if any listed id is a direct child of another listed id.
    pub fn has_overlap<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        let set: BTreeSet<&str> = ids.iter().map(AsRef::as_ref).collect();
        set.iter()
            .any(|id| self.children(id).iter().any(|c| set.contains(c.as_str())))
    }
}

/// Query the catalog once per id and assemble the hierarchy.
pub fn build_hierarchy<S: AsRef<str>>(
    catalog: &dyn Catalog,
    ids: &[S],
    events: Option<&Sender<MetadataEvent>>,
) -> Result<Hierarchy, MetadataError> {
    let total = ids.len();
    let mut children = Vec::with_capacity(total);
    for (i, id) in ids.iter().enumerate() {
        let id = id.as_ref();
        children.push((id.to_string(), catalog.hyponyms(id)?));
        let done = i + 1;
        if done % PROGRESS_INTERVAL == 0 || done == total {
            emit(events, MetadataEvent::HierarchyProgress { done, total });
        }
    }
    Ok(Hierarchy::from_children(children))
}

/// Load `<root>/full_tree_structure.json`, or build it.
///
/// With `subset = None` the tree is built over the full catalog list and
/// persisted. With a subset, a persisted full tree is narrowed to those ids;
/// if none exists, only the subset is queried and nothing is written, so a
/// partial tree never masquerades as the full one.
pub fn load_or_build_hierarchy(
    root: &Path,
    catalog: &dyn Catalog,
    subset: Option<&[String]>,
    events: Option<&Sender<MetadataEvent>>,
) -> Result<Hierarchy, MetadataError> {
    let path = root.join(TREE_FILENAME);
    if let Some(tree) = load_json::<Hierarchy>(&path) {
        return Ok(match subset {
            Some(ids) => tree.subset(ids),
            None => tree,
        });
    }

    info!("calculating hierarchy from the catalog");
    emit(
        events,
        MetadataEvent::Building {
            artifact: Artifact::Hierarchy,
        },
    );
    match subset {
        Some(ids) => Ok(build_hierarchy(catalog, ids, events)?.subset(ids)),
        None => {
            let ids = load_or_fetch_synset_list(root, catalog, events)?;
            let tree = build_hierarchy(catalog, &ids, events)?;
            persist(&path, &tree, Artifact::Hierarchy, events)?;
            Ok(tree)
        }
    }
}

/// True if any listed id is a direct child of another listed id.
///
/// Stops at the first overlap found; at most one hyponym query per id.
pub fn overlaps_in_hierarchy<S: AsRef<str>>(
    catalog: &dyn Catalog,
    ids: &[S],
) -> Result<bool, MetadataError> {
    let set: BTreeSet<&str> = ids.iter().map(AsRef::as_ref).collect();
    for id in &set {
        if catalog
            .hyponyms(id)?
            .iter()
            .any(|child| set.contains(child.as_str()))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

// ============================================================================
// Filename index
// ============================================================================

/// Category id → filenames of its images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilenameIndex {
    entries: BTreeMap<String, Vec<String>>,
}

impl FilenameIndex {
    /// Group filenames by the category encoded in their names.
    pub fn from_filenames<I, S>(filenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: group_by_category(filenames),
        }
    }

    /// Index every `*.JPEG` file directly inside `dir`.
    ///
    /// Filenames within a category are sorted.
    pub fn from_directory(dir: &Path) -> Result<Self, MetadataError> {
        let mut names = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file()
                && let Some(name) = entry.file_name().to_str()
                && is_image_filename(name)
            {
                names.push(name.to_string());
            }
        }
        Ok(Self::from_filenames(names))
    }

    /// Load `<root>/filenames_dict.json`; on miss, fetch that file through
    /// the transfer collaborator and load it.
    pub fn load_or_fetch(
        root: &Path,
        transfer: &dyn FileTransfer,
        events: Option<&Sender<MetadataEvent>>,
    ) -> Result<Self, MetadataError> {
        let path = root.join(FILENAME_INDEX_FILENAME);
        if let Some(index) = load_json(&path) {
            return Ok(index);
        }
        info!(via = %transfer.describe(), "filename index not found, fetching");
        emit(
            events,
            MetadataEvent::Building {
                artifact: Artifact::FilenameIndex,
            },
        );
        std::fs::create_dir_all(root)?;
        transfer.fetch(FILENAME_INDEX_FILENAME, root)?;
        load_json(&path).ok_or(MetadataError::Unreadable { path })
    }

    /// Filenames of one category; empty when unknown.
    pub fn get(&self, id: &str) -> &[String] {
        self.entries
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn count(&self, id: &str) -> usize {
        self.get(id).len()
    }

    /// Restrict to the given categories; unknown ids map to an empty list.
    pub fn subset<S: AsRef<str>>(&self, ids: &[S]) -> Self {
        let entries = ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                (id.to_string(), self.get(id).to_vec())
            })
            .collect();
        Self { entries }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_images(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        save_json(path, self)
    }
}

// ============================================================================
// Synset records
// ============================================================================

/// Everything known about one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynsetRecord {
    pub id: String,
    pub words: String,
    pub definition: String,
    pub filenames: Vec<String>,
    pub num_images: usize,
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

/// Category id → record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynsetMeta {
    records: BTreeMap<String, SynsetRecord>,
}

impl SynsetMeta {
    /// Assemble records for `ids` from already fetched pieces.
    ///
    /// Missing words or definitions become empty strings.
    pub fn assemble<S: AsRef<str>>(
        ids: &[S],
        words: &BTreeMap<String, String>,
        definitions: &BTreeMap<String, String>,
        index: &FilenameIndex,
        hierarchy: &Hierarchy,
    ) -> Self {
        let records = ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                let lookup = |table: &BTreeMap<String, String>, what: &str| {
                    table.get(id).cloned().unwrap_or_else(|| {
                        warn!(synset = id, "no {what} entry");
                        String::new()
                    })
                };
                let filenames = index.get(id).to_vec();
                let record = SynsetRecord {
                    id: id.to_string(),
                    words: lookup(words, "words"),
                    definition: lookup(definitions, "definition"),
                    num_images: filenames.len(),
                    filenames,
                    parents: hierarchy.parents(id).to_vec(),
                    children: hierarchy.children(id).to_vec(),
                };
                (id.to_string(), record)
            })
            .collect();
        Self { records }
    }

    pub fn get(&self, id: &str) -> Option<&SynsetRecord> {
        self.records.get(id)
    }

    /// Image count of a category; zero when unknown.
    pub fn num_images(&self, id: &str) -> usize {
        self.get(id).map_or(0, |r| r.num_images)
    }

    pub fn records(&self) -> impl Iterator<Item = &SynsetRecord> {
        self.records.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Inputs needed to build [`SynsetMeta`] when it is not on disk.
pub struct SynsetMetaSources<'a> {
    /// Where the word and definition tables are cached.
    pub root: &'a Path,
    pub ids: &'a [String],
    pub catalog: &'a dyn Catalog,
    pub index: &'a FilenameIndex,
    pub hierarchy: &'a Hierarchy,
}

/// Load `<meta_dir>/synset_meta.json`, or assemble and persist it.
///
/// `sources` is only invoked on a miss, so an existing file costs no
/// catalog calls. Its error type is the caller's, letting a facade build
/// the inputs lazily with its own fallible accessors.
pub fn load_or_build_synset_meta<'a, F, E>(
    meta_dir: &Path,
    sources: F,
    events: Option<&Sender<MetadataEvent>>,
) -> Result<SynsetMeta, E>
where
    F: FnOnce() -> Result<SynsetMetaSources<'a>, E>,
    E: From<MetadataError>,
{
    let path = meta_dir.join(SYNSET_META_FILENAME);
    if let Some(meta) = load_json(&path) {
        return Ok(meta);
    }
    info!("could not load synset metadata from file, constructing");
    emit(
        events,
        MetadataEvent::Building {
            artifact: Artifact::SynsetMeta,
        },
    );
    let src = sources()?;
    let words = load_or_fetch_words(src.root, src.catalog, events)?;
    let definitions = load_or_fetch_definitions(src.root, src.catalog, events)?;
    let meta = SynsetMeta::assemble(src.ids, &words, &definitions, src.index, src.hierarchy);
    persist(&path, &meta, Artifact::SynsetMeta, events)?;
    Ok(meta)
}

// ============================================================================
// Image table
// ============================================================================

/// One image of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRow {
    pub filename: String,
    pub synset: String,
}

impl ImageRow {
    /// Row for a filename, with the category derived from its name.
    pub fn from_filename(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let synset = category_of(&filename).to_string();
        Self { filename, synset }
    }
}

/// Ordered `(filename, synset)` rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageTable {
    rows: Vec<ImageRow>,
}

impl ImageTable {
    pub fn new(rows: Vec<ImageRow>) -> Self {
        Self { rows }
    }

    /// Every filename of every record, in record order; synset derived from
    /// the filename.
    pub fn from_synset_meta(meta: &SynsetMeta) -> Self {
        Self::from_filenames(meta.records().flat_map(|r| r.filenames.iter()))
    }

    pub fn from_filenames<I, S>(filenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rows: filenames
                .into_iter()
                .map(|f| ImageRow::from_filename(f.as_ref()))
                .collect(),
        }
    }

    pub fn rows(&self) -> &[ImageRow] {
        &self.rows
    }

    pub fn filenames(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.filename.clone()).collect()
    }

    pub fn synsets(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.synset.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn extend(&mut self, other: ImageTable) {
        self.rows.extend(other.rows);
    }
}

/// Load `<meta_dir>/meta.json`, or build it (normally from the synset
/// records, see [`ImageTable::from_synset_meta`]) and persist it.
pub fn load_or_build_image_table<F, E>(
    meta_dir: &Path,
    build: F,
    events: Option<&Sender<MetadataEvent>>,
) -> Result<ImageTable, E>
where
    F: FnOnce() -> Result<ImageTable, E>,
    E: From<MetadataError>,
{
    let path = meta_dir.join(IMAGE_TABLE_FILENAME);
    if let Some(table) = load_json(&path) {
        return Ok(table);
    }
    info!("could not load image table from file, constructing");
    emit(
        events,
        MetadataEvent::Building {
            artifact: Artifact::ImageTable,
        },
    );
    let table = build()?;
    persist(&path, &table, Artifact::ImageTable, events)?;
    Ok(table)
}
