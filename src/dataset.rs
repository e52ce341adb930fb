//! Dataset facade: one object tying configuration, catalog, transfer, cache
//! and metadata together.
//!
//! A [`Dataset`] is opened over a [`Scope`]:
//!
//! | Scope | Category list | Filename index | Meta directory |
//! |---|---|---|---|
//! | `All` | `synset_list.json`, else the catalog | `filenames_dict.json` | `<meta_dir>` |
//! | `Synsets { name, ids }` | `ids` | full index narrowed to `ids` | `<meta_dir>/<name>` |
//! | `Filenames { name, filenames }` | unique categories of `filenames` | grouped `filenames` | `<meta_dir>/<name>` |
//!
//! Every metadata accessor is computed at most once per `Dataset` and then
//! served from memory. The image cache directory is shared by all scopes.

use crate::cache::{CacheError, FileCache};
use crate::catalog::{Catalog, CatalogError};
use crate::config::{ConfigError, DatasetConfig};
use crate::imaging::PreprocessSpec;
use crate::lazy::LazyImages;
use crate::loader::{LoadError, Loader};
use crate::metadata::{
    self, FilenameIndex, Hierarchy, ImageTable, MetadataError, MetadataEvent, SynsetMeta,
    SynsetMetaSources,
};
use crate::naming::unique_categories;
use crate::transfer::FileTransfer;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
    #[error("Invalid subset name '{0}'")]
    InvalidName(String),
}

/// Which part of the collection a [`Dataset`] covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    /// A named list of categories.
    Synsets { name: String, ids: Vec<String> },
    /// A named list of individual images.
    Filenames { name: String, filenames: Vec<String> },
}

impl Scope {
    fn name(&self) -> Option<&str> {
        match self {
            Scope::All => None,
            Scope::Synsets { name, .. } | Scope::Filenames { name, .. } => Some(name),
        }
    }
}

/// Memoized view over one scope of the collection.
pub struct Dataset {
    root: PathBuf,
    meta_dir: PathBuf,
    scope: Scope,
    catalog: Arc<dyn Catalog>,
    transfer: Arc<dyn FileTransfer>,
    cache: Arc<FileCache>,
    default_spec: PreprocessSpec,
    events: Option<Sender<MetadataEvent>>,

    base_synsets: OnceLock<Vec<String>>,
    filename_index: OnceLock<FilenameIndex>,
    hierarchy: OnceLock<Hierarchy>,
    synset_meta: OnceLock<SynsetMeta>,
    image_table: OnceLock<ImageTable>,
}

/// `cell.get_or_init` for fallible initializers.
fn memo<T, E>(cell: &OnceLock<T>, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = init()?;
    Ok(cell.get_or_init(|| value))
}

impl Dataset {
    /// Open a dataset: create its directories and load the cache presence set.
    /// No metadata is read until first asked for.
    pub fn open(
        config: &DatasetConfig,
        catalog: Arc<dyn Catalog>,
        transfer: Arc<dyn FileTransfer>,
        scope: Scope,
    ) -> Result<Self, DatasetError> {
        let root = config.root_path();
        let mut meta_dir = config.meta_path();
        if let Some(name) = scope.name() {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(DatasetError::InvalidName(name.to_string()));
            }
            meta_dir = meta_dir.join(name);
        }
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&meta_dir)?;
        let cache = Arc::new(FileCache::open(config.image_path())?);
        let default_spec = config.preprocess.to_spec()?;

        Ok(Self {
            root,
            meta_dir,
            scope,
            catalog,
            transfer,
            cache,
            default_spec,
            events: None,
            base_synsets: OnceLock::new(),
            filename_index: OnceLock::new(),
            hierarchy: OnceLock::new(),
            synset_meta: OnceLock::new(),
            image_table: OnceLock::new(),
        })
    }

    /// Report metadata rebuild progress on `tx`.
    pub fn with_events(mut self, tx: Sender<MetadataEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    pub fn cache(&self) -> &Arc<FileCache> {
        &self.cache
    }

    /// Preprocessing spec from `[preprocess]` in the config.
    pub fn default_spec(&self) -> &PreprocessSpec {
        &self.default_spec
    }

    fn events(&self) -> Option<&Sender<MetadataEvent>> {
        self.events.as_ref()
    }

    fn base_synsets(&self) -> Result<&[String], DatasetError> {
        memo(&self.base_synsets, || {
            Ok::<_, DatasetError>(match &self.scope {
                Scope::All => metadata::load_or_fetch_synset_list(
                    &self.root,
                    self.catalog.as_ref(),
                    self.events(),
                )?,
                Scope::Synsets { ids, .. } => ids.clone(),
                Scope::Filenames { filenames, .. } => unique_categories(filenames),
            })
        })
        .map(Vec::as_slice)
    }

    /// Category ids of this scope. With `threshold > 0`, only categories
    /// holding at least that many images (which loads [`Self::synset_meta`]).
    pub fn synset_list(&self, threshold: usize) -> Result<Vec<String>, DatasetError> {
        let ids = self.base_synsets()?;
        if threshold == 0 {
            return Ok(ids.to_vec());
        }
        let meta = self.synset_meta()?;
        Ok(ids
            .iter()
            .filter(|id| meta.num_images(id) >= threshold)
            .cloned()
            .collect())
    }

    /// Category id → filenames, restricted to this scope's categories.
    pub fn filename_index(&self) -> Result<&FilenameIndex, DatasetError> {
        memo(&self.filename_index, || {
            let ids = self.base_synsets()?;
            Ok::<_, DatasetError>(match &self.scope {
                Scope::Filenames { filenames, .. } => FilenameIndex::from_filenames(filenames),
                Scope::All | Scope::Synsets { .. } => {
                    FilenameIndex::load_or_fetch(&self.root, self.transfer.as_ref(), self.events())?
                        .subset(ids)
                }
            })
        })
    }

    /// Parent/child links of this scope's categories.
    pub fn hierarchy(&self) -> Result<&Hierarchy, DatasetError> {
        memo(&self.hierarchy, || {
            let subset = match &self.scope {
                Scope::All => None,
                Scope::Synsets { .. } | Scope::Filenames { .. } => Some(self.base_synsets()?),
            };
            Ok::<_, DatasetError>(metadata::load_or_build_hierarchy(
                &self.root,
                self.catalog.as_ref(),
                subset,
                self.events(),
            )?)
        })
    }

    /// Per-category records, loaded from or persisted to the meta directory.
    pub fn synset_meta(&self) -> Result<&SynsetMeta, DatasetError> {
        memo(&self.synset_meta, || {
            metadata::load_or_build_synset_meta(
                &self.meta_dir,
                || self.meta_sources(),
                self.events(),
            )
        })
    }

    fn meta_sources(&self) -> Result<SynsetMetaSources<'_>, DatasetError> {
        Ok(SynsetMetaSources {
            root: &self.root,
            ids: self.base_synsets()?,
            catalog: self.catalog.as_ref(),
            index: self.filename_index()?,
            hierarchy: self.hierarchy()?,
        })
    }

    /// One row per image of this scope.
    pub fn image_table(&self) -> Result<&ImageTable, DatasetError> {
        memo(&self.image_table, || {
            metadata::load_or_build_image_table(
                &self.meta_dir,
                || self.synset_meta().map(ImageTable::from_synset_meta),
                self.events(),
            )
        })
    }

    /// Filenames of every image in this scope, in image-table order.
    pub fn filenames(&self) -> Result<Vec<String>, DatasetError> {
        Ok(self.image_table()?.filenames())
    }

    /// Lazy view over every image of the scope under `spec`.
    pub fn images(&self, spec: PreprocessSpec) -> Result<LazyImages, DatasetError> {
        let loader = Loader::new(self.cache.clone(), self.transfer.clone(), spec)?;
        Ok(LazyImages::new(loader, self.filenames()?))
    }

    /// Like [`Self::images`] with every image flattened to one dimension.
    pub fn pixel_features(&self, spec: PreprocessSpec) -> Result<LazyImages, DatasetError> {
        self.images(spec.flattened())
    }

    /// True if any category of this scope is a direct child of another.
    pub fn overlaps_in_hierarchy(&self) -> Result<bool, DatasetError> {
        let ids = self.base_synsets()?;
        Ok(self.hierarchy()?.has_overlap(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::DType;
    use crate::metadata::{
        FILENAME_INDEX_FILENAME, SYNSET_LIST_FILENAME, SYNSET_META_FILENAME, TREE_FILENAME,
    };
    use crate::test_helpers::{CountingTransfer, MockCatalog};
    use tempfile::TempDir;

    fn catalog() -> Arc<MockCatalog> {
        Arc::new(
            MockCatalog::new()
                .with_synset("n1", "animal", "a living thing", &["n2", "n3"])
                .with_synset("n2", "fish", "swims", &[])
                .with_synset("n3", "bird", "flies", &[]),
        )
    }

    fn seed_index(config: &DatasetConfig) {
        FilenameIndex::from_filenames([
            "n2_1.JPEG", "n2_2.JPEG", "n2_3.JPEG", "n3_1.JPEG",
        ])
        .save(&config.root_path().join(FILENAME_INDEX_FILENAME))
        .unwrap();
    }

    fn open(tmp: &TempDir, catalog: Arc<MockCatalog>, scope: Scope) -> Dataset {
        let config = DatasetConfig::rooted_at(tmp.path());
        seed_index(&config);
        Dataset::open(&config, catalog, Arc::new(CountingTransfer::new()), scope).unwrap()
    }

    #[test]
    fn full_scope_builds_and_persists_everything() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog();
        let ds = open(&tmp, catalog.clone(), Scope::All);

        assert_eq!(ds.synset_list(0).unwrap(), vec!["n1", "n2", "n3"]);
        let meta = ds.synset_meta().unwrap();
        assert_eq!(meta.num_images("n2"), 3);
        assert_eq!(meta.get("n2").unwrap().parents, ["n1"]);
        assert_eq!(ds.filenames().unwrap().len(), 4);

        assert!(tmp.path().join(TREE_FILENAME).exists());
        assert!(tmp.path().join(SYNSET_LIST_FILENAME).exists());
        assert!(tmp.path().join("meta").join(SYNSET_META_FILENAME).exists());
        assert!(tmp.path().join("meta").join("meta.json").exists());
    }

    #[test]
    fn threshold_filters_small_categories() {
        let tmp = TempDir::new().unwrap();
        let ds = open(&tmp, catalog(), Scope::All);
        assert_eq!(ds.synset_list(2).unwrap(), vec!["n2"]);
        assert_eq!(ds.synset_list(1).unwrap(), vec!["n2", "n3"]);
    }

    #[test]
    fn metadata_is_memoized() {
        let tmp = TempDir::new().unwrap();
        let catalog = catalog();
        let ds = open(&tmp, catalog.clone(), Scope::All);
        ds.synset_meta().unwrap();
        ds.synset_meta().unwrap();
        ds.synset_list(0).unwrap();
        // The hierarchy build reads the list persisted by the first call.
        assert_eq!(catalog.calls("synset_list"), 1);
        assert_eq!(catalog.calls("words"), 1);
    }

    #[test]
    fn reopened_dataset_makes_no_catalog_calls() {
        let tmp = TempDir::new().unwrap();
        open(&tmp, catalog(), Scope::All).image_table().unwrap();

        let fresh = catalog();
        let ds = open(&tmp, fresh.clone(), Scope::All);
        assert_eq!(ds.filenames().unwrap().len(), 4);
        assert_eq!(ds.synset_list(0).unwrap(), vec!["n1", "n2", "n3"]);
        assert_eq!(fresh.calls("synset_list"), 0);
        assert_eq!(fresh.calls("words"), 0);
        assert_eq!(fresh.calls("hyponyms"), 0);
    }

    #[test]
    fn synset_scope_uses_its_own_meta_dir() {
        let tmp = TempDir::new().unwrap();
        let ds = open(
            &tmp,
            catalog(),
            Scope::Synsets {
                name: "birds".into(),
                ids: vec!["n3".into()],
            },
        );
        assert_eq!(ds.synset_list(0).unwrap(), vec!["n3"]);
        assert_eq!(ds.filenames().unwrap(), vec!["n3_1.JPEG"]);
        assert!(tmp.path().join("meta/birds").join(SYNSET_META_FILENAME).exists());
        assert!(!tmp.path().join("meta").join(SYNSET_META_FILENAME).exists());
    }

    #[test]
    fn filename_scope_derives_categories_from_names() {
        let tmp = TempDir::new().unwrap();
        let ds = open(
            &tmp,
            catalog(),
            Scope::Filenames {
                name: "pick".into(),
                filenames: vec![
                    "n3_9.JPEG".into(),
                    "n2_5.JPEG".into(),
                    "n3_8.JPEG".into(),
                ],
            },
        );
        assert_eq!(ds.synset_list(0).unwrap(), vec!["n2", "n3"]);
        let index = ds.filename_index().unwrap();
        assert_eq!(index.get("n3"), ["n3_9.JPEG", "n3_8.JPEG"]);
        assert_eq!(ds.synset_meta().unwrap().get("n2").unwrap().words, "fish");
    }

    #[test]
    fn invalid_subset_name_rejected() {
        let tmp = TempDir::new().unwrap();
        let config = DatasetConfig::rooted_at(tmp.path());
        let result = Dataset::open(
            &config,
            catalog(),
            Arc::new(CountingTransfer::new()),
            Scope::Synsets {
                name: "../x".into(),
                ids: vec![],
            },
        );
        assert!(matches!(result, Err(DatasetError::InvalidName(_))));
    }

    #[test]
    fn overlap_within_scope() {
        let tmp = TempDir::new().unwrap();
        let ds = open(
            &tmp,
            catalog(),
            Scope::Synsets {
                name: "mixed".into(),
                ids: vec!["n1".into(), "n3".into()],
            },
        );
        assert!(ds.overlaps_in_hierarchy().unwrap());
    }

    #[test]
    fn images_and_pixel_features() {
        let tmp = TempDir::new().unwrap();
        let ds = open(&tmp, catalog(), Scope::All);
        let spec = PreprocessSpec {
            dtype: DType::Uint8,
            ..PreprocessSpec::resize_only(8, 8)
        };
        let images = ds.images(spec.clone()).unwrap();
        assert_eq!(images.len(), 4);
        assert_eq!(images.get(0).unwrap().shape(), &[8, 8, 3]);

        let features = ds.pixel_features(spec).unwrap();
        assert_eq!(features.get(0).unwrap().shape(), &[8 * 8 * 3]);
        assert_eq!(features.filenames(), images.filenames());
    }

    #[test]
    fn default_spec_comes_from_config() {
        let tmp = TempDir::new().unwrap();
        let ds = open(&tmp, catalog(), Scope::All);
        assert_eq!(ds.default_spec(), &PreprocessSpec::default());
    }
}
