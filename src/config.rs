//! Dataset configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. User files are
//! sparse overlays: they are merged key-by-key on top of the stock defaults,
//! so a file only needs the values it changes.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! root = "~/.skdata/imagenet"            # tree structure + filename index
//! image_dir = "~/.skdata/imagenet/images" # image cache
//! meta_dir = "~/.skdata/imagenet/meta"    # synset records + image table
//!
//! [remote]
//! base_url = "http://www.image-net.org"
//! username = ""
//! access_key = ""
//! release = "latest"
//!
//! [transfer]
//! method = "rsync"   # rsync | http | copy
//! source = ""        # user@host:/path, base URL, or directory
//!
//! [preprocess]
//! resize_to = [256, 256]
//! mode = "RGB"       # RGB | L
//! dtype = "float32"  # uint8 | float32 | float64
//! normalize = true
//! flatten = false
//! # crop = [0, 224, 0, 224]
//! # mask = "mask.png"
//!
//! [processing]
//! max_processes = 4  # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{ColorMode, CropBox, DType, ImagingError, Mask, PreprocessSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Preprocess config error: {0}")]
    Preprocess(#[from] ImagingError),
}

/// Dataset configuration loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// Holds `full_tree_structure.json` and `filenames_dict.json`.
    pub root: String,
    /// Local image cache directory.
    pub image_dir: String,
    /// Holds `synset_meta.json` and `meta.json`.
    pub meta_dir: String,
    /// Catalog service endpoints and credentials.
    pub remote: RemoteConfig,
    /// Where cache misses are fetched from.
    pub transfer: TransferConfig,
    /// Default preprocessing options.
    pub preprocess: PreprocessConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: "~/.skdata/imagenet".to_string(),
            image_dir: "~/.skdata/imagenet/images".to_string(),
            meta_dir: "~/.skdata/imagenet/meta".to_string(),
            remote: RemoteConfig::default(),
            transfer: TransferConfig::default(),
            preprocess: PreprocessConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl DatasetConfig {
    pub fn root_path(&self) -> PathBuf {
        expand_home(&self.root)
    }

    pub fn image_path(&self) -> PathBuf {
        expand_home(&self.image_dir)
    }

    pub fn meta_path(&self) -> PathBuf {
        expand_home(&self.meta_dir)
    }

    /// Point all three directories below a single root.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            root: root.display().to_string(),
            image_dir: root.join("images").display().to_string(),
            meta_dir: root.join("meta").display().to_string(),
            ..Default::default()
        }
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "remote.base_url must not be empty".into(),
            ));
        }
        let [w, h] = self.preprocess.resize_to;
        if w == 0 || h == 0 {
            return Err(ConfigError::Validation(
                "preprocess.resize_to values must be non-zero".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Catalog service endpoints and account identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub base_url: String,
    pub username: String,
    pub access_key: String,
    /// Release tag passed to the archive endpoint.
    pub release: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://www.image-net.org".to_string(),
            username: String::new(),
            access_key: String::new(),
            release: "latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    #[default]
    Rsync,
    Http,
    Copy,
}

/// Cache-miss transfer settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    pub method: TransferMethod,
    /// rsync source, base URL, or directory depending on `method`.
    pub source: String,
}

/// Serializable form of [`PreprocessSpec`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessConfig {
    pub resize_to: [u32; 2],
    pub mode: ColorMode,
    pub dtype: DType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropBox>,
    /// Path to a grayscale mask image sized like the cropped frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    pub normalize: bool,
    pub flatten: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        let spec = PreprocessSpec::default();
        Self {
            resize_to: [spec.resize_to.0, spec.resize_to.1],
            mode: spec.mode,
            dtype: spec.dtype,
            crop: spec.crop,
            mask: None,
            normalize: spec.normalize,
            flatten: spec.flatten,
        }
    }
}

impl PreprocessConfig {
    /// Build the runtime spec, loading the mask image if one is named.
    pub fn to_spec(&self) -> Result<PreprocessSpec, ConfigError> {
        let mask = match &self.mask {
            Some(path) => Some(Mask::open(&expand_home(path))?),
            None => None,
        };
        let spec = PreprocessSpec {
            resize_to: (self.resize_to[0], self.resize_to[1]),
            mode: self.mode,
            dtype: self.dtype,
            crop: self.crop,
            mask,
            normalize: self.normalize,
            flatten: self.flatten,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    // Every field of the default config is a plain string, number, bool or
    // table; serialization cannot fail.
    toml::Value::try_from(DatasetConfig::default())
        .unwrap_or_else(|_| toml::Value::Table(toml::map::Map::new()))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<DatasetConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: DatasetConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given file, falling back to stock defaults when it
/// does not exist.
pub fn load_config(path: &Path) -> Result<DatasetConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Default config file location: `~/.skdata/imagenet/config.toml`.
pub fn default_config_path() -> PathBuf {
    expand_home("~/.skdata/imagenet/config.toml")
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imagenet-cache configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# Directory holding the hierarchy and the filename index.
root = "~/.skdata/imagenet"

# Local image cache. Images are downloaded here on first access.
image_dir = "~/.skdata/imagenet/images"

# Directory holding the per-synset records and the image table.
meta_dir = "~/.skdata/imagenet/meta"

# ---------------------------------------------------------------------------
# Catalog service
# ---------------------------------------------------------------------------
[remote]
base_url = "http://www.image-net.org"
# Account identity and access key for the archive endpoint.
username = ""
access_key = ""
# Release tag requested from the archive endpoint.
release = "latest"

# ---------------------------------------------------------------------------
# Cache-miss transfer
# ---------------------------------------------------------------------------
[transfer]
# rsync: source is "user@host:/path/to/images"
# http:  source is a base URL; files are fetched from <source>/<filename>
# copy:  source is a local or mounted directory
method = "rsync"
source = ""

# ---------------------------------------------------------------------------
# Default preprocessing
# ---------------------------------------------------------------------------
[preprocess]
# Direct resize target [width, height]. Aspect ratio is not preserved.
resize_to = [256, 256]
# "RGB" (3 channels) or "L" (luminance).
mode = "RGB"
# "uint8", "float32" or "float64".
dtype = "float32"
# Rescale every image to zero mean and unit standard deviation.
normalize = true
# Collapse every image to one dimension.
flatten = false
# Crop box [min_x, max_x, min_y, max_y], applied after resize.
# crop = [0, 224, 0, 224]
# Grayscale mask image, same size as the cropped frame.
# mask = "mask.png"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
