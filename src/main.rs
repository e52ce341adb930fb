use clap::{Parser, Subcommand};
use imagenet_cache::cache::FileCache;
use imagenet_cache::catalog::{Catalog, HttpCatalog};
use imagenet_cache::config::{self, DatasetConfig};
use imagenet_cache::dataset::{Dataset, Scope};
use imagenet_cache::download::{self, Count, DownloadOptions};
use imagenet_cache::imaging::{ColorMode, CropBox, DType};
use imagenet_cache::loader::Loader;
use imagenet_cache::{output, transfer};
use rayon::prelude::*;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imagenet-cache")]
#[command(about = "Download, cache, and preprocess images of a synset image collection")]
#[command(long_about = "\
Download, cache, and preprocess images of a synset image collection

Images are named <synset>_<number>.JPEG and fetched one at a time the first
time they are needed. Metadata (category hierarchy, filename index, words and
definitions) is built from the remote catalog once and kept as JSON.

Local layout (defaults):

  ~/.skdata/imagenet/
  ├── config.toml                  # Optional, see 'gen-config'
  ├── synset_list.json             # Category ids
  ├── words.json                   # Category → words
  ├── definitions.json             # Category → definition
  ├── full_tree_structure.json     # Category hierarchy
  ├── filenames_dict.json          # Category → filenames
  ├── images/                      # Image cache
  │   ├── cached_set.json          # Names known to be present
  │   └── n01440764_10026.JPEG
  └── meta/
      ├── synset_meta.json         # Per-category records
      ├── meta.json                # (filename, synset) rows
      └── <subset>/                # Same files for a named subset

Logging goes to stderr and is controlled by RUST_LOG (default: info).

Run 'imagenet-cache gen-config' to generate a documented config.toml.")]
#[command(version = env!("IMAGENET_CACHE_VERSION"))]
struct Cli {
    /// Config file (default: ~/.skdata/imagenet/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List category ids of the collection
    Synsets {
        /// Only categories with at least this many images
        #[arg(long, default_value_t = 0)]
        threshold: usize,
    },
    /// Build or load metadata and print a per-category summary
    Meta {
        /// Restrict to these categories (a named subset)
        synsets: Vec<String>,
        /// Subset name; defaults to the ids joined with '+'
        #[arg(long, requires = "synsets")]
        name: Option<String>,
    },
    /// Download whole categories from the archive endpoint
    Download {
        #[arg(required = true)]
        synsets: Vec<String>,
        /// Keep this many images per category instead of all
        #[arg(long)]
        count: Option<usize>,
        /// Seed for sampling
        #[arg(long)]
        seed: Option<u64>,
        /// Keep the first --count entries instead of sampling
        #[arg(long, requires = "count")]
        first_only: bool,
        /// Drop categories known not to be downloadable
        #[arg(long)]
        challenge: bool,
        /// Destination directory (default: the image cache)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Make sure files are in the local cache
    Fetch {
        #[arg(required = true)]
        filenames: Vec<String>,
    },
    /// Preprocess files into one batch and print its summary
    Process {
        #[arg(required = true)]
        filenames: Vec<String>,
        /// Resize target as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_resize)]
        resize: Option<(u32, u32)>,
        /// Color mode: RGB or L
        #[arg(long)]
        mode: Option<ColorMode>,
        /// Element type: uint8, float32 or float64
        #[arg(long)]
        dtype: Option<DType>,
        /// Crop box after resize as min_x,max_x,min_y,max_y
        #[arg(long, value_parser = parse_crop)]
        crop: Option<CropBox>,
        /// Skip zero-mean unit-variance normalization
        #[arg(long)]
        no_normalize: bool,
        /// Flatten every image to one dimension
        #[arg(long)]
        flatten: bool,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let load_config = || -> Result<DatasetConfig, Box<dyn std::error::Error>> {
        let config = config::load_config(&config_path)?;
        init_thread_pool(&config.processing);
        Ok(config)
    };

    match cli.command {
        Command::Synsets { threshold } => {
            let config = load_config()?;
            let (tx, rx) = mpsc::channel();
            let printer = spawn_printer(rx, output::format_metadata_event);
            let dataset = open_dataset(&config, Scope::All)?.with_events(tx);
            let ids = dataset.synset_list(threshold)?;
            drop(dataset);
            join_printer(printer)?;
            output::print_synset_list(&ids);
        }
        Command::Meta { synsets, name } => {
            let config = load_config()?;
            let scope = if synsets.is_empty() {
                Scope::All
            } else {
                Scope::Synsets {
                    name: name.unwrap_or_else(|| synsets.join("+")),
                    ids: synsets,
                }
            };
            let (tx, rx) = mpsc::channel();
            let printer = spawn_printer(rx, output::format_metadata_event);
            let dataset = open_dataset(&config, scope)?.with_events(tx);
            let meta = dataset.synset_meta()?.clone();
            let table = dataset.image_table()?.clone();
            drop(dataset);
            join_printer(printer)?;
            output::print_meta_summary(&meta, &table);
        }
        Command::Download {
            synsets,
            count,
            seed,
            first_only,
            challenge,
            dest,
        } => {
            let config = load_config()?;
            let catalog = HttpCatalog::new(config.remote.clone())?;
            let options = DownloadOptions {
                count: count.map_or(Count::All, Count::Exactly),
                seed,
                first_only,
            };
            let image_dir = config.image_path();
            let dest = dest.unwrap_or_else(|| image_dir.clone());

            let (tx, rx) = mpsc::channel();
            let printer = spawn_printer(rx, output::format_download_event);
            let table = if challenge {
                download::download_challenge_synsets(&catalog, &synsets[..], &options, &dest, Some(&tx))
            } else {
                download::download_synsets(&catalog, &synsets[..], &options, &dest, Some(&tx))
            };
            drop(tx);
            join_printer(printer)?;
            let table = table?;

            if dest == image_dir {
                FileCache::open(&image_dir)?.record(table.filenames())?;
            }
            output::print_download_output(&table, &dest);
        }
        Command::Fetch { filenames } => {
            let config = load_config()?;
            let cache = FileCache::open(config.image_path())?;
            let transfer = transfer::from_config(&config.transfer)?;
            let files = filenames
                .par_iter()
                .map(|f| {
                    cache
                        .ensure_local(f, transfer.as_ref())
                        .map(|path| (f.clone(), path))
                })
                .collect::<Result<Vec<_>, _>>()?;
            output::print_fetch_output(&files, cache.stats());
        }
        Command::Process {
            filenames,
            resize,
            mode,
            dtype,
            crop,
            no_normalize,
            flatten,
        } => {
            let config = load_config()?;
            let mut spec = config.preprocess.to_spec()?;
            if let Some(resize) = resize {
                spec.resize_to = resize;
            }
            if let Some(mode) = mode {
                spec.mode = mode;
            }
            if let Some(dtype) = dtype {
                spec.dtype = dtype;
            }
            if crop.is_some() {
                spec.crop = crop;
            }
            if no_normalize {
                spec.normalize = false;
            }
            if flatten {
                spec.flatten = true;
            }

            let cache = Arc::new(FileCache::open(config.image_path())?);
            let transfer = transfer::from_config(&config.transfer)?;
            let loader = Loader::new(cache, transfer, spec)?;
            let batch = loader.load(&filenames)?;
            output::print_batch_summary(&batch, loader.cache().stats());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores: user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn open_dataset(config: &DatasetConfig, scope: Scope) -> Result<Dataset, Box<dyn std::error::Error>> {
    let catalog: Arc<dyn Catalog> = Arc::new(HttpCatalog::new(config.remote.clone())?);
    let transfer = transfer::from_config(&config.transfer)?;
    Ok(Dataset::open(config, catalog, transfer, scope)?)
}

/// Print progress events as they arrive until every sender is dropped.
fn spawn_printer<E: Send + 'static>(
    rx: Receiver<E>,
    format: fn(&E) -> Vec<String>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in rx {
            for line in format(&event) {
                println!("{}", line);
            }
        }
    })
}

fn join_printer(printer: JoinHandle<()>) -> Result<(), Box<dyn std::error::Error>> {
    printer.join().map_err(|_| "progress printer panicked".into())
}

/// `WIDTHxHEIGHT`, e.g. `224x224`.
fn parse_resize(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.trim().parse().map_err(|e: ParseIntError| e.to_string())?;
    let h = h.trim().parse().map_err(|e: ParseIntError| e.to_string())?;
    Ok((w, h))
}

/// `min_x,max_x,min_y,max_y`.
fn parse_crop(s: &str) -> Result<CropBox, String> {
    let parts: Result<Vec<u32>, _> = s.split(',').map(|p| p.trim().parse()).collect();
    let parts = parts.map_err(|e: ParseIntError| e.to_string())?;
    let bounds: [u32; 4] = parts
        .try_into()
        .map_err(|v: Vec<_>| format!("expected 4 values, got {}", v.len()))?;
    Ok(CropBox::from(bounds))
}
