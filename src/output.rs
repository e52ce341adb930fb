//! CLI output formatting for every command.
//!
//! # Information-First Display
//!
//! Each category is shown by its positional index and id, with its words as
//! secondary context. Counts come last. Paths are only shown where the user
//! asked for files (`fetch`).
//!
//! # Output Format
//!
//! ## Synsets
//!
//! ```text
//! 001 n01440764
//! 002 n01443537
//! 2 synsets
//! ```
//!
//! ## Meta
//!
//! ```text
//! 001 n01440764 tench, Tinca tinca (1300 images)
//!     Parents: n01439121
//! 002 n01443537 goldfish, Carassius auratus (1300 images)
//! 2 synsets, 2600 images
//! ```
//!
//! ## Download
//!
//! ```text
//! [1/2] n01440764
//!     extracted 1300, kept 10
//! [2/2] n01443537
//!     extracted 1300, kept 10
//! Downloaded 20 images from 2 synsets
//! ```
//!
//! ## Process
//!
//! ```text
//! 3 images → [3, 224, 224, 3] float32
//!     mean 0.000000, std 1.000000
//! Cache: 1 cached, 2 downloaded (3 total)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::CacheStats;
use crate::download::DownloadEvent;
use crate::imaging::Pixels;
use crate::metadata::{ImageTable, MetadataEvent, SynsetMeta};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `"1 image"` / `"3 images"`.
fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

// ============================================================================
// Progress events
// ============================================================================

/// Format a metadata rebuild event as display lines.
pub fn format_metadata_event(event: &MetadataEvent) -> Vec<String> {
    match event {
        MetadataEvent::Building { artifact } => {
            vec![format!("Building {artifact} ({})", artifact.file_name())]
        }
        MetadataEvent::HierarchyProgress { done, total } => {
            let pct = if *total == 0 { 100 } else { done * 100 / total };
            vec![format!("{}hierarchy {done}/{total} ({pct}%)", indent(1))]
        }
        MetadataEvent::Saved { path, .. } => {
            vec![format!("{}saved {}", indent(1), path.display())]
        }
    }
}

/// Format a bulk download event as display lines.
pub fn format_download_event(event: &DownloadEvent) -> Vec<String> {
    match event {
        DownloadEvent::SynsetStarted {
            index,
            total,
            synset,
        } => vec![format!("[{}/{}] {}", index + 1, total, synset)],
        DownloadEvent::SynsetFinished {
            extracted, kept, ..
        } => vec![format!("{}extracted {extracted}, kept {kept}", indent(1))],
    }
}

// ============================================================================
// synsets
// ============================================================================

pub fn format_synset_list(ids: &[String]) -> Vec<String> {
    let mut lines: Vec<String> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| format!("{} {}", format_index(i + 1), id))
        .collect();
    lines.push(plural(ids.len(), "synset"));
    lines
}

pub fn print_synset_list(ids: &[String]) {
    for line in format_synset_list(ids) {
        println!("{}", line);
    }
}

// ============================================================================
// meta
// ============================================================================

/// One header per category plus its hierarchy links, then totals.
pub fn format_meta_summary(meta: &SynsetMeta, table: &ImageTable) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, record) in meta.records().enumerate() {
        let mut header = format!("{} {}", format_index(i + 1), record.id);
        if !record.words.is_empty() {
            header.push(' ');
            header.push_str(&record.words);
        }
        header.push_str(&format!(" ({})", plural(record.num_images, "image")));
        lines.push(header);
        if !record.parents.is_empty() {
            lines.push(format!("{}Parents: {}", indent(1), record.parents.join(", ")));
        }
        if !record.children.is_empty() {
            lines.push(format!("{}Children: {}", indent(1), record.children.join(", ")));
        }
    }
    lines.push(format!(
        "{}, {}",
        plural(meta.len(), "synset"),
        plural(table.len(), "image")
    ));
    lines
}

pub fn print_meta_summary(meta: &SynsetMeta, table: &ImageTable) {
    for line in format_meta_summary(meta, table) {
        println!("{}", line);
    }
}

// ============================================================================
// download
// ============================================================================

pub fn format_download_output(table: &ImageTable, dest: &Path) -> Vec<String> {
    let synsets = crate::naming::unique_categories(table.filenames());
    vec![format!(
        "Downloaded {} from {} into {}",
        plural(table.len(), "image"),
        plural(synsets.len(), "synset"),
        dest.display()
    )]
}

pub fn print_download_output(table: &ImageTable, dest: &Path) {
    for line in format_download_output(table, dest) {
        println!("{}", line);
    }
}

// ============================================================================
// fetch
// ============================================================================

pub fn format_fetch_output(files: &[(String, std::path::PathBuf)], stats: CacheStats) -> Vec<String> {
    let mut lines: Vec<String> = files
        .iter()
        .enumerate()
        .map(|(i, (name, path))| {
            format!("{} {} \u{2192} {}", format_index(i + 1), name, path.display())
        })
        .collect();
    lines.push(format!("Cache: {stats}"));
    lines
}

pub fn print_fetch_output(files: &[(String, std::path::PathBuf)], stats: CacheStats) {
    for line in format_fetch_output(files, stats) {
        println!("{}", line);
    }
}

// ============================================================================
// process
// ============================================================================

/// Shape, dtype and summary statistics of a processed batch.
pub fn format_batch_summary(batch: &Pixels, stats: CacheStats) -> Vec<String> {
    let (mean, std) = batch.mean_std();
    vec![
        format!(
            "{} \u{2192} {:?} {}",
            plural(batch.len(), "image"),
            batch.shape(),
            batch.dtype()
        ),
        format!("{}mean {mean:.6}, std {std:.6}", indent(1)),
        format!("Cache: {stats}"),
    ]
}

pub fn print_batch_summary(batch: &Pixels, stats: CacheStats) {
    for line in format_batch_summary(batch, stats) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
