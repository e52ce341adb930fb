//! Remote file transfer: copy one named object into a local directory.
//!
//! The [`FileTransfer`] trait is the seam between the [cache](crate::cache)
//! and wherever the full image collection actually lives. It is invoked once
//! per cache miss and is expected to be idempotent: fetching the same file
//! twice simply overwrites it with identical bytes.
//!
//! | Implementation | Source | Mechanism |
//! |---|---|---|
//! | [`RsyncTransfer`] | `user@host:/path/images` | `rsync -az <source>/<file> <dir>` |
//! | [`HttpTransfer`] | `https://mirror/images` | `GET <base>/<file>` via `reqwest` |
//! | [`CopyTransfer`] | local directory | `std::io::copy` |
//!
//! HTTP and copy transfers write into a temporary file of their own in the
//! destination directory and rename it into place, so only complete files
//! ever appear under the real name, even when several workers fetch the same
//! file at once. `rsync` does the same on its own.

use crate::config::{TransferConfig, TransferMethod};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::Builder;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("GET {url} returned {status}")]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Transfer reported success but {0} is missing")]
    Missing(PathBuf),
    #[error("No transfer source configured")]
    NoSource,
}

/// Copies a remote object into a local directory.
pub trait FileTransfer: Send + Sync {
    /// Fetch `filename` into `dest_dir` and return the local path.
    fn fetch(&self, filename: &str, dest_dir: &Path) -> Result<PathBuf, TransferError>;

    /// Short description used in progress output.
    fn describe(&self) -> String;
}

impl<T: FileTransfer + ?Sized> FileTransfer for Arc<T> {
    fn fetch(&self, filename: &str, dest_dir: &Path) -> Result<PathBuf, TransferError> {
        (**self).fetch(filename, dest_dir)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Verify the transfer actually produced the file.
fn expect_present(path: PathBuf) -> Result<PathBuf, TransferError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(TransferError::Missing(path))
    }
}

/// Fill a private temporary file next to `dest_dir/filename`, then rename it
/// over the target. The temporary file is removed if `fill` fails.
fn write_atomically<F>(dest_dir: &Path, filename: &str, fill: F) -> Result<PathBuf, TransferError>
where
    F: FnOnce(&mut fs::File) -> Result<(), TransferError>,
{
    let dest = dest_dir.join(filename);
    let mut partial = Builder::new()
        .prefix(&format!(".{filename}."))
        .suffix(".partial")
        .tempfile_in(dest_dir)?;
    fill(partial.as_file_mut())?;
    partial.persist(&dest).map_err(|e| e.error)?;
    expect_present(dest)
}

/// Shells out to `rsync -az`.
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    source: String,
}

impl RsyncTransfer {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    fn remote_path(&self, filename: &str) -> String {
        format!("{}/{}", self.source.trim_end_matches('/'), filename)
    }
}

impl FileTransfer for RsyncTransfer {
    fn fetch(&self, filename: &str, dest_dir: &Path) -> Result<PathBuf, TransferError> {
        let remote = self.remote_path(filename);
        info!(%remote, dest = %dest_dir.display(), "rsync");
        let output = Command::new("rsync")
            .arg("-az")
            .arg(&remote)
            .arg(dest_dir)
            .output()?;
        if !output.status.success() {
            return Err(TransferError::CommandFailed {
                command: format!("rsync -az {remote} {}", dest_dir.display()),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        expect_present(dest_dir.join(filename))
    }

    fn describe(&self) -> String {
        format!("rsync from {}", self.source)
    }
}

/// Downloads `<base_url>/<filename>` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpTransfer {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransferError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("imagenet-cache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, filename: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), filename)
    }
}

impl FileTransfer for HttpTransfer {
    fn fetch(&self, filename: &str, dest_dir: &Path) -> Result<PathBuf, TransferError> {
        let url = self.url(filename);
        info!(%url, "GET");
        let mut response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            return Err(TransferError::BadStatus {
                url,
                status: response.status(),
            });
        }
        write_atomically(dest_dir, filename, |file| {
            response.copy_to(file)?;
            Ok(())
        })
    }

    fn describe(&self) -> String {
        format!("http from {}", self.base_url)
    }
}

/// Copies from a directory on a local or mounted filesystem.
#[derive(Debug, Clone)]
pub struct CopyTransfer {
    source_dir: PathBuf,
}

impl CopyTransfer {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }
}

impl FileTransfer for CopyTransfer {
    fn fetch(&self, filename: &str, dest_dir: &Path) -> Result<PathBuf, TransferError> {
        let mut source = fs::File::open(self.source_dir.join(filename))?;
        write_atomically(dest_dir, filename, |file| {
            io::copy(&mut source, file)?;
            Ok(())
        })
    }

    fn describe(&self) -> String {
        format!("copy from {}", self.source_dir.display())
    }
}

/// Stands in when `[transfer] source` is empty: every fetch fails with
/// [`TransferError::NoSource`], so commands that never miss the cache still
/// work.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

impl FileTransfer for Unconfigured {
    fn fetch(&self, _filename: &str, _dest_dir: &Path) -> Result<PathBuf, TransferError> {
        Err(TransferError::NoSource)
    }

    fn describe(&self) -> String {
        "no transfer source".to_string()
    }
}

/// Build the transfer configured in `config.toml`.
pub fn from_config(config: &TransferConfig) -> Result<Arc<dyn FileTransfer>, TransferError> {
    if config.source.is_empty() {
        return Ok(Arc::new(Unconfigured));
    }
    Ok(match config.method {
        TransferMethod::Rsync => Arc::new(RsyncTransfer::new(&config.source)),
        TransferMethod::Http => Arc::new(HttpTransfer::new(&config.source)?),
        TransferMethod::Copy => Arc::new(CopyTransfer::new(crate::config::expand_home(
            &config.source,
        ))),
    })
}
