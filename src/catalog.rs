//! Remote catalog service: category lists, word/gloss tables, hierarchy
//! edges, and per-category image archives.
//!
//! All text endpoints return plain text. Parsing is split into pure functions
//! ([`parse_synset_list`], [`parse_id_table`], [`parse_hyponyms`]) so the
//! formats are tested without a network; [`HttpCatalog`] only fetches.
//!
//! ## Endpoints
//!
//! ```text
//! {base}/api/text/imagenet.synset.obtain_synset_list       ids, last two lines are trailer
//! {base}/archive/words.txt                                  "<id> <words...>"
//! {base}/archive/gloss.txt                                  "<id> <definition...>"
//! {base}/api/text/wordnet.structure.hyponym?wnid=<id>       header line, then "-<child>" lines
//! {base}/download/synset?wnid=..&username=..&accesskey=..&release=..   tar stream
//! ```

use crate::config::RemoteConfig;
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GET {url} returned {status}")]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Catalog request failed: {0}")]
    Other(String),
}

/// Read access to the remote catalog.
///
/// [`HttpCatalog`] is the production implementation; tests substitute an
/// in-memory one.
pub trait Catalog: Send + Sync {
    /// Every category id in the catalog.
    fn synset_list(&self) -> Result<Vec<String>, CatalogError>;

    /// Category id → human-readable words.
    fn words(&self) -> Result<BTreeMap<String, String>, CatalogError>;

    /// Category id → definition text.
    fn definitions(&self) -> Result<BTreeMap<String, String>, CatalogError>;

    /// Direct children of a category in the hierarchy.
    fn hyponyms(&self, synset: &str) -> Result<Vec<String>, CatalogError>;

    /// Tar stream holding every image of a category.
    fn open_archive(&self, synset: &str) -> Result<Box<dyn Read + Send>, CatalogError>;
}

/// Category ids from the list endpoint. The last two lines are a trailer,
/// not data, and are dropped.
pub fn parse_synset_list(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let keep = lines.len().saturating_sub(2);
    lines[..keep]
        .iter()
        .map(|l| l.trim_end())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// `id rest-of-line` records, one per line. The rest of the line is
/// re-joined with single spaces.
pub fn parse_id_table(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let rest = fields.collect::<Vec<_>>().join(" ");
            Some((id.to_string(), rest))
        })
        .collect()
}

/// Child ids from the hyponym endpoint. The first line echoes the queried id
/// and is skipped; leading `-` markers are stripped.
pub fn parse_hyponyms(text: &str) -> Vec<String> {
    text.lines()
        .skip(1)
        .map(|l| l.trim_end().trim_start_matches('-'))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Blocking HTTP client for the catalog endpoints.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: reqwest::blocking::Client,
    remote: RemoteConfig,
}

impl HttpCatalog {
    pub fn new(remote: RemoteConfig) -> Result<Self, CatalogError> {
        // Archive streams for large categories run to gigabytes; the timeout
        // covers the whole body.
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60 * 60))
            .user_agent(concat!("imagenet-cache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, remote })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.remote.base_url.trim_end_matches('/'), path)
    }

    /// Full archive URL for a category, credentials included.
    pub fn archive_url(&self, synset: &str) -> Result<reqwest::Url, CatalogError> {
        let url = self.url("download/synset");
        reqwest::Url::parse_with_params(
            &url,
            [
                ("wnid", synset),
                ("username", self.remote.username.as_str()),
                ("accesskey", self.remote.access_key.as_str()),
                ("release", self.remote.release.as_str()),
            ],
        )
        .map_err(|e| CatalogError::InvalidUrl {
            url,
            reason: e.to_string(),
        })
    }

    fn get(&self, url: reqwest::Url) -> Result<reqwest::blocking::Response, CatalogError> {
        debug!(%url, "GET");
        let response = self.client.get(url.clone()).send()?;
        if !response.status().is_success() {
            return Err(CatalogError::BadStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }

    fn get_text(&self, path: &str) -> Result<String, CatalogError> {
        let url = self.url(path);
        let parsed = reqwest::Url::parse(&url).map_err(|e| CatalogError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(self.get(parsed)?.text()?)
    }
}

impl Catalog for HttpCatalog {
    fn synset_list(&self) -> Result<Vec<String>, CatalogError> {
        let text = self.get_text("api/text/imagenet.synset.obtain_synset_list")?;
        Ok(parse_synset_list(&text))
    }

    fn words(&self) -> Result<BTreeMap<String, String>, CatalogError> {
        Ok(parse_id_table(&self.get_text("archive/words.txt")?))
    }

    fn definitions(&self) -> Result<BTreeMap<String, String>, CatalogError> {
        Ok(parse_id_table(&self.get_text("archive/gloss.txt")?))
    }

    fn hyponyms(&self, synset: &str) -> Result<Vec<String>, CatalogError> {
        let url = self.url("api/text/wordnet.structure.hyponym");
        let parsed = reqwest::Url::parse_with_params(&url, [("wnid", synset)]).map_err(|e| {
            CatalogError::InvalidUrl {
                url,
                reason: e.to_string(),
            }
        })?;
        Ok(parse_hyponyms(&self.get(parsed)?.text()?))
    }

    fn open_archive(&self, synset: &str) -> Result<Box<dyn Read + Send>, CatalogError> {
        let url = self.archive_url(synset)?;
        Ok(Box::new(self.get(url)?))
    }
}
