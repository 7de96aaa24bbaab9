//! Reciter directory with an on-disk fallback.
//!
//! The listing is fetched over HTTP. Every successful fetch is written to
//! `<data_dir>/reciters.json`; when the network is unavailable the last
//! written copy is served instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{LibraryError, Result};
use crate::models::{Reciter, ReciterId};

/// File name of the cached listing inside the data directory.
pub const RECITER_CACHE_FILE: &str = "reciters.json";

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
#[serde(untagged)]
enum ListingPayload {
    Bare(Vec<Reciter>),
    Wrapped { reciters: Vec<Reciter> },
}

impl ListingPayload {
    fn into_reciters(self) -> Vec<Reciter> {
        match self {
            ListingPayload::Bare(list) => list,
            ListingPayload::Wrapped { reciters } => reciters,
        }
    }
}

/// Where a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingSource {
    Remote,
    Cached,
}

#[derive(Debug, Clone)]
pub struct ReciterListing {
    pub reciters: Vec<Reciter>,
    pub source: ListingSource,
}

impl ReciterListing {
    pub fn get(&self, id: ReciterId) -> Option<&Reciter> {
        self.reciters.iter().find(|r| r.id == id)
    }

    /// The reciter flagged as default, or the first one listed.
    pub fn default_reciter(&self) -> Option<&Reciter> {
        self.reciters
            .iter()
            .find(|r| r.is_default)
            .or_else(|| self.reciters.first())
    }
}

/// Parse a listing, dropping entries that fail validation.
pub fn parse_listing(bytes: &[u8]) -> Result<Vec<Reciter>> {
    let payload: ListingPayload = serde_json::from_slice(bytes)?;
    let reciters = payload
        .into_reciters()
        .into_iter()
        .filter(|r| match r.validate() {
            Ok(()) => true,
            Err(reason) => {
                warn!(reciter = %r.id, reason = %reason, "Skipping invalid reciter entry");
                false
            }
        })
        .collect();
    Ok(reciters)
}

pub struct ReciterDirectory {
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    url: String,
    cache_path: PathBuf,
    user_agent: String,
}

impl ReciterDirectory {
    pub fn new(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        url: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            http,
            fs,
            url: url.into(),
            cache_path: data_dir.into().join(RECITER_CACHE_FILE),
            user_agent: user_agent.into(),
        }
    }

    pub fn cache_path(&self) -> &PathBuf {
        &self.cache_path
    }

    /// Fetch the listing, falling back to the cached copy.
    ///
    /// Returns `LibraryError::Network` when the fetch fails and nothing is
    /// cached.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn load(&self) -> Result<ReciterListing> {
        match self.fetch_remote().await {
            Ok(reciters) => {
                info!(count = reciters.len(), "Fetched reciter directory");
                return Ok(ReciterListing {
                    reciters,
                    source: ListingSource::Remote,
                });
            }
            Err(e) => warn!(error = %e, "Reciter directory fetch failed, trying cached copy"),
        }

        match self.load_cached().await {
            Some(reciters) => {
                info!(count = reciters.len(), "Using cached reciter directory");
                Ok(ReciterListing {
                    reciters,
                    source: ListingSource::Cached,
                })
            }
            None => Err(LibraryError::Network(format!(
                "reciter directory unavailable at {} and no cached copy exists",
                self.url
            ))),
        }
    }

    async fn fetch_remote(&self) -> Result<Vec<Reciter>> {
        let request = HttpRequest::get(self.url.clone())
            .user_agent(self.user_agent.clone())
            .header("Accept", "application/json")
            .timeout(FETCH_TIMEOUT);

        let response = self.http.execute(request).await?;
        if !response.is_success() {
            return Err(LibraryError::Network(format!(
                "reciter directory returned HTTP {}",
                response.status
            )));
        }

        let reciters = parse_listing(&response.body)?;
        self.store_cached(response.body.clone()).await;
        Ok(reciters)
    }

    async fn store_cached(&self, body: Bytes) {
        if let Some(parent) = self.cache_path.parent() {
            if let Err(e) = self.fs.create_dir_all(parent).await {
                warn!(error = %e, "Cannot create data directory for reciter cache");
                return;
            }
        }
        match self.fs.write_file(&self.cache_path, body).await {
            Ok(()) => debug!(path = %self.cache_path.display(), "Reciter directory cached"),
            Err(e) => warn!(error = %e, "Failed to cache reciter directory"),
        }
    }

    async fn load_cached(&self) -> Option<Vec<Reciter>> {
        match self.fs.exists(&self.cache_path).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(error = %e, "Cannot check reciter cache");
                return None;
            }
        }

        let bytes = match self.fs.read_file(&self.cache_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Cannot read reciter cache");
                return None;
            }
        };

        match parse_listing(&bytes) {
            Ok(reciters) => Some(reciters),
            Err(e) => {
                warn!(error = %e, "Cached reciter directory is corrupt");
                None
            }
        }
    }
}
