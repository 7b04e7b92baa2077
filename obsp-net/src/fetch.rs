// obsp-net/src/fetch.rs
use obsp_common::cache::{Cache, CacheEntry};
use obsp_common::error::{ObspError, Result};
use obsp_common::validation::validate_url;
use tracing::debug;

use crate::http::{TransferOutcome, Transport};

/// Downloads artifacts into the cache, at most once per file name.
pub struct ArtifactFetcher<T: Transport> {
    transport: T,
    cache: Cache,
}

impl<T: Transport> ArtifactFetcher<T> {
    pub fn new(transport: T, cache: Cache) -> Self {
        Self { transport, cache }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the cache entry for `filename`, downloading `url` only when no
    /// completed entry exists. A leftover partial download is continued.
    pub async fn fetch(&self, url: &str, filename: &str) -> Result<CacheEntry> {
        if let Some(entry) = self.cache.lookup(filename) {
            debug!("Using cached download: {}", entry.path.display());
            return Ok(entry);
        }
        validate_url(url).map_err(|e| as_download_error(url, e))?;

        let partial = self.cache.partial_path(filename);
        let offset = match std::fs::metadata(&partial) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        debug!(
            "Fetching {} into {} (resume offset {})",
            url,
            partial.display(),
            offset
        );

        match self
            .transport
            .download(url, offset, &partial)
            .await
            .map_err(|e| as_download_error(url, e))?
        {
            TransferOutcome::Written { resumed, bytes } => {
                debug!("Transferred {bytes} byte(s) from {url} (resumed: {resumed})");
            }
            TransferOutcome::AlreadyComplete => {
                debug!("Partial download of {url} was already complete");
            }
        }

        self.cache
            .commit(filename)
            .map_err(|e| as_download_error(url, e))
    }
}

fn as_download_error(url: &str, err: ObspError) -> ObspError {
    match err {
        e @ ObspError::DownloadError { .. } => e,
        other => ObspError::DownloadError {
            url: url.to_string(),
            cause: other.to_string(),
        },
    }
}
