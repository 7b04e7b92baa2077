// obsp-common/src/cache.rs
// Download cache. Entries are keyed by file name and never deleted here; they
// double as the only rollback mechanism between runs.

use std::fs;
use std::path::{Path, PathBuf};

use super::error::{ObspError, Result};
use crate::Config;

/// A completed download living in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub filename: String,
    pub path: PathBuf,
}

/// Cache struct to manage cache operations
#[derive(Debug, Clone)]
pub struct Cache {
    cache_dir: PathBuf,
}

impl Cache {
    /// Create a new Cache using the config's cache_dir
    pub fn new(config: &Config) -> Result<Self> {
        Self::at(config.cache_dir())
    }

    /// Create a cache rooted at an explicit directory.
    pub fn at(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                ObspError::Io(std::sync::Arc::new(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create cache directory {}: {}", dir.display(), e),
                )))
            })?;
        }
        Ok(Self {
            cache_dir: dir.to_path_buf(),
        })
    }

    /// Gets the cache directory path
    pub fn get_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn entry_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(filename)
    }

    /// Where an in-flight download of `filename` accumulates.
    pub fn partial_path(&self, filename: &str) -> PathBuf {
        self.cache_dir.join(format!(".{filename}.part"))
    }

    /// Returns the entry if a completed download named `filename` exists.
    pub fn lookup(&self, filename: &str) -> Option<CacheEntry> {
        let path = self.entry_path(filename);
        if path.is_file() {
            tracing::debug!("Cache hit for {}", path.display());
            Some(CacheEntry {
                filename: filename.to_string(),
                path,
            })
        } else {
            None
        }
    }

    /// Moves a finished partial download into its final place.
    pub fn commit(&self, filename: &str) -> Result<CacheEntry> {
        let partial = self.partial_path(filename);
        let path = self.entry_path(filename);
        fs::rename(&partial, &path).map_err(|e| {
            ObspError::Generic(format!(
                "Failed to move {} to {}: {}",
                partial.display(),
                path.display(),
                e
            ))
        })?;
        tracing::debug!("Committed cache entry {}", path.display());
        Ok(CacheEntry {
            filename: filename.to_string(),
            path,
        })
    }
}
