// obsp-common/src/error.rs
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ObspError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("DownloadError: Failed to download '{url}': {cause}")]
    DownloadError { url: String, cause: String },

    #[error("Package Not Found: {0}")]
    PackageNotFound(String),

    #[error("Installation of '{target}' failed{}", .exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    InstallError {
        target: String,
        exit_code: Option<i32>,
    },

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Extraction Error: {0}")]
    Extraction(String),

    #[error("Post-install Error: {0}")]
    PostInstall(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl ObspError {
    /// Extraction and post-install failures only cost the artifact they belong
    /// to; everything else aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ObspError::Extraction(_) | ObspError::PostInstall(_))
    }
}

impl From<std::io::Error> for ObspError {
    fn from(err: std::io::Error) -> Self {
        ObspError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for ObspError {
    fn from(err: reqwest::Error) -> Self {
        ObspError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for ObspError {
    fn from(err: serde_json::Error) -> Self {
        ObspError::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ObspError>;
