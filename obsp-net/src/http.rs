// obsp-net/src/http.rs
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use obsp_common::error::{ObspError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RANGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Longest silence tolerated between two reads of a body.
const READ_TIMEOUT_SECS: u64 = 120;
const USER_AGENT_STRING: &str = "obsp provisioner (Rust)";

/// What a transport did with the destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Body written; `resumed` when it was appended after existing bytes.
    Written { resumed: bool, bytes: u64 },
    /// The server had nothing past the requested offset.
    AlreadyComplete,
}

/// Moves bytes from a URL into a local file.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Fetches `url` from byte `offset` onward into `dest`. With a non-zero
    /// offset the implementation appends when the server honours the range
    /// and rewrites `dest` from scratch when it does not.
    async fn download(&self, url: &str, offset: u64, dest: &Path) -> Result<TransferOutcome>;
}

pub fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| ObspError::Generic(format!("Failed to build HTTP client: {e}")))
}

/// HTTPS transport with `Range` continuation.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }
}

fn download_error(url: &str, cause: impl ToString) -> ObspError {
    ObspError::DownloadError {
        url: url.to_string(),
        cause: cause.to_string(),
    }
}

fn progress_bar(url: &str, total: Option<u64>, position: u64) -> ProgressBar {
    let name = url.rsplit('/').next().unwrap_or(url).to_string();
    let pb = match total {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    let style = ProgressStyle::with_template(
        "{msg:30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    pb.set_style(style);
    pb.set_message(name);
    pb.set_position(position);
    pb
}

impl Transport for HttpTransport {
    async fn download(&self, url: &str, offset: u64, dest: &Path) -> Result<TransferOutcome> {
        let mut request = self.client.get(url);
        if offset > 0 {
            debug!("Requesting {} from byte {}", url, offset);
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await.map_err(|e| {
            debug!("HTTP request failed for {url}: {e}");
            download_error(url, format!("HTTP request failed: {e}"))
        })?;
        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, url);

        if offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!("Server reports nothing past byte {offset} for {url}");
            return Ok(TransferOutcome::AlreadyComplete);
        }
        if !status.is_success() {
            error!("HTTP error {} for URL {}", status, url);
            return Err(match status {
                StatusCode::NOT_FOUND => download_error(url, "Resource not found (404)"),
                StatusCode::FORBIDDEN => download_error(url, "Access forbidden (403)"),
                _ => download_error(url, format!("HTTP status {status}")),
            });
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !resumed {
            debug!("Server ignored range request for {url}, restarting from zero");
        }
        let start = if resumed { offset } else { 0 };
        let total = response.content_length().map(|len| len + start);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(dest)
            .await
            .map_err(|e| {
                download_error(url, format!("Failed to open {}: {}", dest.display(), e))
            })?;

        let pb = progress_bar(url, total, start);
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| download_error(url, format!("Failed to read body: {e}")))?;
            file.write_all(&chunk).await.map_err(|e| {
                download_error(url, format!("Failed to write {}: {}", dest.display(), e))
            })?;
            written += chunk.len() as u64;
            pb.inc(chunk.len() as u64);
        }
        file.flush().await.map_err(|e| {
            download_error(url, format!("Failed to flush {}: {}", dest.display(), e))
        })?;
        pb.finish_and_clear();

        debug!(
            "Wrote {} byte(s) of {} to {} (resumed: {})",
            written,
            url,
            dest.display(),
            resumed
        );
        Ok(TransferOutcome::Written {
            resumed,
            bytes: written,
        })
    }
}
