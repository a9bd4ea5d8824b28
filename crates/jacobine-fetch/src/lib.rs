//! HTTP Fetcher (C4): buffered GET for small JSON feeds and
//! streaming-to-disk download for release archives, both on a timeout.
//!
//! TLS peer verification is disabled: the fetcher only ever talks to a
//! project's own release hosts, and callers verify integrity via the work
//! record's MD5/SHA1 checksums after download rather than via transport
//! (per spec §4.4).

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use jacobine_core::error::FetchError;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: reqwest::header::HeaderMap,
    pub body: Bytes,
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| FetchError {
                url: String::new(),
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Buffered GET with a timeout, used by the producer for small JSON feeds.
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError> {
        let response = tokio::time::timeout(timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError {
                url: url.to_string(),
                message: format!("GET timed out after {}s", timeout.as_secs()),
            })?
            .map_err(|e| FetchError {
                url: url.to_string(),
                message: format!("GET failed: {e}"),
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            return Err(FetchError {
                url: url.to_string(),
                message: format!("non-OK status: {status}"),
            });
        }

        let body = response.bytes().await.map_err(|e| FetchError {
            url: url.to_string(),
            message: format!("failed to read body: {e}"),
        })?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }

    /// Stream `url`'s body into `dest`, bounded by `timeout` (default
    /// [`DEFAULT_DOWNLOAD_TIMEOUT`]). Returns `true` if the file exists on
    /// disk afterwards.
    pub async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        timeout: Option<Duration>,
    ) -> Result<bool, FetchError> {
        let timeout = timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let fut = async {
            let response = self.client.get(url).send().await.map_err(|e| FetchError {
                url: url.to_string(),
                message: format!("GET failed: {e}"),
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError {
                    url: url.to_string(),
                    message: format!("non-OK status: {status}"),
                });
            }

            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| FetchError {
                    url: url.to_string(),
                    message: format!("failed to create destination directory: {e}"),
                })?;
            }

            let mut file = tokio::fs::File::create(dest).await.map_err(|e| FetchError {
                url: url.to_string(),
                message: format!("failed to create {}: {e}", dest.display()),
            })?;

            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| FetchError {
                    url: url.to_string(),
                    message: format!("stream read error: {e}"),
                })?;
                file.write_all(&chunk).await.map_err(|e| FetchError {
                    url: url.to_string(),
                    message: format!("failed writing to {}: {e}", dest.display()),
                })?;
            }
            file.flush().await.map_err(|e| FetchError {
                url: url.to_string(),
                message: format!("failed to flush {}: {e}", dest.display()),
            })?;

            debug!(url, dest = %dest.display(), "download complete");
            Ok(())
        };

        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(())) => Ok(dest.exists()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(url, timeout_secs = timeout.as_secs(), "download timed out");
                Err(FetchError {
                    url: url.to_string(),
                    message: format!("download timed out after {}s", timeout.as_secs()),
                })
            }
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new().expect("failed to build default HTTP client")
    }
}
