//! Census archive downloader with a local cache
//!
//! Archives are cached under `{cache_dir}/downloads`, keyed by a SHA-256 of
//! the URL. A cached copy is reused unless the server reports a newer
//! `Last-Modified` than the file's mtime. Timeouts are retried up to three
//! attempts; a 404 is reported as [`DownloadError::NotFound`] so callers can
//! treat absent optional inputs as skips.

use crate::utils::retry::{retry_transient, RetryPolicy, Transient};
use chrono::{DateTime, Utc};
use rdpkg_common::config::PipelineConfig;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("rdpkg/", env!("CARGO_PKG_VERSION"));

/// Download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not published: {0}")]
    NotFound(String),

    #[error("HTTP {0} for {1}")]
    Http(u16, String),

    #[error("Offline and not cached: {0}")]
    NotCached(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Transient for DownloadError {
    fn is_transient(&self) -> bool {
        matches!(self, DownloadError::Timeout(_))
    }
}

fn request_error(url: &str, err: reqwest::Error) -> DownloadError {
    if err.is_timeout() {
        DownloadError::Timeout(url.to_string())
    } else {
        DownloadError::Network(format!("{}: {}", url, err))
    }
}

/// Cache-backed archive downloader
pub struct CensusDownloader {
    http_client: reqwest::Client,
    cache_dir: PathBuf,
    offline: bool,
    retry: RetryPolicy,
}

impl CensusDownloader {
    pub fn new(config: &PipelineConfig) -> Result<Self, DownloadError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.download_timeout)
            .build()
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            cache_dir: config.cache_dir.clone(),
            offline: config.offline,
            retry: RetryPolicy::default(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local cache location for `url`
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let key: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        let file_name = url.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("download");
        self.cache_dir
            .join("downloads")
            .join(format!("{}_{}", key, file_name))
    }

    /// Return a local copy of `url`, downloading when missing or stale
    pub async fn fetch(&self, url: &str) -> Result<PathBuf, DownloadError> {
        let cached = self.cache_path(url);

        if self.offline {
            return if cached.exists() {
                debug!(url = %url, "Offline: using cached archive");
                Ok(cached)
            } else {
                Err(DownloadError::NotCached(url.to_string()))
            };
        }

        if cached.exists() {
            match self.is_stale(url, &cached).await {
                Ok(false) => {
                    debug!(url = %url, path = %cached.display(), "Cache is current");
                    return Ok(cached);
                }
                Ok(true) => info!(url = %url, "Cached archive is stale, downloading"),
                Err(e) => {
                    warn!(url = %url, error = %e, "Freshness check failed, using cached archive");
                    return Ok(cached);
                }
            }
        }

        retry_transient(url, self.retry, || self.download(url, &cached)).await?;
        Ok(cached)
    }

    /// Compare the server's `Last-Modified` with the cached file's mtime
    async fn is_stale(&self, url: &str, cached: &Path) -> Result<bool, DownloadError> {
        let response = retry_transient(url, self.retry, || async {
            self.http_client
                .head(url)
                .send()
                .await
                .map_err(|e| request_error(url, e))
        })
        .await?;

        let remote = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let Some(remote) = remote else {
            debug!(url = %url, "No Last-Modified header, keeping cache");
            return Ok(false);
        };

        let local: DateTime<Utc> = std::fs::metadata(cached)?.modified()?.into();
        Ok(remote > local)
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
        info!(url = %url, "Downloading");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DownloadError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(DownloadError::Http(status.as_u16(), url.to_string()));
        }

        let body = response.bytes().await.map_err(|e| request_error(url, e))?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = destination.with_extension("part");
        tokio::fs::write(&partial, &body).await?;
        tokio::fs::rename(&partial, destination).await?;

        info!(url = %url, bytes = body.len(), "Download complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader(dir: &Path, offline: bool) -> CensusDownloader {
        let mut config = PipelineConfig::with_cache_dir(dir);
        config.offline = offline;
        CensusDownloader::new(&config).unwrap()
    }

    #[test]
    fn test_cache_path_is_stable_and_keyed_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), true);
        let a = d.cache_path("https://example.test/x/al2020.pl.zip");
        let b = d.cache_path("https://example.test/y/al2020.pl.zip");
        assert_eq!(a, d.cache_path("https://example.test/x/al2020.pl.zip"));
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with("_al2020.pl.zip"));
        assert!(a.starts_with(dir.path().join("downloads")));
    }

    #[tokio::test]
    async fn test_offline_uses_cache_or_fails() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(dir.path(), true);
        let url = "https://example.test/tl_2020_44_vtd20.zip";

        assert!(matches!(d.fetch(url).await, Err(DownloadError::NotCached(_))));

        let cached = d.cache_path(url);
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"zip").unwrap();
        assert_eq!(d.fetch(url).await.unwrap(), cached);
    }

    #[test]
    fn test_only_timeouts_are_transient() {
        assert!(DownloadError::Timeout("u".into()).is_transient());
        assert!(!DownloadError::NotFound("u".into()).is_transient());
        assert!(!DownloadError::Http(500, "u".into()).is_transient());
    }
}
