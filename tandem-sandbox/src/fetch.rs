//! Where provisioning artifacts come from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::manifest::CachePolicy;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The origin answered with a non-success status.
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve `source`, which is relative to the fetcher's base unless it
    /// is already absolute.
    async fn fetch(&self, source: &str, cache: CachePolicy) -> Result<Vec<u8>, FetchError>;
}

/// Fetches over HTTP(S) relative to a base URL.
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::default(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resolve(&self, source: &str) -> String {
        if source.contains("://") {
            return source.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            source.trim_start_matches("./")
        )
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &str, cache: CachePolicy) -> Result<Vec<u8>, FetchError> {
        let url = self.resolve(source);
        let mut request = self.client.get(&url);
        for (name, value) in cache.headers() {
            request = request.header(*name, *value);
        }
        log::debug!("GET {url} ({cache:?})");

        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.clone(),
            message: e.to_string(),
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await.map_err(transport)?;
        log::trace!("fetched {} bytes from {url}", body.len());
        Ok(body.to_vec())
    }
}

/// Reads artifacts from a local directory. Nothing is cached, so the cache
/// policy has no effect.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, source: &str, _cache: CachePolicy) -> Result<Vec<u8>, FetchError> {
        let path = self.root.join(source.trim_start_matches("./"));
        tokio::fs::read(&path)
            .await
            .map_err(|source| FetchError::Io { path, source })
    }
}
