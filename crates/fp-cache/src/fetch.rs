//! Network retrieval.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fp_core::config::CacheConfig;
use fp_core::{Error, Result};
use reqwest::header::{HeaderValue, RANGE};
use reqwest::{Client, StatusCode};

/// Inclusive byte range, as used by HTTP `Range` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Last byte (inclusive); `None` reads to the end.
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// `start..` to the end of the resource.
    pub fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Value for an HTTP `Range` header.
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Cut this range out of a whole body, clamping to its length.
    pub fn slice(&self, body: &Bytes) -> Bytes {
        let len = body.len() as u64;
        let start = self.start.min(len);
        let end = self.end.map_or(len, |e| e.saturating_add(1).min(len));
        if start >= end {
            return Bytes::new();
        }
        body.slice(start as usize..end as usize)
    }
}

/// Retrieves bytes for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the whole resource, or just `range` of it.
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes>;
}

/// Range-capable HTTP GET fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher with the configured user agent and timeout.
    pub fn new(config: &CacheConfig) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with settings: {}", e);
                Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<Bytes> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            let value = HeaderValue::from_str(&range.header_value())
                .map_err(|e| Error::fetch(url, e))?;
            request = request.header(RANGE, value);
        }

        let response = request.send().await.map_err(|e| Error::fetch(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(url, format!("unexpected status {status}")));
        }

        let body = response.bytes().await.map_err(|e| Error::fetch(url, e))?;
        tracing::trace!(url, status = %status, bytes = body.len(), "Fetched");

        // A server may ignore the Range header and send the whole body.
        match range {
            Some(range) if status == StatusCode::OK => Ok(range.slice(&body)),
            _ => Ok(body),
        }
    }
}
