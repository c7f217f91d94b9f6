//! HTTP transport seam (spec.md §9, "duck-typed session objects" redesign
//! flag). One trait, one implementation, two named handles built from it —
//! `control_client` for the Playlist Fetcher and cover download (serial,
//! low-volume), `segment_client` cloned into every concurrent segment task —
//! mirroring the teacher's `ClientPool` control/segment split without
//! inventing a second transport.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::error::EngineError;

/// The outcome of a single GET, stripped down to what callers branch on.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam so the Playlist/Segment Fetchers can be driven by a
/// canned in-memory fake in tests instead of a real `reqwest::Client`.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchResponse, EngineError>;
}

/// Production `HttpFetcher`, backed by a configured `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(
        headers: HeaderMap,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout);
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| EngineError::InvalidInput(format!("invalid proxy '{proxy_url}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<FetchResponse, EngineError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(FetchResponse { status, body })
    }
}
