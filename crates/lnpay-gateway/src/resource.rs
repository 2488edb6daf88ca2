//! The protected resource: fetching the content behind a target URL.
//!
//! Only reached after authorization succeeds.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

use crate::validation::resolve_public_addr;

/// Maximum upstream response body size (10 MB).
pub const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Upstream status, content type and body of a fetched URL.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("target blocked: {0}")]
    Blocked(String),

    #[error("fetch timed out")]
    Timeout,

    #[error("upstream response too large (max {0} bytes)")]
    TooLarge(usize),

    #[error("fetch failed: {0}")]
    Failed(String),
}

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<FetchedContent, FetchError>> + Send + 'a>>;

pub trait ContentFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a>;
}

/// Fetches over HTTP(S) with redirects disabled, a size cap and the
/// connection pinned to an address checked to be public.
pub struct HttpContentFetcher {
    timeout: Duration,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn fetch_inner(&self, url: &Url) -> Result<FetchedContent, FetchError> {
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::Blocked("target URL must have a host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FetchError::Blocked("target URL has no port".to_string()))?;
        // IPv6 literals come back bracketed from host_str
        let lookup_host = host.trim_start_matches('[').trim_end_matches(']');
        let addr = resolve_public_addr(lookup_host, port).await?;

        // One client per fetch so DNS cannot rebind between check and connect.
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .resolve(lookup_host, addr)
            .build()
            .map_err(|e| FetchError::Failed(format!("building client: {e}")))?;

        let mut response = client.get(url.clone()).send().await.map_err(map_reqwest)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Check Content-Length before reading (fast path)
        if let Some(cl) = response.content_length() {
            if cl > MAX_RESPONSE_BODY_SIZE as u64 {
                return Err(FetchError::TooLarge(MAX_RESPONSE_BODY_SIZE));
            }
        }

        let mut body_buf = Vec::with_capacity(
            response
                .content_length()
                .map(|cl| cl as usize)
                .unwrap_or(8192)
                .min(MAX_RESPONSE_BODY_SIZE),
        );
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest)? {
            if body_buf.len() + chunk.len() > MAX_RESPONSE_BODY_SIZE {
                return Err(FetchError::TooLarge(MAX_RESPONSE_BODY_SIZE));
            }
            body_buf.extend_from_slice(&chunk);
        }

        Ok(FetchedContent {
            status,
            content_type,
            body: Bytes::from(body_buf),
        })
    }
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Failed(e.to_string())
    }
}

impl ContentFetcher for HttpContentFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> FetchFuture<'a> {
        Box::pin(async move {
            // Bounds DNS resolution too, which the client timeout does not cover.
            match tokio::time::timeout(self.timeout, self.fetch_inner(url)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout),
            }
        })
    }
}
