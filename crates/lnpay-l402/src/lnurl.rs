//! LNURL-pay client (LUD-06 / LUD-16, plus the LUD-21 verify endpoint).
//!
//! Resolution and invoice request are two separate calls: the sendable
//! range must be known before the price can be checked, and an
//! out-of-range price must fail without touching the network.

use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::constants::{LNURLP_WELL_KNOWN, MAX_LNURL_BODY_BYTES, PAY_REQUEST_TAG};
use crate::error::LnurlError;
use crate::types::Preimage;

/// Status and body of a completed GET.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Failed(String),
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>>;

/// Outbound HTTP GET used by [`LnurlClient`].
pub trait HttpTransport: Send + Sync {
    fn get<'a>(&'a self, url: &'a Url) -> TransportFuture<'a>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_body_bytes: MAX_LNURL_BODY_BYTES,
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn get<'a>(&'a self, url: &'a Url) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut response = self.client.get(url.clone()).send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Failed(e.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let mut body = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| TransportError::Failed(format!("reading body: {e}")))?
            {
                if body.len() + chunk.len() > self.max_body_bytes {
                    return Err(TransportError::Failed(format!(
                        "response body exceeds {} bytes",
                        self.max_body_bytes
                    )));
                }
                body.extend_from_slice(&chunk);
            }

            Ok(TransportResponse {
                status,
                body: Bytes::from(body),
            })
        })
    }
}

/// A Lightning Address (`user@domain`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightningAddress {
    user: String,
    domain: String,
}

impl LightningAddress {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `https://{domain}/.well-known/lnurlp/{user}`
    pub fn well_known_url(&self) -> Result<Url, LnurlError> {
        Url::parse(&format!(
            "https://{}{}{}",
            self.domain, LNURLP_WELL_KNOWN, self.user
        ))
        .map_err(|e| LnurlError::InvalidAddressFormat(format!("{self}: {e}")))
    }
}

impl FromStr for LightningAddress {
    type Err = LnurlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LnurlError::InvalidAddressFormat(s.to_string());
        let parts: Vec<&str> = s.trim().split('@').collect();
        let [user, domain] = parts.as_slice() else {
            return Err(invalid());
        };
        if user.is_empty() || domain.is_empty() {
            return Err(invalid());
        }
        let url_breaking = |c: char| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '\\');
        if user.contains(url_breaking) || domain.contains(url_breaking) {
            return Err(invalid());
        }
        Ok(Self {
            user: user.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }
}

impl fmt::Display for LightningAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.domain)
    }
}

/// Validated LNURL-pay metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayRequestMetadata {
    pub callback: Url,
    pub min_sendable: u64,
    pub max_sendable: u64,
}

impl PayRequestMetadata {
    pub fn accepts(&self, amount_msat: u64) -> bool {
        (self.min_sendable..=self.max_sendable).contains(&amount_msat)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPayRequest {
    callback: String,
    min_sendable: u64,
    max_sendable: u64,
    #[serde(default)]
    tag: Option<String>,
}

impl TryFrom<RawPayRequest> for PayRequestMetadata {
    type Error = LnurlError;

    fn try_from(raw: RawPayRequest) -> Result<Self, Self::Error> {
        if let Some(tag) = raw.tag.as_deref() {
            if tag != PAY_REQUEST_TAG {
                return Err(LnurlError::MalformedResponse(format!("unexpected tag {tag}")));
            }
        }
        let callback = Url::parse(&raw.callback)
            .map_err(|e| LnurlError::MalformedResponse(format!("callback: {e}")))?;
        if !matches!(callback.scheme(), "https" | "http") {
            return Err(LnurlError::MalformedResponse(format!(
                "callback scheme {}",
                callback.scheme()
            )));
        }
        if raw.min_sendable > raw.max_sendable {
            return Err(LnurlError::MalformedResponse(format!(
                "minSendable {} exceeds maxSendable {}",
                raw.min_sendable, raw.max_sendable
            )));
        }
        Ok(Self {
            callback,
            min_sendable: raw.min_sendable,
            max_sendable: raw.max_sendable,
        })
    }
}

/// Invoice returned by an LNURL-pay callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    /// Raw bolt11 string; decode it with [`crate::invoice::decode`].
    pub pr: String,
    /// LUD-21 verify URL, when the service offers one.
    pub verify: Option<Url>,
}

#[derive(Deserialize)]
struct RawCallbackResponse {
    #[serde(default)]
    pr: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    verify: Option<String>,
}

/// Answer of a LUD-21 verify endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyStatus {
    pub settled: bool,
    pub preimage: Option<Preimage>,
}

#[derive(Deserialize)]
struct RawVerifyResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    preimage: Option<String>,
}

/// LNURL-pay client. Every outbound call is bounded by `timeout`.
#[derive(Clone)]
pub struct LnurlClient {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl LnurlClient {
    pub fn new(transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        match tokio::time::timeout(self.timeout, self.transport.get(url)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Resolve a Lightning Address into its pay request metadata.
    pub async fn resolve_address(&self, address: &str) -> Result<PayRequestMetadata, LnurlError> {
        let address: LightningAddress = address.parse()?;
        let url = address.well_known_url()?;
        tracing::debug!(%address, %url, "resolving lightning address");

        let response = self.get(&url).await.map_err(|e| match e {
            TransportError::Timeout => LnurlError::UpstreamTimeout,
            TransportError::Failed(msg) => LnurlError::Transport(msg),
        })?;

        if response.status != 200 {
            let body = String::from_utf8_lossy(&response.body).into_owned();
            tracing::warn!(
                %address,
                status = response.status,
                body = %body,
                "non-200 response resolving lightning address"
            );
            return Err(LnurlError::ResolutionFailed {
                status: response.status,
                body,
            });
        }

        let raw: RawPayRequest = serde_json::from_slice(&response.body)
            .map_err(|e| LnurlError::MalformedResponse(e.to_string()))?;
        let metadata = PayRequestMetadata::try_from(raw)?;

        tracing::debug!(
            %address,
            callback = %metadata.callback,
            min_sendable = metadata.min_sendable,
            max_sendable = metadata.max_sendable,
            "resolved lightning address"
        );
        Ok(metadata)
    }

    /// Request an invoice for `amount_msat` from a resolved callback.
    pub async fn request_invoice(
        &self,
        metadata: &PayRequestMetadata,
        amount_msat: u64,
    ) -> Result<Invoice, LnurlError> {
        if !metadata.accepts(amount_msat) {
            return Err(LnurlError::AmountOutOfRange {
                amount_msat,
                min_sendable: metadata.min_sendable,
                max_sendable: metadata.max_sendable,
            });
        }

        let mut url = metadata.callback.clone();
        url.query_pairs_mut()
            .append_pair("amount", &amount_msat.to_string());

        let response = self.get(&url).await.map_err(|e| match e {
            TransportError::Timeout => LnurlError::UpstreamTimeout,
            TransportError::Failed(msg) => LnurlError::CallbackFailed(msg),
        })?;

        if response.status != 200 {
            tracing::warn!(
                status = response.status,
                body = %String::from_utf8_lossy(&response.body),
                "non-200 response from invoice callback"
            );
            return Err(LnurlError::CallbackFailed(format!(
                "status {}",
                response.status
            )));
        }

        let raw: RawCallbackResponse = serde_json::from_slice(&response.body)
            .map_err(|e| LnurlError::MalformedCallbackResponse(e.to_string()))?;

        let pr = match raw.pr.filter(|pr| !pr.trim().is_empty()) {
            Some(pr) => pr,
            None => {
                let reason = match (raw.status.as_deref(), raw.reason) {
                    (Some(status), Some(reason)) => format!("{status}: {reason}"),
                    (_, Some(reason)) => reason,
                    _ => "missing pr".to_string(),
                };
                return Err(LnurlError::MalformedCallbackResponse(reason));
            }
        };

        let verify = match raw.verify.as_deref() {
            Some(v) => match Url::parse(v) {
                Ok(u) => Some(u),
                Err(e) => {
                    tracing::warn!(verify = %v, error = %e, "ignoring unparseable verify url");
                    None
                }
            },
            None => None,
        };
        tracing::debug!(verify = ?verify.as_ref().map(Url::as_str), "received invoice");

        Ok(Invoice { pr, verify })
    }

    /// Poll a LUD-21 verify URL for settlement.
    pub async fn check_verify(&self, verify_url: &Url) -> Result<VerifyStatus, LnurlError> {
        let response = self.get(verify_url).await.map_err(|e| match e {
            TransportError::Timeout => LnurlError::UpstreamTimeout,
            TransportError::Failed(msg) => LnurlError::CallbackFailed(msg),
        })?;

        if response.status != 200 {
            return Err(LnurlError::CallbackFailed(format!(
                "verify status {}",
                response.status
            )));
        }

        let raw: RawVerifyResponse = serde_json::from_slice(&response.body)
            .map_err(|e| LnurlError::MalformedCallbackResponse(e.to_string()))?;

        if raw.status.as_deref() == Some("ERROR") {
            return Err(LnurlError::MalformedCallbackResponse(
                raw.reason.unwrap_or_else(|| "verify returned ERROR".to_string()),
            ));
        }

        let preimage = match raw.preimage.as_deref() {
            Some(p) if !p.is_empty() => Some(p.parse::<Preimage>().map_err(|_| {
                LnurlError::MalformedCallbackResponse("preimage is not 32 hex bytes".to_string())
            })?),
            _ => None,
        };

        Ok(VerifyStatus {
            settled: raw.settled,
            preimage,
        })
    }
}
