//! Challenges and the L402 header formats.
//!
//! - Challenge: `WWW-Authenticate: L402 token="<token>", invoice="<bolt11>"`
//! - Retry: `Authorization: L402 <token>:<preimage-or-proof>`

use serde::{Deserialize, Serialize};

use crate::constants::{L402_SCHEME, LSAT_SCHEME};
use crate::error::AuthError;
use crate::types::{PaymentHash, Preimage};

/// A priced request for payment, keyed by its invoice's payment hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub payment_hash: PaymentHash,
    pub price_msat: u64,
    pub resource_path: String,
    pub issued_at: u64,
    pub expires_at: u64,
    /// Bolt11 invoice the client must pay.
    pub invoice: String,
    /// Unix time after which the invoice can no longer be paid.
    #[serde(default)]
    pub invoice_expires_at: u64,
    /// LUD-21 verify URL for settlement polling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_url: Option<String>,
}

impl Challenge {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the invoice can still be paid at `now`.
    pub fn is_payable(&self, now: u64) -> bool {
        now < self.invoice_expires_at
    }
}

/// `L402 token="<token>", invoice="<invoice>"`
pub fn www_authenticate(token: &str, invoice: &str) -> String {
    format!("{L402_SCHEME} token=\"{token}\", invoice=\"{invoice}\"")
}

/// Token and invoice parsed from a `WWW-Authenticate` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeHeader {
    pub token: String,
    pub invoice: String,
}

fn strip_scheme(value: &str) -> Option<&str> {
    let value = value.trim();
    let (scheme, rest) = value.split_once(' ')?;
    (scheme.eq_ignore_ascii_case(L402_SCHEME) || scheme.eq_ignore_ascii_case(LSAT_SCHEME))
        .then(|| rest.trim())
}

/// Extract a quoted parameter value like `key="value"`.
fn quoted_param(params: &str, key: &str) -> Option<String> {
    params.split(',').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        if !k.trim().eq_ignore_ascii_case(key) {
            return None;
        }
        let v = v.trim();
        v.strip_prefix('"')?.strip_suffix('"').map(str::to_string)
    })
}

/// Parse a challenge header. `macaroon=` is accepted as an alias for `token=`.
pub fn parse_www_authenticate(value: &str) -> Option<ChallengeHeader> {
    let params = strip_scheme(value)?;
    let token = quoted_param(params, "token").or_else(|| quoted_param(params, "macaroon"))?;
    let invoice = quoted_param(params, "invoice")?;
    Some(ChallengeHeader { token, invoice })
}

/// Credential presented in an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    /// Whatever followed the `:`; a preimage when the client paid itself.
    pub proof: Option<String>,
}

impl Credential {
    /// The proof as a preimage, if it is one.
    pub fn preimage(&self) -> Option<Preimage> {
        self.proof.as_deref().and_then(|p| p.parse().ok())
    }
}

/// Parse `L402 <token>:<proof>` (or the legacy `LSAT` scheme).
///
/// The proof part is optional; an empty token is malformed.
pub fn parse_authorization(value: &str) -> Result<Credential, AuthError> {
    let rest = strip_scheme(value).ok_or(AuthError::MalformedToken)?;
    let (token, proof) = match rest.split_once(':') {
        Some((token, proof)) => (token.trim(), Some(proof.trim())),
        None => (rest, None),
    };
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::MalformedToken);
    }
    Ok(Credential {
        token: token.to_string(),
        proof: proof.filter(|p| !p.is_empty()).map(str::to_string),
    })
}
