//! Per-request L402 authorization.
//!
//! A request either presents a token that verifies (admit), presents an
//! unsettled but otherwise valid token (poll LUD-21 verify, then re-issue
//! the same challenge), or gets a freshly minted challenge.

use l402::{
    parse_authorization, unix_now, www_authenticate, AuthError, Challenge, Credential,
    InvoiceError, LnurlError, MacaroonIssuer, MacaroonVerifier, PaymentHash, Preimage, RootKey,
    StoredChallenge, Token, TokenStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::invoice_source::InvoiceSource;
use crate::metrics::{CHALLENGES_ISSUED, SETTLEMENTS, UPSTREAM_LATENCY, VERIFICATIONS};

/// A challenge ready to be sent as a 402.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub token: String,
    pub invoice: String,
    pub payment_hash: PaymentHash,
    pub price_msat: u64,
    pub expires_at: u64,
    /// True when this repeats an earlier, still pending challenge.
    pub reissued: bool,
}

impl IssuedChallenge {
    /// Value of the `WWW-Authenticate` header.
    pub fn header_value(&self) -> String {
        www_authenticate(&self.token, &self.invoice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit {
        payment_hash: PaymentHash,
    },
    Challenge {
        challenge: IssuedChallenge,
        /// Why a presented credential was not accepted, if one was presented.
        reason: Option<&'static str>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invoice source: {0}")]
    Lnurl(#[from] LnurlError),

    #[error("{0}")]
    Invoice(#[from] InvoiceError),

    #[error("invoice amount {actual} msat does not match price {expected} msat")]
    AmountMismatch { expected: u64, actual: u64 },

    #[error("invoice already expired at {expires_at}")]
    InvoiceExpired { expires_at: u64 },

    #[error("token store: {0}")]
    Store(String),

    #[error("token store timed out")]
    StoreTimeout,
}

impl GateError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GateError::Lnurl(LnurlError::UpstreamTimeout) | GateError::StoreTimeout
        )
    }
}

/// Result of an externally reported settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled,
    UnknownPaymentHash,
    PreimageMismatch,
}

fn store_err(e: l402::StoreError) -> GateError {
    GateError::Store(e.to_string())
}

fn observe(call: &str, started: Instant, ok: bool) {
    UPSTREAM_LATENCY
        .with_label_values(&[call, if ok { "ok" } else { "error" }])
        .observe(started.elapsed().as_secs_f64());
}

pub struct AuthorizationGate {
    issuer: MacaroonIssuer,
    verifier: MacaroonVerifier,
    store: Arc<dyn TokenStore>,
    invoices: Arc<dyn InvoiceSource>,
    price_msat: u64,
    token_ttl: Duration,
    upstream_timeout: Duration,
}

impl AuthorizationGate {
    pub fn new(
        root_key: Arc<RootKey>,
        store: Arc<dyn TokenStore>,
        invoices: Arc<dyn InvoiceSource>,
        price_msat: u64,
        token_ttl: Duration,
        multi_use: bool,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            issuer: MacaroonIssuer::new(root_key.clone()),
            verifier: MacaroonVerifier::new(root_key, store.clone(), multi_use),
            store,
            invoices,
            price_msat,
            token_ttl,
            upstream_timeout,
        }
    }

    pub fn price_msat(&self) -> u64 {
        self.price_msat
    }

    /// Decide one request for `resource_path` given its `Authorization` header.
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        resource_path: &str,
    ) -> Result<GateDecision, GateError> {
        let now = unix_now();
        let mut rejection = None;

        if let Some(header) = authorization {
            match parse_authorization(header) {
                Err(e) => rejection = Some(e),
                Ok(credential) => match self.verify(&credential, resource_path, now).await? {
                    Ok(payment_hash) => return Ok(self.admit(payment_hash)),
                    Err(AuthError::PaymentNotSettled) => {
                        match self.pending(&credential, resource_path, now).await? {
                            Some(pending) => return self.resume(&credential, pending, now).await,
                            None => rejection = Some(AuthError::PaymentNotSettled),
                        }
                    }
                    Err(AuthError::StoreUnavailable(msg)) => return Err(GateError::Store(msg)),
                    Err(e) => rejection = Some(e),
                },
            }
        }

        let reason = rejection.map(|e| {
            VERIFICATIONS.with_label_values(&[e.code()]).inc();
            tracing::debug!(reason = e.code(), "presented credential rejected");
            e.code()
        });
        let challenge = self.issue_challenge(resource_path, now).await?;
        Ok(GateDecision::Challenge { challenge, reason })
    }

    /// Record a settlement reported by a trusted caller.
    pub async fn settle(
        &self,
        payment_hash: PaymentHash,
        preimage: Option<Preimage>,
    ) -> Result<SettleOutcome, GateError> {
        let store = self.store.clone();
        let known = self
            .blocking(move || store.get(&payment_hash))
            .await?
            .map_err(store_err)?
            .is_some();
        if !known {
            return Ok(SettleOutcome::UnknownPaymentHash);
        }
        if preimage.is_some_and(|p| !p.proves(&payment_hash)) {
            return Ok(SettleOutcome::PreimageMismatch);
        }

        let store = self.store.clone();
        let marked = self
            .blocking(move || store.mark_settled(&payment_hash))
            .await?
            .map_err(store_err)?;
        if !marked {
            // Purged between the lookup and the update.
            return Ok(SettleOutcome::UnknownPaymentHash);
        }

        SETTLEMENTS.with_label_values(&["webhook"]).inc();
        tracing::info!(payment_hash = %payment_hash, "settlement recorded via webhook");
        Ok(SettleOutcome::Settled)
    }

    /// Drop expired challenges. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, GateError> {
        let store = self.store.clone();
        let now = unix_now();
        self.blocking(move || store.purge_expired(now))
            .await?
            .map_err(store_err)
    }

    fn admit(&self, payment_hash: PaymentHash) -> GateDecision {
        VERIFICATIONS.with_label_values(&["ok"]).inc();
        tracing::debug!(payment_hash = %payment_hash, "request admitted");
        GateDecision::Admit { payment_hash }
    }

    /// Run a token store operation off the async workers, bounded by the
    /// upstream timeout.
    async fn blocking<T, F>(&self, f: F) -> Result<T, GateError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.upstream_timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(GateError::Store(format!("store task failed: {e}"))),
            Err(_) => Err(GateError::StoreTimeout),
        }
    }

    /// Full verification. Settlement is always re-read from the store.
    ///
    /// Single-use redemption runs as its own store call, after the
    /// settlement checks returned in time.
    async fn verify(
        &self,
        credential: &Credential,
        resource_path: &str,
        now: u64,
    ) -> Result<Result<PaymentHash, AuthError>, GateError> {
        let verifier = self.verifier.clone();
        let token = credential.token.clone();
        let preimage = credential.preimage();
        let path = resource_path.to_string();
        let verified = self
            .blocking(move || verifier.verify_settled(&token, preimage.as_ref(), &path, now))
            .await?;
        match verified {
            Ok(hash) if !self.verifier.is_multi_use() => {
                Ok(self.redeem(hash).await?.map(|()| hash))
            }
            other => Ok(other),
        }
    }

    /// Redeem a single-use hash under the upstream timeout.
    ///
    /// A redemption still queued when the deadline passes is skipped, so
    /// the 504 does not cost the client its token. One already running in
    /// the store completes.
    async fn redeem(&self, hash: PaymentHash) -> Result<Result<(), AuthError>, GateError> {
        let abandoned = Arc::new(AtomicBool::new(false));
        let flag = abandoned.clone();
        let verifier = self.verifier.clone();
        let task = tokio::task::spawn_blocking(move || {
            if flag.load(Ordering::SeqCst) {
                return Err(AuthError::StoreUnavailable(
                    "redemption abandoned after timeout".to_string(),
                ));
            }
            verifier.redeem(&hash)
        });
        match tokio::time::timeout(self.upstream_timeout, task).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(GateError::Store(format!("store task failed: {e}"))),
            Err(_) => {
                abandoned.store(true, Ordering::SeqCst);
                Err(GateError::StoreTimeout)
            }
        }
    }

    /// The stored, unsettled challenge a valid token was issued for.
    async fn pending(
        &self,
        credential: &Credential,
        resource_path: &str,
        now: u64,
    ) -> Result<Option<(Token, StoredChallenge)>, GateError> {
        let Ok(token) = self
            .verifier
            .check_token(&credential.token, resource_path, now)
        else {
            return Ok(None);
        };
        let store = self.store.clone();
        let hash = token.payment_hash;
        let stored = self
            .blocking(move || store.get(&hash))
            .await?
            .map_err(store_err)?;

        Ok(stored
            .filter(|s| {
                !s.settled
                    && s.challenge.resource_path == resource_path
                    && s.challenge.expires_at == token.expires_at
                    && !s.challenge.is_expired(now)
            })
            .map(|s| (token, s)))
    }

    /// Poll for settlement of a pending challenge; admit if it settled,
    /// otherwise hand the same challenge back while its invoice is payable.
    async fn resume(
        &self,
        credential: &Credential,
        (token, stored): (Token, StoredChallenge),
        now: u64,
    ) -> Result<GateDecision, GateError> {
        let resource_path = token.resource_path.as_str();

        if self.poll_settlement(&stored.challenge).await? {
            match self.verify(credential, resource_path, now).await? {
                Ok(payment_hash) => return Ok(self.admit(payment_hash)),
                Err(AuthError::StoreUnavailable(msg)) => return Err(GateError::Store(msg)),
                Err(e) => {
                    VERIFICATIONS.with_label_values(&[e.code()]).inc();
                    let challenge = self.issue_challenge(resource_path, now).await?;
                    return Ok(GateDecision::Challenge {
                        challenge,
                        reason: Some(e.code()),
                    });
                }
            }
        }

        VERIFICATIONS
            .with_label_values(&[AuthError::PaymentNotSettled.code()])
            .inc();
        if !stored.challenge.is_payable(now) {
            tracing::debug!(
                payment_hash = %stored.challenge.payment_hash,
                "pending invoice expired, issuing a new one"
            );
            let challenge = self.issue_challenge(resource_path, now).await?;
            return Ok(GateDecision::Challenge {
                challenge,
                reason: Some(AuthError::PaymentNotSettled.code()),
            });
        }
        let challenge = stored.challenge;
        let ttl = Duration::from_secs(challenge.expires_at.saturating_sub(challenge.issued_at));
        let reissued = self
            .issuer
            .issue_at(challenge.payment_hash, resource_path, challenge.issued_at, ttl);
        CHALLENGES_ISSUED.with_label_values(&["reissued"]).inc();
        tracing::debug!(payment_hash = %challenge.payment_hash, "re-issued pending challenge");

        Ok(GateDecision::Challenge {
            challenge: IssuedChallenge {
                token: reissued.encode(),
                invoice: challenge.invoice,
                payment_hash: challenge.payment_hash,
                price_msat: challenge.price_msat,
                expires_at: challenge.expires_at,
                reissued: true,
            },
            reason: Some(AuthError::PaymentNotSettled.code()),
        })
    }

    /// Ask the invoice's verify endpoint whether it was paid; on a positive
    /// answer mark it settled. Poll failures count as "not yet".
    async fn poll_settlement(&self, challenge: &Challenge) -> Result<bool, GateError> {
        let hash = challenge.payment_hash;
        let Some(verify_url) = challenge.verify_url.as_deref() else {
            return Ok(false);
        };
        let verify_url = match Url::parse(verify_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(payment_hash = %hash, error = %e, "stored verify url is invalid");
                return Ok(false);
            }
        };

        let started = Instant::now();
        let status = self.invoices.check_settlement(&verify_url).await;
        observe("verify", started, status.is_ok());
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(payment_hash = %hash, error = %e, "settlement poll failed");
                return Ok(false);
            }
        };

        if !status.settled {
            return Ok(false);
        }
        if status.preimage.is_some_and(|p| !p.proves(&hash)) {
            tracing::warn!(
                payment_hash = %hash,
                "verify endpoint reported settled with a non-matching preimage"
            );
            return Ok(false);
        }

        let store = self.store.clone();
        let marked = self
            .blocking(move || store.mark_settled(&hash))
            .await?
            .map_err(store_err)?;
        if marked {
            SETTLEMENTS.with_label_values(&["verify"]).inc();
            tracing::info!(payment_hash = %hash, "settlement observed via verify endpoint");
        }
        Ok(marked)
    }

    /// Obtain an invoice for the configured price and mint a challenge for it.
    async fn issue_challenge(
        &self,
        resource_path: &str,
        now: u64,
    ) -> Result<IssuedChallenge, GateError> {
        let started = Instant::now();
        let invoice = self.invoices.create_invoice(self.price_msat).await;
        observe("invoice", started, invoice.is_ok());
        let invoice = invoice?;

        let decoded = l402::invoice::decode(&invoice.pr)?;
        if decoded.expires_at <= now {
            return Err(GateError::InvoiceExpired {
                expires_at: decoded.expires_at,
            });
        }
        if let Some(actual) = decoded.amount_msat {
            if actual != self.price_msat {
                return Err(GateError::AmountMismatch {
                    expected: self.price_msat,
                    actual,
                });
            }
        }

        let token = self
            .issuer
            .issue_at(decoded.payment_hash, resource_path, now, self.token_ttl);
        let challenge = Challenge {
            payment_hash: decoded.payment_hash,
            price_msat: self.price_msat,
            resource_path: resource_path.to_string(),
            issued_at: now,
            expires_at: token.expires_at,
            invoice: invoice.pr,
            invoice_expires_at: decoded.expires_at,
            verify_url: invoice.verify.map(String::from),
        };

        let store = self.store.clone();
        let record = challenge.clone();
        self.blocking(move || store.put(&record))
            .await?
            .map_err(store_err)?;

        CHALLENGES_ISSUED.with_label_values(&["new"]).inc();
        tracing::info!(
            payment_hash = %challenge.payment_hash,
            price_msat = challenge.price_msat,
            resource = %challenge.resource_path,
            "issued payment challenge"
        );

        Ok(IssuedChallenge {
            token: token.encode(),
            invoice: challenge.invoice,
            payment_hash: challenge.payment_hash,
            price_msat: challenge.price_msat,
            expires_at: challenge.expires_at,
            reissued: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice_source::LnurlInvoiceSource;
    use l402::testing::{signed_invoice, signed_invoice_at, FakeTransport, FaultyStore};
    use l402::{InMemoryTokenStore, LnurlClient};

    const PATH: &str = "/fetch-url-content";
    const PRICE: u64 = 10_000;
    const WELL_KNOWN: &str = "https://pay.example.com/.well-known/lnurlp/alice";
    const CALLBACK: &str = "https://pay.example.com/lnurlp/alice/callback";
    const VERIFY: &str = "https://pay.example.com/lnurlp/alice/verify/1";

    struct Harness {
        gate: AuthorizationGate,
        store: Arc<InMemoryTokenStore>,
        transport: Arc<FakeTransport>,
    }

    fn serve_invoice(transport: &FakeTransport, pr: String) {
        transport.respond(
            &format!("{CALLBACK}?amount={PRICE}"),
            200,
            serde_json::json!({
                "pr": pr,
                "status": "OK",
                "verify": VERIFY,
            })
            .to_string(),
        );
    }

    fn provider(transport: FakeTransport, invoice_msat: Option<u64>) -> Arc<FakeTransport> {
        let transport = Arc::new(transport);
        transport.respond(
            WELL_KNOWN,
            200,
            serde_json::json!({
                "tag": "payRequest",
                "callback": CALLBACK,
                "minSendable": 1_000,
                "maxSendable": 1_000_000_000,
                "metadata": "[[\"text/plain\",\"alice\"]]"
            })
            .to_string(),
        );
        serve_invoice(
            &transport,
            signed_invoice(Preimage([0x5a; 32]).payment_hash(), invoice_msat),
        );
        transport
    }

    fn gate_over(
        transport: &Arc<FakeTransport>,
        store: Arc<dyn TokenStore>,
        multi_use: bool,
        store_timeout: Duration,
    ) -> AuthorizationGate {
        let client = LnurlClient::new(transport.clone(), Duration::from_secs(5));
        AuthorizationGate::new(
            Arc::new(RootKey::from_bytes(vec![3u8; 32]).unwrap()),
            store,
            Arc::new(LnurlInvoiceSource::new(client, "alice@pay.example.com")),
            PRICE,
            Duration::from_secs(3600),
            multi_use,
            store_timeout,
        )
    }

    fn harness_with(transport: FakeTransport, multi_use: bool, invoice_msat: Option<u64>) -> Harness {
        let transport = provider(transport, invoice_msat);
        let store = Arc::new(InMemoryTokenStore::new());
        let gate = gate_over(&transport, store.clone(), multi_use, Duration::from_secs(5));
        Harness {
            gate,
            store,
            transport,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeTransport::new(), true, Some(PRICE))
    }

    fn expect_challenge(decision: GateDecision) -> (IssuedChallenge, Option<&'static str>) {
        match decision {
            GateDecision::Challenge { challenge, reason } => (challenge, reason),
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_credential_gets_fresh_challenge() {
        let h = harness();
        let (challenge, reason) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());

        assert_eq!(reason, None);
        assert!(!challenge.reissued);
        let token = Token::decode(&challenge.token).unwrap();
        let decoded = l402::invoice::decode(&challenge.invoice).unwrap();
        assert_eq!(token.payment_hash, decoded.payment_hash);
        assert_eq!(challenge.payment_hash, decoded.payment_hash);

        let stored = h.store.get(&challenge.payment_hash).unwrap().unwrap();
        assert_eq!(stored.challenge.verify_url.as_deref(), Some(VERIFY));
        assert_eq!(stored.challenge.price_msat, PRICE);
        assert!(challenge.header_value().starts_with("L402 token=\""));
    }

    #[tokio::test]
    async fn test_malformed_credential_gets_challenge_with_reason() {
        let h = harness();
        let (_, reason) =
            expect_challenge(h.gate.authorize(Some("Bearer abc"), PATH).await.unwrap());
        assert_eq!(reason, Some("malformed_token"));
    }

    #[tokio::test]
    async fn test_unsettled_token_gets_same_challenge_back() {
        let h = harness();
        h.transport.respond(VERIFY, 200, r#"{"status":"OK","settled":false}"#);
        let (first, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());
        let calls_after_issue = h.transport.calls();

        let header = format!("L402 {}", first.token);
        let (second, reason) =
            expect_challenge(h.gate.authorize(Some(&header), PATH).await.unwrap());

        assert_eq!(reason, Some("payment_not_settled"));
        assert!(second.reissued);
        assert_eq!(second.token, first.token);
        assert_eq!(second.invoice, first.invoice);
        // Only the verify poll went out; no new invoice was requested.
        assert_eq!(h.transport.calls(), calls_after_issue + 1);
        assert_eq!(h.transport.requests().last().map(String::as_str), Some(VERIFY));
    }

    #[tokio::test]
    async fn test_settled_token_is_admitted() {
        let h = harness();
        let (challenge, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());
        h.store.mark_settled(&challenge.payment_hash).unwrap();

        let header = format!("L402 {}", challenge.token);
        assert_eq!(
            h.gate.authorize(Some(&header), PATH).await.unwrap(),
            GateDecision::Admit {
                payment_hash: challenge.payment_hash
            }
        );
    }

    #[tokio::test]
    async fn test_preimage_proof_is_admitted() {
        let h = harness();
        let (challenge, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());

        let header = format!("L402 {}:{}", challenge.token, "5a".repeat(32));
        assert!(matches!(
            h.gate.authorize(Some(&header), PATH).await.unwrap(),
            GateDecision::Admit { .. }
        ));
        assert!(h.store.is_settled(&challenge.payment_hash).unwrap());
    }

    #[tokio::test]
    async fn test_verify_endpoint_settlement_is_admitted() {
        let h = harness();
        h.transport.respond(
            VERIFY,
            200,
            format!(r#"{{"status":"OK","settled":true,"preimage":"{}"}}"#, "5a".repeat(32)),
        );
        let (challenge, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());

        let header = format!("L402 {}", challenge.token);
        assert!(matches!(
            h.gate.authorize(Some(&header), PATH).await.unwrap(),
            GateDecision::Admit { .. }
        ));
        assert!(h.store.is_settled(&challenge.payment_hash).unwrap());
    }

    #[tokio::test]
    async fn test_verify_with_wrong_preimage_is_not_trusted() {
        let h = harness();
        h.transport.respond(
            VERIFY,
            200,
            format!(r#"{{"status":"OK","settled":true,"preimage":"{}"}}"#, "00".repeat(32)),
        );
        let (challenge, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());

        let header = format!("L402 {}", challenge.token);
        let (_, reason) = expect_challenge(h.gate.authorize(Some(&header), PATH).await.unwrap());
        assert_eq!(reason, Some("payment_not_settled"));
        assert!(!h.store.is_settled(&challenge.payment_hash).unwrap());
    }

    #[tokio::test]
    async fn test_single_use_token_second_use_is_challenged() {
        let h = harness_with(FakeTransport::new(), false, Some(PRICE));
        let (challenge, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());
        h.store.mark_settled(&challenge.payment_hash).unwrap();
        let header = format!("L402 {}", challenge.token);

        assert!(matches!(
            h.gate.authorize(Some(&header), PATH).await.unwrap(),
            GateDecision::Admit { .. }
        ));
        let (_, reason) = expect_challenge(h.gate.authorize(Some(&header), PATH).await.unwrap());
        assert_eq!(reason, Some("already_redeemed"));
    }

    #[tokio::test]
    async fn test_token_for_other_path_is_challenged() {
        let h = harness();
        let (challenge, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());
        h.store.mark_settled(&challenge.payment_hash).unwrap();

        let header = format!("L402 {}", challenge.token);
        let (_, reason) =
            expect_challenge(h.gate.authorize(Some(&header), "/other").await.unwrap());
        assert_eq!(reason, Some("resource_mismatch"));
    }

    #[tokio::test]
    async fn test_invoice_amount_must_match_price() {
        let h = harness_with(FakeTransport::new(), true, Some(PRICE + 1));
        let err = h.gate.authorize(None, PATH).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::AmountMismatch {
                expected: PRICE,
                actual
            } if actual == PRICE + 1
        ));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_amountless_invoice_is_accepted() {
        let h = harness_with(FakeTransport::new(), true, None);
        expect_challenge(h.gate.authorize(None, PATH).await.unwrap());
    }

    #[tokio::test]
    async fn test_provider_failure_is_upstream_error() {
        let h = harness();
        h.transport.respond(WELL_KNOWN, 503, "maintenance");
        let err = h.gate.authorize(None, PATH).await.unwrap_err();
        assert!(matches!(
            err,
            GateError::Lnurl(LnurlError::ResolutionFailed { status: 503, .. })
        ));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let transport = FakeTransport::new().with_delay(Duration::from_millis(200));
        let h = harness_with(transport, true, Some(PRICE));
        let client = LnurlClient::new(h.transport.clone(), Duration::from_millis(20));
        let gate = AuthorizationGate::new(
            Arc::new(RootKey::generate()),
            h.store.clone(),
            Arc::new(LnurlInvoiceSource::new(client, "alice@pay.example.com")),
            PRICE,
            Duration::from_secs(3600),
            true,
            Duration::from_secs(5),
        );

        let err = gate.authorize(None, PATH).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }

    #[tokio::test]
    async fn test_settle_outcomes() {
        let h = harness();
        let (challenge, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());
        let hash = challenge.payment_hash;

        assert_eq!(
            h.gate.settle(PaymentHash([0xee; 32]), None).await.unwrap(),
            SettleOutcome::UnknownPaymentHash
        );
        assert_eq!(
            h.gate.settle(hash, Some(Preimage([0x01; 32]))).await.unwrap(),
            SettleOutcome::PreimageMismatch
        );
        assert!(!h.store.is_settled(&hash).unwrap());
        assert_eq!(
            h.gate.settle(hash, Some(Preimage([0x5a; 32]))).await.unwrap(),
            SettleOutcome::Settled
        );
        assert!(h.store.is_settled(&hash).unwrap());
    }

    #[tokio::test]
    async fn test_already_expired_invoice_is_rejected() {
        let h = harness();
        let stale = signed_invoice_at(
            Preimage([0x5a; 32]).payment_hash(),
            Some(PRICE),
            unix_now() - 7_200,
            Duration::from_secs(3_600),
        );
        serve_invoice(&h.transport, stale);

        let err = h.gate.authorize(None, PATH).await.unwrap_err();
        assert!(matches!(err, GateError::InvoiceExpired { .. }), "{err}");
        assert!(!err.is_timeout());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_lapsed_invoice_is_replaced_instead_of_reissued() {
        let h = harness();
        // Payable for about ten more seconds.
        let short = signed_invoice_at(
            Preimage([0x5a; 32]).payment_hash(),
            Some(PRICE),
            unix_now() - 590,
            Duration::from_secs(600),
        );
        serve_invoice(&h.transport, short);
        let (first, _) = expect_challenge(h.gate.authorize(None, PATH).await.unwrap());

        let decoded = l402::invoice::decode(&first.invoice).unwrap();
        let mut stored = h.store.get(&first.payment_hash).unwrap().unwrap().challenge;
        assert_eq!(stored.invoice_expires_at, decoded.expires_at);
        assert!(stored.invoice_expires_at < first.expires_at);

        // Let the invoice lapse, then replay the unpaid token.
        stored.invoice_expires_at = unix_now() - 1;
        h.store.put(&stored).unwrap();
        let next = Preimage([0x6b; 32]);
        serve_invoice(&h.transport, signed_invoice(next.payment_hash(), Some(PRICE)));

        let header = format!("L402 {}", first.token);
        let (second, reason) =
            expect_challenge(h.gate.authorize(Some(&header), PATH).await.unwrap());
        assert_eq!(reason, Some("payment_not_settled"));
        assert!(!second.reissued);
        assert_ne!(second.invoice, first.invoice);
        assert_eq!(second.payment_hash, next.payment_hash());
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let transport = provider(FakeTransport::new(), Some(PRICE));
        let store = Arc::new(FaultyStore::new());
        let gate = gate_over(&transport, store.clone(), true, Duration::from_millis(50));

        store.stall(Duration::from_millis(300));
        let err = gate.authorize(None, PATH).await.unwrap_err();
        assert!(matches!(err, GateError::StoreTimeout), "{err}");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_failing_store_is_store_error() {
        let transport = provider(FakeTransport::new(), Some(PRICE));
        let store = Arc::new(FaultyStore::new());
        let gate = gate_over(&transport, store.clone(), true, Duration::from_secs(5));
        let (challenge, _) = expect_challenge(gate.authorize(None, PATH).await.unwrap());

        store.fail(true);
        let err = gate.authorize(None, PATH).await.unwrap_err();
        assert!(matches!(err, GateError::Store(_)), "{err}");
        assert!(!err.is_timeout());

        let header = format!("L402 {}", challenge.token);
        let err = gate.authorize(Some(&header), PATH).await.unwrap_err();
        assert!(matches!(err, GateError::Store(_)), "{err}");
    }

    #[tokio::test]
    async fn test_timed_out_verification_keeps_single_use_token() {
        let transport = provider(FakeTransport::new(), Some(PRICE));
        let store = Arc::new(FaultyStore::new());
        let gate = gate_over(&transport, store.clone(), false, Duration::from_millis(50));
        let (challenge, _) = expect_challenge(gate.authorize(None, PATH).await.unwrap());
        store.inner().mark_settled(&challenge.payment_hash).unwrap();
        let header = format!("L402 {}", challenge.token);

        store.stall(Duration::from_millis(300));
        let err = gate.authorize(Some(&header), PATH).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");

        // Let the stalled settlement lookup finish in the background.
        store.stall(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(500)).await;
        let stored = store.inner().get(&challenge.payment_hash).unwrap().unwrap();
        assert!(!stored.redeemed);

        assert!(matches!(
            gate.authorize(Some(&header), PATH).await.unwrap(),
            GateDecision::Admit { .. }
        ));
    }
}
