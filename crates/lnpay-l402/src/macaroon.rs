//! Payment-bound bearer tokens.
//!
//! A token binds a payment hash, a resource path and an expiry under an
//! HMAC-SHA256 tag keyed by the process-wide [`RootKey`]. Issuance is
//! deterministic, so re-issuing for the same inputs yields the same token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{MIN_ROOT_KEY_LEN, TOKEN_VERSION};
use crate::error::AuthError;
use crate::token_store::TokenStore;
use crate::types::{unix_now, PaymentHash, Preimage};

/// Longest presented token we attempt to decode.
const MAX_TOKEN_LEN: usize = 4096;

/// Process-wide signing secret. Created once at startup, read-only after.
pub struct RootKey(Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RootKeyError {
    #[error("root key is not valid hex")]
    InvalidHex,
    #[error("root key must be at least {MIN_ROOT_KEY_LEN} bytes, got {0}")]
    TooShort(usize),
}

impl RootKey {
    /// Fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; MIN_ROOT_KEY_LEN];
        rand::fill(&mut bytes);
        Self(bytes.to_vec())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, RootKeyError> {
        if bytes.len() < MIN_ROOT_KEY_LEN {
            return Err(RootKeyError::TooShort(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, RootKeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| RootKeyError::InvalidHex)?;
        Self::from_bytes(bytes)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RootKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootKey([REDACTED])")
    }
}

/// A signed token. `encode()` yields the string clients present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub payment_hash: PaymentHash,
    pub resource_path: String,
    pub expires_at: u64,
    pub signature: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct WireToken {
    v: u8,
    payment_hash: PaymentHash,
    resource_path: String,
    expires_at: u64,
    signature: String,
}

/// Canonical, unambiguous byte string covered by the signature.
fn signing_input(payment_hash: &PaymentHash, resource_path: &str, expires_at: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 32 + 8 + resource_path.len() + 8);
    buf.push(TOKEN_VERSION);
    buf.extend_from_slice(payment_hash.as_bytes());
    buf.extend_from_slice(&(resource_path.len() as u64).to_be_bytes());
    buf.extend_from_slice(resource_path.as_bytes());
    buf.extend_from_slice(&expires_at.to_be_bytes());
    buf
}

impl Token {
    /// URL-safe base64 of the JSON wire form; never contains `:`.
    pub fn encode(&self) -> String {
        let wire = WireToken {
            v: TOKEN_VERSION,
            payment_hash: self.payment_hash,
            resource_path: self.resource_path.clone(),
            expires_at: self.expires_at,
            signature: hex::encode(self.signature),
        };
        // Serializing a struct of strings and integers cannot fail.
        let json = serde_json::to_vec(&wire).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(presented: &str) -> Result<Self, AuthError> {
        let presented = presented.trim();
        if presented.is_empty() || presented.len() > MAX_TOKEN_LEN {
            return Err(AuthError::MalformedToken);
        }
        let json = URL_SAFE_NO_PAD
            .decode(presented)
            .map_err(|_| AuthError::MalformedToken)?;
        let wire: WireToken =
            serde_json::from_slice(&json).map_err(|_| AuthError::MalformedToken)?;
        if wire.v != TOKEN_VERSION {
            return Err(AuthError::MalformedToken);
        }
        let mut signature = [0u8; 32];
        hex::decode_to_slice(&wire.signature, &mut signature)
            .map_err(|_| AuthError::MalformedToken)?;

        Ok(Self {
            payment_hash: wire.payment_hash,
            resource_path: wire.resource_path,
            expires_at: wire.expires_at,
            signature,
        })
    }
}

/// Mints tokens under the process-wide root key.
#[derive(Clone)]
pub struct MacaroonIssuer {
    root_key: Arc<RootKey>,
}

impl MacaroonIssuer {
    pub fn new(root_key: Arc<RootKey>) -> Self {
        Self { root_key }
    }

    pub fn issue(&self, payment_hash: PaymentHash, resource_path: &str, ttl: Duration) -> Token {
        self.issue_at(payment_hash, resource_path, unix_now(), ttl)
    }

    /// Issue as of `issued_at`; same inputs always give the same token.
    pub fn issue_at(
        &self,
        payment_hash: PaymentHash,
        resource_path: &str,
        issued_at: u64,
        ttl: Duration,
    ) -> Token {
        let expires_at = issued_at.saturating_add(ttl.as_secs());
        let signature = crate::hmac::sign(
            self.root_key.as_bytes(),
            &signing_input(&payment_hash, resource_path, expires_at),
        );
        Token {
            payment_hash,
            resource_path: resource_path.to_string(),
            expires_at,
            signature,
        }
    }
}

fn store_unavailable(e: crate::error::StoreError) -> AuthError {
    AuthError::StoreUnavailable(e.to_string())
}

/// Checks presented tokens, cheapest check first.
#[derive(Clone)]
pub struct MacaroonVerifier {
    root_key: Arc<RootKey>,
    store: Arc<dyn TokenStore>,
    multi_use: bool,
}

impl MacaroonVerifier {
    pub fn new(root_key: Arc<RootKey>, store: Arc<dyn TokenStore>, multi_use: bool) -> Self {
        Self {
            root_key,
            store,
            multi_use,
        }
    }

    /// Verify a token with no payment proof attached.
    pub fn verify(
        &self,
        presented: &str,
        resource_path: &str,
        now: u64,
    ) -> Result<PaymentHash, AuthError> {
        self.verify_with_proof(presented, None, resource_path, now)
    }

    /// Verify a token; a matching `preimage` counts as settlement proof.
    /// Single-use verifiers also redeem the hash.
    pub fn verify_with_proof(
        &self,
        presented: &str,
        preimage: Option<&Preimage>,
        resource_path: &str,
        now: u64,
    ) -> Result<PaymentHash, AuthError> {
        let hash = self.verify_settled(presented, preimage, resource_path, now)?;
        if !self.multi_use {
            self.redeem(&hash)?;
        }
        Ok(hash)
    }

    /// Checks 1-5 without redeeming. Callers of a single-use verifier must
    /// follow up with [`redeem`](Self::redeem).
    ///
    /// Settlement is always read from the store, never cached.
    pub fn verify_settled(
        &self,
        presented: &str,
        preimage: Option<&Preimage>,
        resource_path: &str,
        now: u64,
    ) -> Result<PaymentHash, AuthError> {
        let token = self.check_token(presented, resource_path, now)?;
        let hash = token.payment_hash;

        let mut settled = self.store.is_settled(&hash).map_err(store_unavailable)?;
        if !settled && preimage.is_some_and(|p| p.proves(&hash)) {
            settled = self.store.mark_settled(&hash).map_err(store_unavailable)?;
            if settled {
                tracing::info!(payment_hash = %hash, "settlement proven by preimage");
            }
        }
        if !settled {
            return Err(AuthError::PaymentNotSettled);
        }
        Ok(hash)
    }

    /// Consume the one redemption of a settled hash.
    pub fn redeem(&self, hash: &PaymentHash) -> Result<(), AuthError> {
        if self.store.try_redeem(hash).map_err(store_unavailable)? {
            Ok(())
        } else {
            Err(AuthError::AlreadyRedeemed)
        }
    }

    pub fn is_multi_use(&self) -> bool {
        self.multi_use
    }

    /// Checks 1-4: structure, resource binding, expiry, signature.
    /// Does not touch the store.
    pub fn check_token(
        &self,
        presented: &str,
        resource_path: &str,
        now: u64,
    ) -> Result<Token, AuthError> {
        let token = Token::decode(presented)?;

        if token.resource_path != resource_path {
            return Err(AuthError::ResourceMismatch);
        }
        if now >= token.expires_at {
            return Err(AuthError::TokenExpired);
        }
        let input = signing_input(&token.payment_hash, &token.resource_path, token.expires_at);
        if !crate::hmac::verify(self.root_key.as_bytes(), &input, &token.signature) {
            return Err(AuthError::InvalidSignature);
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::Challenge;
    use crate::token_store::InMemoryTokenStore;

    const PATH: &str = "/fetch-url-content";
    const TTL: Duration = Duration::from_secs(600);
    const ISSUED: u64 = 1_700_000_000;

    struct Fixture {
        issuer: MacaroonIssuer,
        store: Arc<InMemoryTokenStore>,
        key: Arc<RootKey>,
    }

    fn fixture() -> Fixture {
        let key = Arc::new(RootKey::from_bytes(vec![9u8; 32]).unwrap());
        Fixture {
            issuer: MacaroonIssuer::new(key.clone()),
            store: Arc::new(InMemoryTokenStore::new()),
            key,
        }
    }

    fn verifier(f: &Fixture, multi_use: bool) -> MacaroonVerifier {
        MacaroonVerifier::new(f.key.clone(), f.store.clone(), multi_use)
    }

    fn remember(f: &Fixture, hash: PaymentHash) {
        f.store
            .put(&Challenge {
                payment_hash: hash,
                price_msat: 1_000,
                resource_path: PATH.to_string(),
                issued_at: ISSUED,
                expires_at: ISSUED + TTL.as_secs(),
                invoice: "lnbc1".to_string(),
                invoice_expires_at: ISSUED + TTL.as_secs(),
                verify_url: None,
            })
            .unwrap();
    }

    #[test]
    fn issuance_is_deterministic() {
        let f = fixture();
        let hash = PaymentHash([1u8; 32]);
        let a = f.issuer.issue_at(hash, PATH, ISSUED, TTL);
        let b = f.issuer.issue_at(hash, PATH, ISSUED, TTL);
        assert_eq!(a, b);
        assert_eq!(a.encode(), b.encode());
        assert_eq!(a.expires_at, ISSUED + 600);
    }

    #[test]
    fn encoded_token_round_trips_and_has_no_colon() {
        let f = fixture();
        let token = f.issuer.issue_at(PaymentHash([2u8; 32]), PATH, ISSUED, TTL);
        let encoded = token.encode();
        assert!(!encoded.contains(':'));
        assert_eq!(Token::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn settled_token_verifies_until_expiry() {
        let f = fixture();
        let hash = PaymentHash([3u8; 32]);
        remember(&f, hash);
        f.store.mark_settled(&hash).unwrap();
        let token = f.issuer.issue_at(hash, PATH, ISSUED, TTL).encode();
        let v = verifier(&f, true);

        assert_eq!(v.verify(&token, PATH, ISSUED), Ok(hash));
        assert_eq!(v.verify(&token, PATH, ISSUED + 599), Ok(hash));
        assert_eq!(
            v.verify(&token, PATH, ISSUED + 600),
            Err(AuthError::TokenExpired)
        );
    }

    #[test]
    fn expiry_wins_over_settlement_state() {
        let f = fixture();
        let hash = PaymentHash([4u8; 32]);
        let token = f.issuer.issue_at(hash, PATH, ISSUED, TTL).encode();
        assert_eq!(
            verifier(&f, true).verify(&token, PATH, ISSUED + 10_000),
            Err(AuthError::TokenExpired)
        );
    }

    #[test]
    fn unsettled_payment_is_rejected() {
        let f = fixture();
        let hash = PaymentHash([5u8; 32]);
        remember(&f, hash);
        let token = f.issuer.issue_at(hash, PATH, ISSUED, TTL).encode();
        assert_eq!(
            verifier(&f, true).verify(&token, PATH, ISSUED + 1),
            Err(AuthError::PaymentNotSettled)
        );
    }

    #[test]
    fn other_resource_is_rejected() {
        let f = fixture();
        let hash = PaymentHash([6u8; 32]);
        remember(&f, hash);
        f.store.mark_settled(&hash).unwrap();
        let token = f.issuer.issue_at(hash, PATH, ISSUED, TTL).encode();
        let v = verifier(&f, true);
        for other in ["/", "/fetch-url-content/", "/admin", "/FETCH-URL-CONTENT"] {
            assert_eq!(
                v.verify(&token, other, ISSUED + 1),
                Err(AuthError::ResourceMismatch)
            );
        }
    }

    #[test]
    fn every_signature_bit_flip_is_detected() {
        let f = fixture();
        let hash = PaymentHash([7u8; 32]);
        remember(&f, hash);
        f.store.mark_settled(&hash).unwrap();
        let token = f.issuer.issue_at(hash, PATH, ISSUED, TTL);
        let v = verifier(&f, true);

        for byte in 0..32 {
            for bit in 0..8 {
                let mut tampered = token.clone();
                tampered.signature[byte] ^= 1 << bit;
                assert_eq!(
                    v.verify(&tampered.encode(), PATH, ISSUED + 1),
                    Err(AuthError::InvalidSignature)
                );
            }
        }
    }

    #[test]
    fn tampered_claims_fail_signature() {
        let f = fixture();
        let token = f.issuer.issue_at(PaymentHash([8u8; 32]), PATH, ISSUED, TTL);
        let v = verifier(&f, true);

        let mut later = token.clone();
        later.expires_at += 3600;
        assert_eq!(
            v.verify(&later.encode(), PATH, ISSUED + 1),
            Err(AuthError::InvalidSignature)
        );

        let mut other_hash = token;
        other_hash.payment_hash = PaymentHash([9u8; 32]);
        assert_eq!(
            v.verify(&other_hash.encode(), PATH, ISSUED + 1),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn token_from_another_key_is_rejected() {
        let f = fixture();
        let foreign = MacaroonIssuer::new(Arc::new(RootKey::generate()));
        let token = foreign.issue_at(PaymentHash([1u8; 32]), PATH, ISSUED, TTL).encode();
        assert_eq!(
            verifier(&f, true).verify(&token, PATH, ISSUED + 1),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn malformed_tokens() {
        let f = fixture();
        let v = verifier(&f, true);
        let bad_json = URL_SAFE_NO_PAD.encode(b"{\"v\":1}");
        for bad in ["", "!!!", "bm90IGpzb24", bad_json.as_str()] {
            assert_eq!(v.verify(bad, PATH, ISSUED), Err(AuthError::MalformedToken));
        }
        let huge = "A".repeat(MAX_TOKEN_LEN + 1);
        assert_eq!(v.verify(&huge, PATH, ISSUED), Err(AuthError::MalformedToken));
    }

    #[test]
    fn preimage_settles_known_challenge() {
        let f = fixture();
        let preimage = Preimage([0x5a; 32]);
        let hash = preimage.payment_hash();
        remember(&f, hash);
        let token = f.issuer.issue_at(hash, PATH, ISSUED, TTL).encode();
        let v = verifier(&f, true);

        let wrong = Preimage([0x5b; 32]);
        assert_eq!(
            v.verify_with_proof(&token, Some(&wrong), PATH, ISSUED + 1),
            Err(AuthError::PaymentNotSettled)
        );
        assert_eq!(
            v.verify_with_proof(&token, Some(&preimage), PATH, ISSUED + 1),
            Ok(hash)
        );
        assert!(f.store.is_settled(&hash).unwrap());
        assert_eq!(v.verify(&token, PATH, ISSUED + 2), Ok(hash));
    }

    #[test]
    fn preimage_for_unknown_challenge_is_not_enough() {
        let f = fixture();
        let preimage = Preimage([0x6a; 32]);
        let token = f
            .issuer
            .issue_at(preimage.payment_hash(), PATH, ISSUED, TTL)
            .encode();
        assert_eq!(
            verifier(&f, true).verify_with_proof(&token, Some(&preimage), PATH, ISSUED + 1),
            Err(AuthError::PaymentNotSettled)
        );
    }

    #[test]
    fn single_use_tokens_redeem_once() {
        let f = fixture();
        let hash = PaymentHash([0x7a; 32]);
        remember(&f, hash);
        f.store.mark_settled(&hash).unwrap();
        let token = f.issuer.issue_at(hash, PATH, ISSUED, TTL).encode();
        let v = verifier(&f, false);

        assert_eq!(v.verify(&token, PATH, ISSUED + 1), Ok(hash));
        assert_eq!(
            v.verify(&token, PATH, ISSUED + 2),
            Err(AuthError::AlreadyRedeemed)
        );
    }

    #[test]
    fn verify_settled_leaves_redemption_to_the_caller() {
        let f = fixture();
        let hash = PaymentHash([0x7b; 32]);
        remember(&f, hash);
        f.store.mark_settled(&hash).unwrap();
        let token = f.issuer.issue_at(hash, PATH, ISSUED, TTL).encode();
        let v = verifier(&f, false);

        assert_eq!(v.verify_settled(&token, None, PATH, ISSUED + 1), Ok(hash));
        assert_eq!(v.verify_settled(&token, None, PATH, ISSUED + 1), Ok(hash));
        assert!(!f.store.get(&hash).unwrap().unwrap().redeemed);

        assert_eq!(v.redeem(&hash), Ok(()));
        assert_eq!(v.redeem(&hash), Err(AuthError::AlreadyRedeemed));
    }

    #[test]
    fn root_key_validation() {
        assert_eq!(
            RootKey::from_hex("abcd").unwrap_err(),
            RootKeyError::TooShort(2)
        );
        assert_eq!(RootKey::from_hex("zz").unwrap_err(), RootKeyError::InvalidHex);
        assert!(RootKey::from_hex(&"11".repeat(32)).is_ok());
        assert_eq!(format!("{:?}", RootKey::generate()), "RootKey([REDACTED])");
    }
}
