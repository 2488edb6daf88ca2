//! Test fixtures: signed bolt11 invoices, an in-process HTTP transport and
//! a token store with switchable faults.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bytes::Bytes;
use lightning_invoice::{Currency, InvoiceBuilder};
use lightning_types::payment::PaymentSecret;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::challenge::Challenge;
use crate::error::StoreError;
use crate::lnurl::{HttpTransport, TransportError, TransportFuture, TransportResponse};
use crate::token_store::{InMemoryTokenStore, StoredChallenge, TokenStore};
use crate::types::PaymentHash;

/// A mainnet bolt11 invoice for `payment_hash`, created now with the
/// default one hour expiry, signed with a fixed key.
pub fn signed_invoice(payment_hash: PaymentHash, amount_msat: Option<u64>) -> String {
    signed_invoice_at(
        payment_hash,
        amount_msat,
        crate::types::unix_now(),
        Duration::from_secs(3600),
    )
}

/// Like [`signed_invoice`] with an explicit creation time (unix seconds)
/// and expiry, for invoices that are about to expire or already have.
pub fn signed_invoice_at(
    payment_hash: PaymentHash,
    amount_msat: Option<u64>,
    created_at: u64,
    expiry: Duration,
) -> String {
    let node_key = SecretKey::from_slice(&[0x42; 32]).expect("valid secret key");
    let hash = sha256::Hash::from_slice(payment_hash.as_bytes()).expect("32-byte hash");

    let builder = InvoiceBuilder::new(Currency::Bitcoin)
        .description("l402 test invoice".into())
        .payment_hash(hash)
        .payment_secret(PaymentSecret([0x07; 32]))
        .duration_since_epoch(Duration::from_secs(created_at))
        .expiry_time(expiry)
        .min_final_cltv_expiry_delta(144);

    let invoice = match amount_msat {
        Some(msat) => builder
            .amount_milli_satoshis(msat)
            .build_signed(|msg| Secp256k1::new().sign_ecdsa_recoverable(msg, &node_key)),
        None => builder.build_signed(|msg| Secp256k1::new().sign_ecdsa_recoverable(msg, &node_key)),
    };
    invoice.expect("signed test invoice").to_string()
}

/// [`HttpTransport`] answering from a fixed URL → response table.
///
/// Unknown URLs answer 404. Every call is counted and recorded.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, (u16, Bytes)>>,
    requests: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(url.to_string(), (status, body.into()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl HttpTransport for FakeTransport {
    fn get<'a>(&'a self, url: &'a Url) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .expect("requests lock")
                .push(url.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let route = self
                .routes
                .lock()
                .map_err(|_| TransportError::Failed("routes lock poisoned".to_string()))?
                .get(url.as_str())
                .cloned();
            let (status, body) = route.unwrap_or((404, Bytes::from_static(b"not found")));
            Ok(TransportResponse { status, body })
        })
    }
}

/// In-memory [`TokenStore`] whose calls can be made to stall or fail.
///
/// A stall blocks the calling thread, like a locked SQLite file would.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryTokenStore,
    stall_ms: AtomicU64,
    failing: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stall every following call for `stall` (zero clears it).
    pub fn stall(&self, stall: Duration) {
        self.stall_ms.store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every following call fail (or succeed again).
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The underlying store, bypassing faults.
    pub fn inner(&self) -> &InMemoryTokenStore {
        &self.inner
    }

    fn fault(&self) -> Result<(), StoreError> {
        let stall = self.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            std::thread::sleep(Duration::from_millis(stall));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("injected store failure".to_string()));
        }
        Ok(())
    }
}

impl TokenStore for FaultyStore {
    fn put(&self, challenge: &Challenge) -> Result<(), StoreError> {
        self.fault()?;
        self.inner.put(challenge)
    }

    fn get(&self, hash: &PaymentHash) -> Result<Option<StoredChallenge>, StoreError> {
        self.fault()?;
        self.inner.get(hash)
    }

    fn is_settled(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        self.fault()?;
        self.inner.is_settled(hash)
    }

    fn mark_settled(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        self.fault()?;
        self.inner.mark_settled(hash)
    }

    fn try_redeem(&self, hash: &PaymentHash) -> Result<bool, StoreError> {
        self.fault()?;
        self.inner.try_redeem(hash)
    }

    fn delete(&self, hash: &PaymentHash) -> Result<(), StoreError> {
        self.fault()?;
        self.inner.delete(hash)
    }

    fn purge_expired(&self, now: u64) -> Result<usize, StoreError> {
        self.fault()?;
        self.inner.purge_expired(now)
    }
}
