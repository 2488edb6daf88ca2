//! L402 authorization core for Lightning-paid HTTP resources.
//!
//! Gates a resource behind a Lightning micropayment: the server answers 402
//! with a bolt11 invoice and a signed token, the client pays and retries
//! with `Authorization: L402 <token>[:<preimage>]`.
//!
//! # Components
//!
//! - **LNURL-pay** ([`LnurlClient`]) - resolves a Lightning Address and fetches invoices
//! - **Invoice decoding** ([`invoice::decode`]) - extracts the payment hash from bolt11
//! - **Tokens** ([`MacaroonIssuer`], [`MacaroonVerifier`]) - HMAC-bound to hash, path and expiry
//! - **State** ([`TokenStore`]) - issued challenges and their settlement
//!
//! # Quick example (verifier)
//!
//! ```no_run
//! use std::sync::Arc;
//! use l402::{InMemoryTokenStore, MacaroonVerifier, RootKey};
//!
//! let key = Arc::new(RootKey::generate());
//! let store = Arc::new(InMemoryTokenStore::new());
//! let verifier = MacaroonVerifier::new(key, store, true);
//!
//! match verifier.verify("token", "/fetch-url-content", l402::unix_now()) {
//!     Ok(hash) => println!("paid: {hash}"),
//!     Err(e) => println!("rejected: {}", e.code()),
//! }
//! ```

// Core types
pub mod constants;
pub mod error;
pub mod hmac;
pub mod security;
pub mod types;

// Lightning
pub mod invoice;
pub mod lnurl;

// Tokens and challenges
pub mod challenge;
pub mod macaroon;
pub mod token_store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports
pub use constants::*;
pub use error::{AuthError, InvoiceError, LnurlError, StoreError};
pub use types::{unix_now, PaymentHash, Preimage};

pub use challenge::{parse_authorization, www_authenticate, Challenge, Credential};
pub use invoice::DecodedInvoice;
pub use lnurl::{
    HttpTransport, Invoice, LightningAddress, LnurlClient, PayRequestMetadata, ReqwestTransport,
    VerifyStatus,
};
pub use macaroon::{MacaroonIssuer, MacaroonVerifier, RootKey, RootKeyError, Token};
pub use token_store::{InMemoryTokenStore, SqliteTokenStore, StoredChallenge, TokenStore};
