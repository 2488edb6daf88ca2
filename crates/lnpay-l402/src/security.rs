//! Constant-time equality for values an attacker can probe byte by byte:
//! the hash of a presented preimage against a challenge's payment hash
//! ([`Preimage::proves`](crate::Preimage::proves)), and the gateway's
//! `/metrics` bearer token. HMAC tags go through [`crate::hmac::verify`].

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare two byte strings without leaking where they differ.
///
/// Bearer tokens differ in length from the configured one, so both sides
/// are hashed to 32 bytes before the comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    Sha256::digest(a).ct_eq(&Sha256::digest(b)).into()
}
