use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::constants::HASH_LEN;

/// SHA-256 of a payment preimage; identifies an invoice and its settlement.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentHash(pub [u8; HASH_LEN]);

/// Secret whose hash is the payment hash; revealed to the payer on settlement.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Preimage(pub [u8; HASH_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {HASH_LEN} hex-encoded bytes")]
pub struct HexLengthError;

fn parse_fixed_hex(s: &str) -> Result<[u8; HASH_LEN], HexLengthError> {
    let mut out = [0u8; HASH_LEN];
    hex::decode_to_slice(s.trim(), &mut out).map_err(|_| HexLengthError)?;
    Ok(out)
}

impl PaymentHash {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Preimage {
    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(Sha256::digest(self.0).into())
    }

    /// Whether this preimage settles the invoice identified by `hash`.
    pub fn proves(&self, hash: &PaymentHash) -> bool {
        crate::security::constant_time_eq(&self.payment_hash().0, &hash.0)
    }
}

impl FromStr for PaymentHash {
    type Err = HexLengthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s).map(Self)
    }
}

impl FromStr for Preimage {
    type Err = HexLengthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s).map(Self)
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({})", self.to_hex())
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Preimage([REDACTED])")
    }
}

impl Serialize for PaymentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PaymentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Current unix time in seconds.
///
/// On clock error returns `u64::MAX` so every token reads as expired.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch, treating all tokens as expired");
            u64::MAX
        })
}
