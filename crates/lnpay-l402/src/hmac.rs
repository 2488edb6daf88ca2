use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length")
}

/// HMAC-SHA256 over `message`, raw tag bytes.
pub fn sign(secret: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = keyed(secret);
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Check a raw tag against `message` in constant time.
pub fn verify(secret: &[u8], message: &[u8], tag: &[u8]) -> bool {
    let mut mac = keyed(secret);
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

/// Hex-encoded HMAC-SHA256 over a request body (webhook authentication).
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    hex::encode(sign(secret, body))
}

/// Verify a hex-encoded HMAC-SHA256 signature over a request body.
///
/// Invalid hex is compared against zeros so malformed signatures take the
/// same path as wrong ones.
pub fn verify_hmac(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let expected = hex::decode(signature.trim()).unwrap_or_else(|_| vec![0u8; 32]);
    verify(secret, body, &expected)
}
