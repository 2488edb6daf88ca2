/// Authentication scheme name used in `WWW-Authenticate` and `Authorization`.
pub const L402_SCHEME: &str = "L402";

/// Legacy scheme name still sent by older LSAT clients.
pub const LSAT_SCHEME: &str = "LSAT";

/// Header carrying the challenge on a 402 response.
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

/// Well-known LNURL-pay path prefix for Lightning Addresses (LUD-16).
pub const LNURLP_WELL_KNOWN: &str = "/.well-known/lnurlp/";

/// Tag an LNURL-pay metadata document must carry when it carries one at all.
pub const PAY_REQUEST_TAG: &str = "payRequest";

/// Token wire format version.
pub const TOKEN_VERSION: u8 = 1;

/// Minimum length of a configured root key.
pub const MIN_ROOT_KEY_LEN: usize = 32;

/// Length of a payment hash and of a payment preimage.
pub const HASH_LEN: usize = 32;

/// Default lifetime of a challenge and its token.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Default bound on LNURL and token-store calls.
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Largest LNURL response body we are willing to decode.
pub const MAX_LNURL_BODY_BYTES: usize = 64 * 1024;
