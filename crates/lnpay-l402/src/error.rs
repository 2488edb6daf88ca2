use thiserror::Error;

/// Failure to decode a bolt11 invoice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvoiceError {
    #[error("invalid invoice format: {0}")]
    InvalidInvoiceFormat(String),
}

/// Failures of the LNURL-pay client.
///
/// `Display` output may contain provider text and is meant for logs only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LnurlError {
    #[error("invalid lightning address: {0}")]
    InvalidAddressFormat(String),

    #[error("lightning address resolution failed with status {status}: {body}")]
    ResolutionFailed { status: u16, body: String },

    #[error("malformed pay request metadata: {0}")]
    MalformedResponse(String),

    #[error("{amount_msat} msat not in sendable range of {min_sendable} - {max_sendable}")]
    AmountOutOfRange {
        amount_msat: u64,
        min_sendable: u64,
        max_sendable: u64,
    },

    #[error("invoice callback failed: {0}")]
    CallbackFailed(String),

    #[error("malformed callback response: {0}")]
    MalformedCallbackResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,
}

/// Reasons a presented token does not authorize a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed token")]
    MalformedToken,

    #[error("token is bound to a different resource")]
    ResourceMismatch,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("payment not settled")]
    PaymentNotSettled,

    #[error("token already redeemed")]
    AlreadyRedeemed,

    #[error("token store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AuthError {
    /// Stable machine-readable code for response bodies and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MalformedToken => "malformed_token",
            AuthError::ResourceMismatch => "resource_mismatch",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::PaymentNotSettled => "payment_not_settled",
            AuthError::AlreadyRedeemed => "already_redeemed",
            AuthError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

/// Token store backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt stored challenge: {0}")]
    Corrupt(String),
}
