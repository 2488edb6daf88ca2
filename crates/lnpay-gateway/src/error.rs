use actix_web::{http::StatusCode, HttpResponse, ResponseError};

use crate::gate::GateError;
use crate::resource::FetchError;

/// Request-scoped failures, mapped onto HTTP responses.
///
/// Response bodies never carry upstream provider text; details are logged.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing required query parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("authentication failed")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("preimage does not match payment hash")]
    PreimageMismatch,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingParameter(_) => "missing_parameter",
            GatewayError::InvalidUrl(_) => "invalid_url",
            GatewayError::InvalidBody(_) => "invalid_body",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::PreimageMismatch => "preimage_mismatch",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

impl From<GateError> for GatewayError {
    fn from(e: GateError) -> Self {
        if e.is_timeout() {
            GatewayError::UpstreamTimeout(e.to_string())
        } else if matches!(e, GateError::Store(_)) {
            GatewayError::Internal(e.to_string())
        } else {
            GatewayError::Upstream(e.to_string())
        }
    }
}

impl From<FetchError> for GatewayError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Blocked(msg) => GatewayError::InvalidUrl(msg),
            FetchError::Timeout => GatewayError::UpstreamTimeout(e.to_string()),
            FetchError::TooLarge(_) | FetchError::Failed(_) => GatewayError::Upstream(e.to_string()),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingParameter(_)
            | GatewayError::InvalidUrl(_)
            | GatewayError::InvalidBody(_)
            | GatewayError::PreimageMismatch => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            GatewayError::MissingParameter(param) => {
                format!("Query parameter '{param}' is required")
            }
            GatewayError::InvalidUrl(msg)
            | GatewayError::InvalidBody(msg)
            | GatewayError::NotFound(msg) => msg.clone(),
            GatewayError::PreimageMismatch => "Preimage does not match payment hash".to_string(),
            GatewayError::Unauthorized => "Valid X-Settlement-Auth required".to_string(),
            GatewayError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                "Failed to complete an upstream request".to_string()
            }
            GatewayError::UpstreamTimeout(msg) => {
                tracing::error!("Upstream timeout: {}", msg);
                "An upstream request timed out".to_string()
            }
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.code(),
            "message": message,
        }))
    }
}

/// Failures building the application at startup. Fatal, never per-request.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("token store: {0}")]
    Store(#[from] l402::StoreError),

    #[error("root key: {0}")]
    RootKey(#[from] l402::RootKeyError),

    #[error("http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    fn body_text(err: &GatewayError) -> String {
        let resp = err.error_response();
        let bytes = resp.into_body().try_into_bytes().unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GatewayError::MissingParameter("url"), 400),
            (GatewayError::InvalidUrl("x".into()), 400),
            (GatewayError::PreimageMismatch, 400),
            (GatewayError::Unauthorized, 401),
            (GatewayError::NotFound("x".into()), 404),
            (GatewayError::Upstream("x".into()), 500),
            (GatewayError::Internal("x".into()), 500),
            (GatewayError::UpstreamTimeout("x".into()), 504),
        ];
        for (err, status) in cases {
            assert_eq!(err.error_response().status().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn test_upstream_text_is_not_echoed() {
        let err = GatewayError::Upstream("provider said: secret-node-id".into());
        let body = body_text(&err);
        assert!(!body.contains("secret-node-id"));
        assert!(body.contains("upstream_error"));
    }
}
