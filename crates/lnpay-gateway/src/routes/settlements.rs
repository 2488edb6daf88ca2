use actix_web::{web, HttpRequest, HttpResponse};
use l402::{PaymentHash, Preimage};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::gate::SettleOutcome;
use crate::metrics::HMAC_FAILURES;
use crate::state::AppState;

/// Header carrying `hex(HMAC-SHA256(SETTLEMENT_SECRET, body))`.
pub const SETTLEMENT_AUTH_HEADER: &str = "X-Settlement-Auth";

#[derive(Deserialize)]
pub struct SettlementNotice {
    pub payment_hash: PaymentHash,
    #[serde(default)]
    pub preimage: Option<String>,
}

fn validate_hmac(req: &HttpRequest, body: &[u8], secret: &[u8]) -> Result<(), GatewayError> {
    match req
        .headers()
        .get(SETTLEMENT_AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(sig) if l402::hmac::verify_hmac(secret, body, sig) => Ok(()),
        Some(_) => {
            tracing::warn!("settlement webhook HMAC mismatch");
            HMAC_FAILURES.with_label_values(&["invalid"]).inc();
            Err(GatewayError::Unauthorized)
        }
        None => {
            tracing::warn!("settlement webhook called without HMAC header");
            HMAC_FAILURES.with_label_values(&["missing"]).inc();
            Err(GatewayError::Unauthorized)
        }
    }
}

/// POST /settlements - a trusted payment watcher reports a settled invoice
pub async fn record_settlement(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    let Some(ref secret) = state.config.settlement_secret else {
        return Err(GatewayError::NotFound(
            "settlement webhook is not enabled".to_string(),
        ));
    };
    validate_hmac(&req, &body, secret)?;

    let notice: SettlementNotice = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidBody(e.to_string()))?;
    let preimage = match notice.preimage.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => Some(p.parse::<Preimage>().map_err(|_| {
            GatewayError::InvalidBody("preimage must be 32 hex-encoded bytes".to_string())
        })?),
        None => None,
    };

    match state.gate.settle(notice.payment_hash, preimage).await? {
        SettleOutcome::Settled => Ok(HttpResponse::Ok().json(serde_json::json!({
            "settled": true,
            "payment_hash": notice.payment_hash,
        }))),
        SettleOutcome::UnknownPaymentHash => Err(GatewayError::NotFound(format!(
            "no challenge for payment hash {}",
            notice.payment_hash
        ))),
        SettleOutcome::PreimageMismatch => Err(GatewayError::PreimageMismatch),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/settlements", web::post().to(record_settlement));
}
