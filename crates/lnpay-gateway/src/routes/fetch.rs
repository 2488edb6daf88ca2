use actix_web::{http::header, web, HttpRequest, HttpResponse, ResponseError};
use serde::Deserialize;
use std::time::Instant;

use crate::error::GatewayError;
use crate::gate::GateDecision;
use crate::metrics::{REQUESTS_TOTAL, UPSTREAM_LATENCY};
use crate::state::AppState;
use crate::validation::validate_target_url;

/// Resource path every token is bound to.
pub const FETCH_PATH: &str = "/fetch-url-content";

#[derive(Deserialize)]
pub struct FetchQuery {
    pub url: Option<String>,
}

/// GET /fetch-url-content?url=<target> - paid access to a URL's content
pub async fn fetch_url_content(
    req: HttpRequest,
    query: web::Query<FetchQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let result = handle(&req, query.into_inner(), &state).await;
    let status = match &result {
        Ok(resp) => resp.status().as_u16(),
        Err(e) => e.status_code().as_u16(),
    };
    let status = status.to_string();
    REQUESTS_TOTAL
        .with_label_values(&[FETCH_PATH, status.as_str()])
        .inc();
    result
}

async fn handle(
    req: &HttpRequest,
    query: FetchQuery,
    state: &AppState,
) -> Result<HttpResponse, GatewayError> {
    // Request shape first: no authorization work for a bad request.
    let target = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(GatewayError::MissingParameter("url"))?;
    let target = validate_target_url(target)?;

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let payment_hash = match state.gate.authorize(authorization, FETCH_PATH).await? {
        GateDecision::Admit { payment_hash } => payment_hash,
        GateDecision::Challenge { challenge, reason } => {
            return Ok(HttpResponse::PaymentRequired()
                .insert_header((header::WWW_AUTHENTICATE, challenge.header_value()))
                .json(serde_json::json!({
                    "error": "payment_required",
                    "message": "Pay the invoice and retry with Authorization: L402 <token>:<preimage>",
                    "reason": reason,
                    "invoice": challenge.invoice,
                    "payment_hash": challenge.payment_hash,
                    "price_msat": challenge.price_msat,
                    "expires_at": challenge.expires_at,
                })));
        }
    };

    let started = Instant::now();
    let fetched = state.fetcher.fetch(&target).await;
    UPSTREAM_LATENCY
        .with_label_values(&["fetch", if fetched.is_ok() { "ok" } else { "error" }])
        .observe(started.elapsed().as_secs_f64());
    let fetched = fetched.map_err(|e| {
        tracing::warn!(payment_hash = %payment_hash, url = %target, error = %e, "paid fetch failed");
        GatewayError::from(e)
    })?;

    tracing::info!(
        payment_hash = %payment_hash,
        url = %target,
        status = fetched.status,
        bytes = fetched.body.len(),
        "served paid fetch"
    );

    let status = actix_web::http::StatusCode::from_u16(fetched.status)
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);
    if let Some(content_type) = fetched.content_type {
        builder.insert_header((header::CONTENT_TYPE, content_type));
    }
    Ok(builder.body(fetched.body))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(FETCH_PATH, web::get().to(fetch_url_content));
}
