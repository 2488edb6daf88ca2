use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::LazyLock;

pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "l402_gateway_requests_total",
        "Total requests to protected resources",
        &["path", "status"]
    )
    .unwrap()
});

pub static CHALLENGES_ISSUED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "l402_gateway_challenges_total",
        "Payment challenges returned",
        &["kind"]
    )
    .unwrap()
});

pub static VERIFICATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "l402_gateway_verifications_total",
        "Token verification outcomes",
        &["result"]
    )
    .unwrap()
});

pub static SETTLEMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "l402_gateway_settlements_total",
        "Payments observed as settled, by source",
        &["source"]
    )
    .unwrap()
});

pub static UPSTREAM_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "l402_gateway_upstream_duration_seconds",
        "Latency of LNURL and content fetch calls",
        &["call", "result"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap()
});

pub static HMAC_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "l402_gateway_hmac_failures_total",
        "Settlement webhook authentication failures",
        &["reason"]
    )
    .unwrap()
});

/// Force registration so every family shows up on the first scrape.
pub fn register_metrics() {
    LazyLock::force(&REQUESTS_TOTAL);
    LazyLock::force(&CHALLENGES_ISSUED);
    LazyLock::force(&VERIFICATIONS);
    LazyLock::force(&SETTLEMENTS);
    LazyLock::force(&UPSTREAM_LATENCY);
    LazyLock::force(&HMAC_FAILURES);
}

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
