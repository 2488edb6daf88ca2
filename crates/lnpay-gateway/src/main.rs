use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use l402_gateway::{config::GatewayConfig, metrics::register_metrics, routes, state::AppState};

/// How often expired challenges are purged from the token store.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = GatewayConfig::from_env().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::io::Error::other(e)
    })?;
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting l402-gateway on port {}", port);
    tracing::info!("Payee: {}", config.lightning_address);
    tracing::info!("Price: {} msat", config.price_msat);
    tracing::info!(
        "Tokens: ttl {}s, {}",
        config.token_ttl.as_secs(),
        if config.multi_use {
            "multi-use"
        } else {
            "single-use"
        }
    );
    tracing::info!(
        "Settlement webhook: {}",
        if config.settlement_secret.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    // Register Prometheus metrics
    register_metrics();

    // Create shared state
    let state = AppState::new(config).map_err(|e| {
        tracing::error!("Failed to initialize gateway: {}", e);
        std::io::Error::other(e)
    })?;

    // Periodically drop expired challenges
    let gate = state.gate.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match gate.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Purged {n} expired challenges"),
                Err(e) => tracing::warn!("Failed to purge expired challenges: {e}"),
            }
        }
    });

    let state_data = web::Data::new(state);

    // Configure rate limiter
    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .ok_or_else(|| std::io::Error::other("invalid rate limiter configuration"))?;

    // Start HTTP server
    HttpServer::new(move || {
        let cors = l402_gateway::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(64 * 1024))
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Governor::new(&governor_conf))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
