pub mod fetch;
pub mod health;
pub mod settlements;

use actix_web::web;

/// Mount every gateway route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(fetch::configure)
        .configure(settlements::configure);
}
