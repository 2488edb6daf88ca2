pub mod config;
pub mod cors;
pub mod error;
pub mod gate;
pub mod invoice_source;
pub mod metrics;
pub mod resource;
pub mod routes;
pub mod state;
pub mod validation;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gate::{AuthorizationGate, GateDecision};
pub use state::AppState;
