use l402::{
    InMemoryTokenStore, LnurlClient, ReqwestTransport, RootKey, SqliteTokenStore, TokenStore,
};
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::error::StartupError;
use crate::gate::AuthorizationGate;
use crate::invoice_source::{InvoiceSource, LnurlInvoiceSource};
use crate::resource::{ContentFetcher, HttpContentFetcher};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub gate: Arc<AuthorizationGate>,
    pub fetcher: Arc<dyn ContentFetcher>,
}

impl AppState {
    /// Wire up the production collaborators described by `config`.
    pub fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        let root_key = match config.root_key {
            Some(ref hex_key) => RootKey::from_hex(hex_key)?,
            None => {
                tracing::warn!(
                    "L402_ROOT_KEY not set, using a random key; issued tokens will not survive a restart"
                );
                RootKey::generate()
            }
        };

        let store: Arc<dyn TokenStore> = match config.token_db_path {
            Some(ref path) => {
                tracing::info!("Token store: sqlite at {}", path);
                Arc::new(SqliteTokenStore::open(path)?)
            }
            None => {
                tracing::info!("Token store: in-memory");
                Arc::new(InMemoryTokenStore::new())
            }
        };

        let http_client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .redirect(reqwest::redirect::Policy::none()) // Prevent SSRF via redirects
            .build()?;
        let lnurl = LnurlClient::new(
            Arc::new(ReqwestTransport::new(http_client)),
            config.upstream_timeout,
        );
        let invoices = Arc::new(LnurlInvoiceSource::new(
            lnurl,
            config.lightning_address.clone(),
        ));
        let fetcher = Arc::new(HttpContentFetcher::new(config.fetch_timeout));

        Ok(Self::from_parts(
            config,
            Arc::new(root_key),
            store,
            invoices,
            fetcher,
        ))
    }

    /// Assemble state from explicit collaborators.
    pub fn from_parts(
        config: GatewayConfig,
        root_key: Arc<RootKey>,
        store: Arc<dyn TokenStore>,
        invoices: Arc<dyn InvoiceSource>,
        fetcher: Arc<dyn ContentFetcher>,
    ) -> Self {
        let gate = AuthorizationGate::new(
            root_key,
            store,
            invoices,
            config.price_msat,
            config.token_ttl,
            config.multi_use,
            config.upstream_timeout,
        );
        Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            fetcher,
        }
    }
}
