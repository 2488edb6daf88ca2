use l402::{LightningAddress, RootKey, DEFAULT_TOKEN_TTL_SECS, DEFAULT_UPSTREAM_TIMEOUT_SECS};
use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PRICE_MSAT: u64 = 10_000;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RATE_LIMIT_RPM: u32 = 60;

#[derive(Clone)]
pub struct GatewayConfig {
    /// Payee Lightning Address resolved through LNURL-pay
    pub lightning_address: String,
    /// Price of one access, in millisatoshis
    pub price_msat: u64,
    /// Hex signing secret (None = random per process start)
    pub root_key: Option<String>,
    /// Lifetime of a challenge and its token
    pub token_ttl: Duration,
    /// Whether a settled token may be used until it expires
    pub multi_use: bool,
    /// SQLite token store path (None = in-memory)
    pub token_db_path: Option<String>,
    /// Bound on LNURL calls and token store lookups
    pub upstream_timeout: Duration,
    /// Bound on fetching the protected resource
    pub fetch_timeout: Duration,
    /// HMAC key for the settlement webhook (None = webhook disabled)
    pub settlement_secret: Option<Vec<u8>>,
    /// Server port
    pub port: u16,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute
    pub rate_limit_rpm: u32,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("lightning_address", &self.lightning_address)
            .field("price_msat", &self.price_msat)
            .field("root_key", &self.root_key.as_ref().map(|_| "[REDACTED]"))
            .field("token_ttl", &self.token_ttl)
            .field("multi_use", &self.multi_use)
            .field("token_db_path", &self.token_db_path)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("fetch_timeout", &self.fetch_timeout)
            .field(
                "settlement_secret",
                &self.settlement_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        // Required: payee address
        let lightning_address =
            get("LIGHTNING_ADDRESS").ok_or(ConfigError::MissingRequired("LIGHTNING_ADDRESS"))?;
        lightning_address
            .parse::<LightningAddress>()
            .map_err(|e| ConfigError::invalid("LIGHTNING_ADDRESS", e))?;

        let price_msat = parse_or("PRICE_MSAT", get("PRICE_MSAT"), DEFAULT_PRICE_MSAT)?;
        if price_msat == 0 {
            return Err(ConfigError::invalid("PRICE_MSAT", "must be greater than zero"));
        }

        // Optional: signing secret. Validate now so a bad key fails startup.
        let root_key = get("L402_ROOT_KEY");
        if let Some(ref hex_key) = root_key {
            RootKey::from_hex(hex_key).map_err(|e| ConfigError::invalid("L402_ROOT_KEY", e))?;
        }

        let token_ttl_secs: u64 =
            parse_or("TOKEN_TTL_SECS", get("TOKEN_TTL_SECS"), DEFAULT_TOKEN_TTL_SECS)?;
        if token_ttl_secs == 0 {
            return Err(ConfigError::invalid("TOKEN_TTL_SECS", "must be greater than zero"));
        }

        let multi_use = match get("TOKEN_MULTI_USE").as_deref() {
            None => true,
            Some("true" | "1") => true,
            Some("false" | "0") => false,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "TOKEN_MULTI_USE",
                    format!("expected true or false, got {other}"),
                ))
            }
        };

        let token_db_path = get("TOKEN_DB_PATH");

        let upstream_timeout_secs: u64 = parse_or(
            "UPSTREAM_TIMEOUT_SECS",
            get("UPSTREAM_TIMEOUT_SECS"),
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?;
        let fetch_timeout_secs: u64 = parse_or(
            "FETCH_TIMEOUT_SECS",
            get("FETCH_TIMEOUT_SECS"),
            DEFAULT_FETCH_TIMEOUT_SECS,
        )?;

        let settlement_secret = get("SETTLEMENT_SECRET").map(String::into_bytes);
        if let Some(ref secret) = settlement_secret {
            if secret.len() < 32 {
                tracing::warn!(
                    "SETTLEMENT_SECRET is too short ({} bytes, minimum 32), \
                     use `openssl rand -hex 32` to generate a secure secret",
                    secret.len()
                );
            }
        }

        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;

        let allowed_origins: Vec<String> = get("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let rate_limit_rpm: u32 =
            parse_or("RATE_LIMIT_RPM", get("RATE_LIMIT_RPM"), DEFAULT_RATE_LIMIT_RPM)?;
        if rate_limit_rpm == 0 {
            return Err(ConfigError::invalid("RATE_LIMIT_RPM", "must be greater than zero"));
        }

        let metrics_token = get("METRICS_TOKEN");
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            lightning_address,
            price_msat,
            root_key,
            token_ttl: Duration::from_secs(token_ttl_secs),
            multi_use,
            token_db_path,
            upstream_timeout: Duration::from_secs(upstream_timeout_secs),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            settlement_secret,
            port,
            allowed_origins,
            rate_limit_rpm,
            metrics_token,
        })
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.parse().map_err(|e| ConfigError::invalid(var, e)),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl std::fmt::Display) -> Self {
        ConfigError::Invalid {
            var,
            reason: reason.to_string(),
        }
    }
}
