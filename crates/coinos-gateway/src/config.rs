//! Gateway configuration

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// How order totals become satoshi amounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionPolicy {
    /// Convert locally with the cached BTC price and request satoshis
    ClientConverts,
    /// Request a fiat amount and let Coinos convert it
    #[default]
    ProviderConverts,
}

impl FromStr for ConversionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client_converts" | "client" => Ok(Self::ClientConverts),
            "provider_converts" | "provider" => Ok(Self::ProviderConverts),
            other => Err(Error::Config(format!("unknown conversion policy: {}", other))),
        }
    }
}

impl fmt::Display for ConversionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionPolicy::ClientConverts => write!(f, "client_converts"),
            ConversionPolicy::ProviderConverts => write!(f, "provider_converts"),
        }
    }
}

/// Coinos gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Coinos API token
    #[serde(default)]
    pub api_key: String,
    /// Coinos API base URL
    /// Default is https://coinos.io/api
    #[serde(default)]
    pub api_url: Option<String>,
    /// Coinos request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Public base URL of this gateway, used for webhook callbacks
    #[serde(default)]
    pub public_url: Option<String>,
    /// Ask Coinos to call the webhook when an invoice is paid
    /// Default is true
    #[serde(default = "default_webhook_enabled")]
    pub webhook_enabled: bool,
    /// Secret for webhook signature verification
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Path the webhook is served on
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Invoice amount conversion policy
    #[serde(default)]
    pub conversion_policy: ConversionPolicy,
    /// Currency order totals are expressed in
    #[serde(default = "default_store_currency")]
    pub store_currency: String,
    /// Price feed URL, `None` disables the feed
    #[serde(default = "default_price_feed_url")]
    pub price_feed_url: Option<String>,
    /// JSON pointer to the price in the feed response
    /// Default is /bitcoin/usd, which only suits USD stores
    #[serde(default)]
    pub price_feed_pointer: Option<String>,
    /// Price feed timeout in milliseconds
    #[serde(default = "default_price_feed_timeout_ms")]
    pub price_feed_timeout_ms: u64,
    /// Last resort BTC price when no rate is available
    #[serde(default = "default_fallback_btc_price")]
    pub fallback_btc_price: f64,
    /// Secret for checkout nonces, generated per process when unset
    #[serde(default)]
    pub nonce_secret: Option<String>,
    /// How long a checkout nonce stays valid
    #[serde(default = "default_nonce_lifetime_secs")]
    pub nonce_lifetime_secs: u64,
    /// Bearer token for admin and order intake endpoints, unset disables them
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Poll interval suggested to checkout pages
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_timeout_ms() -> u64 {
    coinos_api::DEFAULT_TIMEOUT_MS
}

fn default_webhook_enabled() -> bool {
    true
}

fn default_webhook_path() -> String {
    "/coinos/webhook".to_string()
}

fn default_store_currency() -> String {
    "USD".to_string()
}

fn default_price_feed_url() -> Option<String> {
    Some("https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd".to_string())
}

const DEFAULT_PRICE_FEED_POINTER: &str = "/bitcoin/usd";

fn default_price_feed_timeout_ms() -> u64 {
    5_000
}

fn default_fallback_btc_price() -> f64 {
    40_000.0
}

fn default_nonce_lifetime_secs() -> u64 {
    86_400 // 1 day
}

fn default_listen_addr() -> String {
    "127.0.0.1:8085".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: None,
            timeout_ms: default_timeout_ms(),
            public_url: None,
            webhook_enabled: default_webhook_enabled(),
            webhook_secret: None,
            webhook_path: default_webhook_path(),
            conversion_policy: ConversionPolicy::default(),
            store_currency: default_store_currency(),
            price_feed_url: default_price_feed_url(),
            price_feed_pointer: None,
            price_feed_timeout_ms: default_price_feed_timeout_ms(),
            fallback_btc_price: default_fallback_btc_price(),
            nonce_secret: None,
            nonce_lifetime_secs: default_nonce_lifetime_secs(),
            admin_token: None,
            listen_addr: default_listen_addr(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the configuration is usable
    ///
    /// A missing API key is not an error here. Invoice creation reports it
    /// instead so the gateway can start before it is configured.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(api_url) = &self.api_url {
            Url::parse(api_url).map_err(|e| Error::Config(format!("invalid api_url: {}", e)))?;
        }

        if self.webhook_enabled {
            let public_url = self.public_url.as_deref().ok_or_else(|| {
                Error::Config("public_url is required when the webhook is enabled".to_string())
            })?;
            Url::parse(public_url)
                .map_err(|e| Error::Config(format!("invalid public_url: {}", e)))?;

            if self.webhook_secret.as_deref().map_or(true, str::is_empty) {
                return Err(Error::Config(
                    "webhook_secret is required when the webhook is enabled".to_string(),
                ));
            }
        }

        if !self.webhook_path.starts_with('/') {
            return Err(Error::Config("webhook_path must start with '/'".to_string()));
        }

        if self.store_currency.trim().is_empty() {
            return Err(Error::Config("store_currency is empty".to_string()));
        }

        if self.conversion_policy == ConversionPolicy::ClientConverts
            && self.price_feed_url.is_some()
            && self.price_feed_pointer.is_none()
            && !self.store_currency.trim().eq_ignore_ascii_case("USD")
        {
            return Err(Error::Config(format!(
                "price_feed_pointer must be set for {} prices",
                self.store_currency
            )));
        }

        if !self.fallback_btc_price.is_finite() || self.fallback_btc_price <= 0.0 {
            return Err(Error::Config(
                "fallback_btc_price must be positive".to_string(),
            ));
        }

        if self.timeout_ms == 0 || self.price_feed_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }

        if self.nonce_lifetime_secs < 2 {
            return Err(Error::Config(
                "nonce_lifetime_secs must be at least 2".to_string(),
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".to_string()));
        }

        self.listen_addr()?;

        Ok(())
    }

    /// JSON pointer used to read the price feed
    pub fn price_feed_pointer(&self) -> &str {
        self.price_feed_pointer
            .as_deref()
            .unwrap_or(DEFAULT_PRICE_FEED_POINTER)
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr, Error> {
        self.listen_addr
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen_addr: {}", e)))
    }
}
