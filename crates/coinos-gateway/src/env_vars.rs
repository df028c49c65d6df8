//! Gateway environment variables

use std::env;

use tracing::warn;

use crate::config::GatewayConfig;

pub const ENV_API_KEY: &str = "COINOS_GATEWAY_API_KEY";
pub const ENV_API_URL: &str = "COINOS_GATEWAY_API_URL";
pub const ENV_TIMEOUT_MS: &str = "COINOS_GATEWAY_TIMEOUT_MS";
pub const ENV_PUBLIC_URL: &str = "COINOS_GATEWAY_PUBLIC_URL";
pub const ENV_WEBHOOK_ENABLED: &str = "COINOS_GATEWAY_WEBHOOK_ENABLED";
pub const ENV_WEBHOOK_SECRET: &str = "COINOS_GATEWAY_WEBHOOK_SECRET";
pub const ENV_WEBHOOK_PATH: &str = "COINOS_GATEWAY_WEBHOOK_PATH";
pub const ENV_CONVERSION_POLICY: &str = "COINOS_GATEWAY_CONVERSION_POLICY";
pub const ENV_STORE_CURRENCY: &str = "COINOS_GATEWAY_STORE_CURRENCY";
pub const ENV_PRICE_FEED_URL: &str = "COINOS_GATEWAY_PRICE_FEED_URL";
pub const ENV_PRICE_FEED_POINTER: &str = "COINOS_GATEWAY_PRICE_FEED_POINTER";
pub const ENV_FALLBACK_BTC_PRICE: &str = "COINOS_GATEWAY_FALLBACK_BTC_PRICE";
pub const ENV_NONCE_SECRET: &str = "COINOS_GATEWAY_NONCE_SECRET";
pub const ENV_NONCE_LIFETIME_SECS: &str = "COINOS_GATEWAY_NONCE_LIFETIME_SECS";
pub const ENV_ADMIN_TOKEN: &str = "COINOS_GATEWAY_ADMIN_TOKEN";
pub const ENV_LISTEN_ADDR: &str = "COINOS_GATEWAY_LISTEN_ADDR";
pub const ENV_POLL_INTERVAL_SECS: &str = "COINOS_GATEWAY_POLL_INTERVAL_SECS";

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {}", name, value);
            None
        }
    }
}

fn optional(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl GatewayConfig {
    /// Override settings from `COINOS_GATEWAY_*` environment variables
    pub fn from_env(mut self) -> Self {
        if let Ok(api_key) = env::var(ENV_API_KEY) {
            self.api_key = api_key;
        }

        if let Ok(api_url) = env::var(ENV_API_URL) {
            self.api_url = optional(api_url);
        }

        if let Some(timeout_ms) = parse_var(ENV_TIMEOUT_MS) {
            self.timeout_ms = timeout_ms;
        }

        if let Ok(public_url) = env::var(ENV_PUBLIC_URL) {
            self.public_url = optional(public_url);
        }

        if let Some(webhook_enabled) = parse_var(ENV_WEBHOOK_ENABLED) {
            self.webhook_enabled = webhook_enabled;
        }

        if let Ok(webhook_secret) = env::var(ENV_WEBHOOK_SECRET) {
            self.webhook_secret = optional(webhook_secret);
        }

        if let Ok(webhook_path) = env::var(ENV_WEBHOOK_PATH) {
            self.webhook_path = webhook_path;
        }

        if let Some(policy) = parse_var(ENV_CONVERSION_POLICY) {
            self.conversion_policy = policy;
        }

        if let Ok(store_currency) = env::var(ENV_STORE_CURRENCY) {
            self.store_currency = store_currency;
        }

        // An empty value disables the feed
        if let Ok(price_feed_url) = env::var(ENV_PRICE_FEED_URL) {
            self.price_feed_url = optional(price_feed_url);
        }

        if let Ok(pointer) = env::var(ENV_PRICE_FEED_POINTER) {
            self.price_feed_pointer = optional(pointer);
        }

        if let Some(price) = parse_var(ENV_FALLBACK_BTC_PRICE) {
            self.fallback_btc_price = price;
        }

        if let Ok(nonce_secret) = env::var(ENV_NONCE_SECRET) {
            self.nonce_secret = optional(nonce_secret);
        }

        if let Some(lifetime) = parse_var(ENV_NONCE_LIFETIME_SECS) {
            self.nonce_lifetime_secs = lifetime;
        }

        if let Ok(admin_token) = env::var(ENV_ADMIN_TOKEN) {
            self.admin_token = optional(admin_token);
        }

        if let Ok(listen_addr) = env::var(ENV_LISTEN_ADDR) {
            self.listen_addr = listen_addr;
        }

        if let Some(interval) = parse_var(ENV_POLL_INTERVAL_SECS) {
            self.poll_interval_secs = interval;
        }

        self
    }
}
