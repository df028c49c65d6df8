//! Coinos Lightning payment gateway
//!
//! Accepts Lightning payments for web store orders through the Coinos API.
//! Invoices are issued per order and confirmed by either a Coinos webhook or a
//! checkout page poll, whichever arrives first. An order is marked paid once.
//!
//! # Components
//!
//! - [`issuer::InvoiceIssuer`] creates invoices and stores them as
//!   [`record::PaymentRecord`]s
//! - [`price::PriceCache`] supplies BTC prices for local conversion
//! - [`reconcile::ReconciliationEngine`] applies webhook and poll results
//! - [`server`] and [`webhook`] expose them over HTTP

use std::sync::Arc;

use coinos_api::{Account, CoinosApi};
use tracing::{error, info, warn};

pub mod config;
pub mod database;
pub mod env_vars;
pub mod error;
pub mod issuer;
pub mod nonce;
pub mod order;
pub mod price;
pub mod provider;
pub mod reconcile;
pub mod record;
pub mod server;
pub mod util;
pub mod webhook;

#[cfg(test)]
mod test_utils;

pub use config::{ConversionPolicy, GatewayConfig};
pub use error::Error;

use crate::database::DynKVStore;
use crate::issuer::InvoiceIssuer;
use crate::nonce::NonceIssuer;
use crate::order::DynOrderStore;
use crate::price::{HttpPriceFeed, PriceCache, PriceFeed};
use crate::provider::DynLightningProvider;
use crate::reconcile::ReconciliationEngine;
use crate::record::PaymentRecordStore;

/// Wired gateway components
#[derive(Clone)]
pub struct CoinosGateway {
    config: Arc<GatewayConfig>,
    orders: DynOrderStore,
    provider: Option<DynLightningProvider>,
    prices: PriceCache,
    issuer: InvoiceIssuer,
    engine: ReconciliationEngine,
    nonces: NonceIssuer,
}

impl CoinosGateway {
    /// Create a gateway talking to Coinos
    ///
    /// A client that cannot be built is logged and reported later as
    /// [`Error::ClientNotInitialized`] so the rest of the gateway still starts.
    pub fn new(
        config: GatewayConfig,
        kv_store: DynKVStore,
        orders: DynOrderStore,
    ) -> Result<Self, Error> {
        let provider: Option<DynLightningProvider> = if config.api_key.trim().is_empty() {
            warn!("Coinos API key is not configured");
            None
        } else {
            match CoinosApi::new(&config.api_key, config.api_url.as_deref(), config.timeout_ms) {
                Ok(api) => Some(Arc::new(api)),
                Err(e) => {
                    error!("Could not create Coinos API client: {}", e);
                    None
                }
            }
        };

        let feed: Option<Arc<dyn PriceFeed>> = match config.price_feed_url.as_deref() {
            Some(url) => match HttpPriceFeed::new(
                url,
                config.price_feed_pointer(),
                config.price_feed_timeout_ms,
            ) {
                Ok(feed) => Some(Arc::new(feed)),
                Err(e) => {
                    warn!("Price feed disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        Self::with_parts(config, kv_store, orders, provider, feed)
    }

    /// Create a gateway from explicit parts
    pub fn with_parts(
        config: GatewayConfig,
        kv_store: DynKVStore,
        orders: DynOrderStore,
        provider: Option<DynLightningProvider>,
        feed: Option<Arc<dyn PriceFeed>>,
    ) -> Result<Self, Error> {
        let prices = PriceCache::new(feed, config.fallback_btc_price);
        let records = PaymentRecordStore::new(kv_store);

        let engine = ReconciliationEngine::new(orders.clone(), records.clone(), provider.clone());
        let issuer = InvoiceIssuer::new(
            &config,
            provider.clone(),
            records,
            orders.clone(),
            prices.clone(),
            engine.clone(),
        )?;

        let nonces = match config.nonce_secret.as_deref() {
            Some(secret) => NonceIssuer::new(secret.as_bytes(), config.nonce_lifetime_secs),
            None => NonceIssuer::random(config.nonce_lifetime_secs),
        };

        info!(
            "Coinos gateway ready (policy: {}, webhook: {})",
            config.conversion_policy, config.webhook_enabled
        );

        Ok(Self {
            config: Arc::new(config),
            orders,
            provider,
            prices,
            issuer,
            engine,
            nonces,
        })
    }

    /// Gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Order store
    pub fn orders(&self) -> &DynOrderStore {
        &self.orders
    }

    /// Price cache
    pub fn prices(&self) -> &PriceCache {
        &self.prices
    }

    /// Invoice issuer
    pub fn issuer(&self) -> &InvoiceIssuer {
        &self.issuer
    }

    /// Reconciliation engine
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    /// Checkout nonce issuer
    pub fn nonces(&self) -> &NonceIssuer {
        &self.nonces
    }

    /// Check the configured credentials against Coinos
    pub async fn test_api_connection(&self) -> Result<Account, Error> {
        if self.config.api_key.trim().is_empty() {
            return Err(Error::MissingApiKey);
        }
        let provider = self.provider.as_ref().ok_or(Error::ClientNotInitialized)?;
        Ok(provider.get_account().await?)
    }
}
