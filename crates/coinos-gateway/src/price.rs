//! BTC price lookup
//!
//! [`PriceCache::get_rate`] never fails. It prefers a rate Coinos echoed on a
//! recent invoice, then a recent price feed result, then a fresh feed call, and
//! finally the configured fallback constant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long a cached rate stays valid
pub const RATE_TTL: Duration = Duration::from_secs(300);

/// Source of BTC prices in the store currency
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch the current price of one BTC
    async fn fetch_btc_price(&self) -> anyhow::Result<f64>;
}

/// Price feed reading one numeric field from a JSON endpoint
#[derive(Debug, Clone)]
pub struct HttpPriceFeed {
    client: reqwest::Client,
    url: String,
    pointer: String,
}

impl HttpPriceFeed {
    /// Create a feed for `url`, reading the value at JSON `pointer`
    pub fn new(url: &str, pointer: &str, timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            pointer: pointer.to_string(),
        })
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn fetch_btc_price(&self) -> anyhow::Result<f64> {
        debug!("GET {}", self.url);

        let json: serde_json::Value = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let value = json
            .pointer(&self.pointer)
            .ok_or_else(|| anyhow::anyhow!("Price feed response has no {}", self.pointer))?;

        let price = match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| anyhow::anyhow!("Price feed value is not a number: {}", value))?;

        if !price.is_finite() || price <= 0.0 {
            anyhow::bail!("Price feed returned invalid price {}", price);
        }

        Ok(price)
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: f64,
    fetched_at: Instant,
}

impl CachedRate {
    fn fresh(&self, now: Instant) -> Option<f64> {
        (now.saturating_duration_since(self.fetched_at) < RATE_TTL).then_some(self.rate)
    }
}

/// Process-wide cached BTC price
#[derive(Clone)]
pub struct PriceCache {
    feed: Option<Arc<dyn PriceFeed>>,
    fallback: f64,
    invoice_rate: Arc<RwLock<Option<CachedRate>>>,
    feed_rate: Arc<RwLock<Option<CachedRate>>>,
}

impl PriceCache {
    /// Create a cache backed by an optional feed
    pub fn new(feed: Option<Arc<dyn PriceFeed>>, fallback: f64) -> Self {
        Self {
            feed,
            fallback,
            invoice_rate: Arc::new(RwLock::new(None)),
            feed_rate: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember the rate Coinos used for an invoice
    pub fn record_invoice_rate(&self, rate: f64) {
        if !rate.is_finite() || rate <= 0.0 {
            return;
        }
        *self.invoice_rate.write() = Some(CachedRate {
            rate,
            fetched_at: Instant::now(),
        });
    }

    /// Current BTC price, always positive
    pub async fn get_rate(&self) -> f64 {
        let now = Instant::now();

        let invoice_rate = *self.invoice_rate.read();
        if let Some(rate) = invoice_rate.and_then(|c| c.fresh(now)) {
            return rate;
        }
        let feed_rate = *self.feed_rate.read();
        if let Some(rate) = feed_rate.and_then(|c| c.fresh(now)) {
            return rate;
        }

        if let Some(feed) = &self.feed {
            match feed.fetch_btc_price().await {
                Ok(rate) => {
                    debug!("Fetched BTC price {}", rate);
                    *self.feed_rate.write() = Some(CachedRate {
                        rate,
                        fetched_at: Instant::now(),
                    });
                    return rate;
                }
                Err(e) => {
                    warn!("Price feed failed, using fallback rate: {}", e);
                }
            }
        }

        self.fallback
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingFeed {
        calls: AtomicUsize,
        price: Option<f64>,
    }

    #[async_trait]
    impl PriceFeed for CountingFeed {
        async fn fetch_btc_price(&self) -> anyhow::Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.price.ok_or_else(|| anyhow::anyhow!("feed down"))
        }
    }

    fn feed(price: Option<f64>) -> Arc<CountingFeed> {
        Arc::new(CountingFeed {
            calls: AtomicUsize::new(0),
            price,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_rate_expires_after_ttl() {
        let feed = feed(Some(50_000.0));
        let cache = PriceCache::new(Some(feed.clone()), 40_000.0);

        assert_eq!(cache.get_rate().await, 50_000.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get_rate().await, 50_000.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_rate().await, 50_000.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoice_rate_preferred() {
        let feed = feed(Some(50_000.0));
        let cache = PriceCache::new(Some(feed.clone()), 40_000.0);

        cache.record_invoice_rate(61_000.0);
        assert_eq!(cache.get_rate().await, 61_000.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get_rate().await, 50_000.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_when_feed_fails() {
        let feed = feed(None);
        let cache = PriceCache::new(Some(feed.clone()), 40_000.0);

        assert_eq!(cache.get_rate().await, 40_000.0);
        // Failures are not cached
        assert_eq!(cache.get_rate().await, 40_000.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);

        let cache = PriceCache::new(None, 40_000.0);
        cache.record_invoice_rate(-1.0);
        assert_eq!(cache.get_rate().await, 40_000.0);
    }

    async fn serve_feed() -> String {
        use axum::{http::StatusCode, routing::get, Json, Router};
        use serde_json::json;

        let router = Router::new()
            .route("/number", get(|| async { Json(json!({"bitcoin": {"usd": 65_000.5}})) }))
            .route("/string", get(|| async { Json(json!({"bitcoin": {"usd": " 64000 "}})) }))
            .route("/missing", get(|| async { Json(json!({"bitcoin": {}})) }))
            .route("/zero", get(|| async { Json(json!({"bitcoin": {"usd": 0}})) }))
            .route("/text", get(|| async { Json(json!({"bitcoin": {"usd": "n/a"}})) }))
            .route(
                "/error",
                get(|| async {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"bitcoin": {"usd": 1.0}})),
                    )
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn http_feed(base: &str, path: &str) -> HttpPriceFeed {
        HttpPriceFeed::new(&format!("{}{}", base, path), "/bitcoin/usd", 5_000).unwrap()
    }

    #[tokio::test]
    async fn test_http_feed_reads_pointer() {
        let base = serve_feed().await;

        assert_eq!(
            http_feed(&base, "/number").fetch_btc_price().await.unwrap(),
            65_000.5
        );
        assert_eq!(
            http_feed(&base, "/string").fetch_btc_price().await.unwrap(),
            64_000.0
        );

        let other_pointer =
            HttpPriceFeed::new(&format!("{}/number", base), "/bitcoin/eur", 5_000).unwrap();
        assert!(other_pointer.fetch_btc_price().await.is_err());
    }

    #[tokio::test]
    async fn test_http_feed_rejects_bad_prices() {
        let base = serve_feed().await;

        for path in ["/missing", "/zero", "/text", "/error"] {
            assert!(
                http_feed(&base, path).fetch_btc_price().await.is_err(),
                "{} should fail",
                path
            );
        }

        // A failing feed leaves the cache on its fallback
        let cache = PriceCache::new(Some(Arc::new(http_feed(&base, "/error"))), 40_000.0);
        assert_eq!(cache.get_rate().await, 40_000.0);

        let cache = PriceCache::new(Some(Arc::new(http_feed(&base, "/number"))), 40_000.0);
        assert_eq!(cache.get_rate().await, 65_000.5);
    }
}
