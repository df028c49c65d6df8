//! Coinos API client
//!
//! Client for the Coinos REST API (<https://coinos.io/docs>), covering the
//! subset a web store needs to receive Lightning payments and manage the
//! receiving account.
//!
//! # Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | POST | `/invoice` | Create a Lightning or on-chain invoice |
//! | GET | `/invoice/{hash}` | Get invoice by hash |
//! | GET | `/me` | Account details (also used as a credential check) |
//! | POST | `/payments` | Pay a BOLT11 invoice |
//! | POST | `/send` | Send to another Coinos user |
//! | POST | `/bitcoin/send` | Send on-chain |
//! | GET | `/payments` | Payment history |
//!
//! **Invoice Flow:**
//! 1. Create invoice (`received == 0`), optionally with a webhook URL
//! 2. Payer pays the BOLT11 in `text`
//! 3. Coinos calls the webhook and `received` becomes positive
//!
//! # Authentication
//!
//! All requests use Bearer token authentication with the account's API token
//! (a JWT issued in the Coinos settings page).

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod error;
pub mod types;

use std::time::Duration;

pub use error::{CoinosApiError, Error};
use reqwest::{Client, Method};
use serde::Serialize;
use tracing::{debug, warn};
pub use types::*;
use url::Url;

/// Default Coinos API base URL
pub const DEFAULT_API_URL: &str = "https://coinos.io/api/";

/// Default request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Coinos API client
#[derive(Debug, Clone)]
pub struct CoinosApi {
    api_key: String,
    base_url: Url,
    client: Client,
}

impl CoinosApi {
    /// Create a new Coinos API client
    ///
    /// `api_url` defaults to [`DEFAULT_API_URL`]. Every request is bounded by
    /// `timeout_ms`.
    pub fn new(api_key: &str, api_url: Option<&str>, timeout_ms: u64) -> Result<Self, Error> {
        if api_key.trim().is_empty() {
            return Err(Error::InvalidRequest("API key is empty".to_string()));
        }

        let base_url = api_url.unwrap_or(DEFAULT_API_URL);
        // Paths are joined relative to the base, so it must end in a slash
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            api_key: api_key.to_string(),
            base_url,
            client,
        })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send a request and return the decoded JSON body
    ///
    /// The body is only serialized for POST, PUT and PATCH. Non-2xx responses
    /// are returned as [`Error::NotFound`] or [`Error::Api`].
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<serde_json::Value, Error> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        self.send(method, url, body).await
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&T>,
    ) -> Result<serde_json::Value, Error> {
        debug!("{} {}", method, url);

        let sends_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);

        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");

        if let (true, Some(body)) = (sends_body, body) {
            request = request.json(body);
        }

        let response = request.send().await?;

        self.handle_response(response).await
    }

    /// Make a GET request
    async fn get(&self, path: &str) -> Result<serde_json::Value, Error> {
        self.request::<()>(Method::GET, path, None).await
    }

    /// Make a POST request
    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<serde_json::Value, Error> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Handle API response
    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> Result<serde_json::Value, Error> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(serde_json::Value::Null);
            }
            let json: serde_json::Value = serde_json::from_str(&text)?;
            Ok(json)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::NotFound)
        } else {
            warn!("Coinos API error: {} - {}", status, text);
            Err(Error::Api(CoinosApiError::from_response(
                status.as_u16(),
                &text,
            )))
        }
    }

    // ==================== Invoice Endpoints ====================

    /// Create an invoice
    pub async fn create_invoice(&self, request: InvoiceRequest) -> Result<Invoice, Error> {
        let json = self.post("invoice", &request).await?;
        Ok(serde_json::from_value(json)?)
    }

    /// Get an invoice by payment hash (or address for on-chain invoices)
    pub async fn get_invoice(&self, hash: &str) -> Result<Invoice, Error> {
        if hash.is_empty() {
            return Err(Error::InvalidRequest("invoice hash is empty".to_string()));
        }

        let url = self.invoice_url(hash)?;
        let json = self.send::<()>(Method::GET, url, None).await?;
        Ok(serde_json::from_value(json)?)
    }

    /// `invoice/<hash>` with the hash escaped as a single path segment
    fn invoice_url(&self, hash: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidRequest(format!("cannot extend {}", self.base_url)))?
            .pop_if_empty()
            .push("invoice")
            .push(hash);
        Ok(url)
    }

    // ==================== Account Endpoints ====================

    /// Get details of the authenticated account
    pub async fn get_account(&self) -> Result<Account, Error> {
        let json = self.get("me").await?;
        Ok(serde_json::from_value(json)?)
    }

    // ==================== Payment Endpoints ====================

    /// Pay a BOLT11 invoice
    pub async fn send_lightning_payment(&self, payreq: &str) -> Result<Payment, Error> {
        let request = SendLightningRequest {
            payreq: payreq.to_string(),
        };
        let json = self.post("payments", &request).await?;
        Ok(serde_json::from_value(json)?)
    }

    /// Send satoshis to another Coinos user
    pub async fn send_internal_payment(&self, amount: u64, username: &str) -> Result<Payment, Error> {
        let request = SendInternalRequest {
            amount,
            username: username.to_string(),
        };
        let json = self.post("send", &request).await?;
        Ok(serde_json::from_value(json)?)
    }

    /// Send satoshis to an on-chain address
    pub async fn send_bitcoin_payment(&self, amount: u64, address: &str) -> Result<Payment, Error> {
        let request = SendBitcoinRequest {
            amount,
            address: address.to_string(),
        };
        let json = self.post("bitcoin/send", &request).await?;
        Ok(serde_json::from_value(json)?)
    }

    /// List payment history
    pub async fn get_payments(&self, params: PaymentQueryParams) -> Result<PaymentsResponse, Error> {
        let json = self
            .get(&format!("payments{}", params.to_query_string()))
            .await?;
        Ok(serde_json::from_value(json)?)
    }
}
