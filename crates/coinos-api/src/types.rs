//! Coinos API type definitions
//!
//! Request and response types for the Coinos REST API.
//!
//! ## Amount Handling
//!
//! Invoice amounts are integers in satoshis unless the request sets `fiat`, in
//! which case `amount` is a decimal in `currency` and Coinos converts it with its
//! own rate. Responses always report satoshis. Some fields occasionally arrive as
//! strings, so they go through [`parse_u64_lenient`].
//!
//! ## Invoice Status
//!
//! Coinos has no explicit invoice state. An invoice counts as paid once its
//! `received` amount is positive.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Parse a non-negative integer from a number, a decimal or a string
pub fn parse_u64_lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        String(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Int(n)) => Ok(n),
        Some(Raw::Float(f)) => Ok(f.max(0.0).round() as u64),
        Some(Raw::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(0);
            }
            match s.parse::<u64>() {
                Ok(n) => Ok(n),
                Err(_) => s
                    .parse::<f64>()
                    .map(|f| f.max(0.0).round() as u64)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}

/// Invoice type
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceType {
    /// BOLT11 Lightning invoice
    Lightning,
    /// On-chain bitcoin address
    Bitcoin,
    /// Any other type Coinos may report
    #[serde(other)]
    Unknown,
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceType::Lightning => write!(f, "lightning"),
            InvoiceType::Bitcoin => write!(f, "bitcoin"),
            InvoiceType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Requested invoice amount
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InvoiceAmount {
    /// Amount in satoshis
    Sats(u64),
    /// Amount in the invoice currency, converted by Coinos
    Fiat(f64),
}

/// Invoice fields sent to `POST /invoice`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewInvoice {
    /// Amount, in satoshis or fiat depending on `fiat`
    pub amount: InvoiceAmount,
    /// Invoice type
    #[serde(rename = "type")]
    pub invoice_type: InvoiceType,
    /// URL Coinos calls when the invoice receives funds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    /// Secret echoed back with webhook deliveries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Currency code for fiat amounts and display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Whether `amount` is fiat that Coinos must convert to satoshis
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fiat: bool,
    /// Invoice description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Create invoice request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceRequest {
    /// Invoice fields
    pub invoice: NewInvoice,
}

impl InvoiceRequest {
    fn new(amount: InvoiceAmount, invoice_type: InvoiceType) -> Self {
        Self {
            invoice: NewInvoice {
                amount,
                invoice_type,
                webhook: None,
                secret: None,
                currency: None,
                fiat: matches!(amount, InvoiceAmount::Fiat(_)),
                memo: None,
            },
        }
    }

    /// Lightning invoice for an exact satoshi amount
    pub fn lightning_sats(sats: u64) -> Self {
        Self::new(InvoiceAmount::Sats(sats), InvoiceType::Lightning)
    }

    /// Lightning invoice for a fiat amount converted by Coinos
    pub fn lightning_fiat(amount: f64, currency: impl Into<String>) -> Self {
        Self::new(InvoiceAmount::Fiat(amount), InvoiceType::Lightning).currency(currency)
    }

    /// On-chain invoice for an exact satoshi amount
    pub fn bitcoin_sats(sats: u64) -> Self {
        Self::new(InvoiceAmount::Sats(sats), InvoiceType::Bitcoin)
    }

    /// Set the webhook URL
    pub fn webhook(mut self, url: impl Into<String>) -> Self {
        self.invoice.webhook = Some(url.into());
        self
    }

    /// Set the webhook secret
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.invoice.secret = Some(secret.into());
        self
    }

    /// Set the currency code
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.invoice.currency = Some(currency.into());
        self
    }

    /// Set the invoice memo
    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.invoice.memo = Some(memo.into());
        self
    }
}

/// Invoice returned by `POST /invoice` and `GET /invoice/{hash}`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Invoice {
    /// Coinos internal id
    #[serde(default)]
    pub id: Option<String>,
    /// Payment hash (lightning) or address (bitcoin)
    pub hash: String,
    /// Encoded payable string (BOLT11 or address)
    #[serde(default)]
    pub text: String,
    /// Requested amount in satoshis
    #[serde(default, deserialize_with = "parse_u64_lenient")]
    pub amount: u64,
    /// Amount received so far in satoshis
    #[serde(default, deserialize_with = "parse_u64_lenient")]
    pub received: u64,
    /// Currency the invoice was priced in
    #[serde(default)]
    pub currency: Option<String>,
    /// BTC price in `currency` used by Coinos
    #[serde(default)]
    pub rate: Option<f64>,
    /// Invoice type
    #[serde(default, rename = "type")]
    pub invoice_type: Option<InvoiceType>,
    /// Invoice description
    #[serde(default)]
    pub memo: Option<String>,
    /// Creation time (unix milliseconds)
    #[serde(default)]
    pub created: Option<i64>,
}

impl Invoice {
    /// Whether any funds have been received
    pub fn is_paid(&self) -> bool {
        self.received > 0
    }
}

/// Account returned by `GET /me`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Account {
    /// Account id
    #[serde(default)]
    pub id: Option<String>,
    /// Username
    #[serde(default)]
    pub username: String,
    /// Display currency
    #[serde(default)]
    pub currency: Option<String>,
    /// Balance in satoshis
    #[serde(default)]
    pub balance: i64,
}

/// Payment entry returned by the payment endpoints
///
/// Incoming payments have a positive `amount`, outgoing ones a negative one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Payment {
    /// Payment id
    #[serde(default)]
    pub id: Option<String>,
    /// Payment hash or transaction id
    #[serde(default)]
    pub hash: Option<String>,
    /// Signed amount in satoshis
    #[serde(default)]
    pub amount: i64,
    /// Fee paid in satoshis
    #[serde(default)]
    pub fee: i64,
    /// Payment memo
    #[serde(default)]
    pub memo: Option<String>,
    /// Payment type (lightning, bitcoin, internal, ...)
    #[serde(default, rename = "type")]
    pub payment_type: Option<String>,
    /// Whether the payment is confirmed
    #[serde(default)]
    pub confirmed: Option<bool>,
    /// Creation time (unix milliseconds)
    #[serde(default)]
    pub created: Option<i64>,
}

/// Payment history page returned by `GET /payments`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PaymentsResponse {
    /// Payments in this page
    #[serde(default)]
    pub payments: Vec<Payment>,
    /// Total number of payments matching the query
    #[serde(default)]
    pub count: u64,
}

/// Pay a BOLT11 invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendLightningRequest {
    /// BOLT11 payment request
    pub payreq: String,
}

/// Send to another Coinos user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendInternalRequest {
    /// Amount in satoshis
    pub amount: u64,
    /// Recipient username
    pub username: String,
}

/// Send on-chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendBitcoinRequest {
    /// Amount in satoshis
    pub amount: u64,
    /// Destination address
    pub address: String,
}

/// Query parameters for `GET /payments`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentQueryParams {
    start: Option<i64>,
    end: Option<i64>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl PaymentQueryParams {
    /// Create new empty query params
    pub fn new() -> Self {
        Self::default()
    }

    /// Only payments created at or after this unix timestamp (ms)
    pub fn start(mut self, start: i64) -> Self {
        self.start = Some(start);
        self
    }

    /// Only payments created before this unix timestamp (ms)
    pub fn end(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    /// Maximum number of results
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Number of results to skip
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Convert to a query string, including the leading `?`
    pub fn to_query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());

        if let Some(start) = self.start {
            serializer.append_pair("start", &start.to_string());
        }
        if let Some(end) = self.end {
            serializer.append_pair("end", &end.to_string());
        }
        if let Some(limit) = self.limit {
            serializer.append_pair("limit", &limit.to_string());
        }
        if let Some(offset) = self.offset {
            serializer.append_pair("offset", &offset.to_string());
        }

        let query = serializer.finish();
        if query.is_empty() {
            String::new()
        } else {
            format!("?{}", query)
        }
    }
}
