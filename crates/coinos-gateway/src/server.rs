//! HTTP endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | POST | `/checkout/:order_id?key=<order_key>` | order key or admin token | Issue an invoice and a poll nonce |
//! | POST | `/coinos/check-payment` | nonce | Poll payment status |
//! | POST | `<webhook_path>` | HMAC signature | Coinos webhook, see [`crate::webhook`] |
//! | POST | `/orders` | admin token | Order intake from the store platform |
//! | GET | `/admin/test-connection` | admin token | Check Coinos credentials |
//!
//! JSON replies are wrapped as `{"success": bool, "data": ...}`. Failures carry
//! `{"message": "..."}` as data.
//!
//! Checkout hands out the poll nonce, so it needs the order key the store
//! platform supplied with the order. Store backends may use the admin token
//! instead.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ring::hmac;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, ErrorKind, GENERIC_PAYMENT_ERROR};
use crate::issuer::IssueOutcome;
use crate::nonce::CHECK_PAYMENT_ACTION;
use crate::order::Order;
use crate::record::PaymentRecord;
use crate::webhook::create_webhook_router;
use crate::CoinosGateway;

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded
    pub success: bool,
    /// Payload or failure details
    pub data: T,
}

/// Failure payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// Human readable message
    pub message: String,
}

/// Poll request sent by the checkout page
#[derive(Debug, Clone, Deserialize)]
pub struct CheckPaymentRequest {
    /// Order to check
    #[serde(deserialize_with = "deserialize_id")]
    pub order_id: String,
    /// Nonce handed out with the checkout
    pub nonce: String,
}

/// Checkout query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutQuery {
    /// Order key issued by the store platform
    pub key: Option<String>,
}

/// Checkout reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutResponse {
    /// Whether the order is already paid
    pub paid: bool,
    /// Invoice to display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<PaymentRecord>,
    /// Requested amount in BTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btc_amount: Option<f64>,
    /// Nonce for payment status polls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Suggested poll interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
}

/// Order intake reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAccepted {
    /// Order identifier
    pub order_id: String,
    /// Whether the order is paid
    pub paid: bool,
}

/// Connection test reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Result message
    pub message: String,
    /// Coinos username the key belongs to
    pub username: String,
}

/// Order ids may arrive as strings or numbers
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        String(String),
        Number(u64),
    }

    match Id::deserialize(deserializer)? {
        Id::String(s) => Ok(s),
        Id::Number(n) => Ok(n.to_string()),
    }
}

fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { success: true, data })).into_response()
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: MessageData {
                message: message.into(),
            },
        }),
    )
        .into_response()
}

fn error_status(e: &Error) -> StatusCode {
    match e.kind() {
        ErrorKind::Config => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Api => StatusCode::BAD_GATEWAY,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Message safe to show a payer
fn public_message(e: &Error) -> String {
    match e.kind() {
        ErrorKind::Config | ErrorKind::Internal => "Internal error".to_string(),
        ErrorKind::Api | ErrorKind::Validation | ErrorKind::NotFound => e.to_string(),
    }
}

/// Poll the payment status of an order
async fn check_payment(State(gateway): State<CoinosGateway>, body: Bytes) -> Response {
    let request: CheckPaymentRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("Invalid payment check request: {}", e);
            return failure(StatusCode::BAD_REQUEST, "Invalid request");
        }
    };

    if !gateway
        .nonces()
        .verify(CHECK_PAYMENT_ACTION, &request.order_id, &request.nonce)
    {
        warn!("Invalid nonce for order {}", request.order_id);
        return failure(StatusCode::FORBIDDEN, "Invalid nonce");
    }

    match gateway.engine().poll(&request.order_id).await {
        Ok(status) => success(status),
        Err(e) => {
            debug!("Payment check for order {} failed: {}", request.order_id, e);
            failure(error_status(&e), public_message(&e))
        }
    }
}

fn paid_checkout() -> Response {
    success(CheckoutResponse {
        paid: true,
        record: None,
        btc_amount: None,
        nonce: None,
        poll_interval_secs: None,
    })
}

/// Issue a fresh invoice for an order
async fn checkout(
    State(gateway): State<CoinosGateway>,
    Path(order_id): Path<String>,
    Query(query): Query<CheckoutQuery>,
    headers: HeaderMap,
) -> Response {
    let order = match gateway.orders().get_order(&order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => return failure(StatusCode::NOT_FOUND, "Order not found"),
        Err(e) => {
            error!("Could not load order {}: {}", order_id, e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };

    let key_matches = match (order.order_key.as_deref(), query.key.as_deref()) {
        (Some(expected), Some(candidate)) if !expected.is_empty() => {
            secret_matches(expected, candidate)
        }
        _ => false,
    };
    if !key_matches && !is_admin(gateway.config(), &headers) {
        warn!("Rejected checkout for order {}", order_id);
        return failure(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    if order.is_paid() {
        return paid_checkout();
    }

    match gateway.issuer().issue_invoice(&order).await {
        Ok(IssueOutcome::Paid) => paid_checkout(),
        Ok(IssueOutcome::Issued(record)) => success(CheckoutResponse {
            paid: false,
            btc_amount: Some(record.btc_amount()),
            record: Some(record),
            nonce: Some(gateway.nonces().create(CHECK_PAYMENT_ACTION, &order.id)),
            poll_interval_secs: Some(gateway.config().poll_interval_secs),
        }),
        Err(e) => failure(error_status(&e), GENERIC_PAYMENT_ERROR),
    }
}

/// Accept an order from the store platform
async fn put_order(State(gateway): State<CoinosGateway>, body: Bytes) -> Response {
    let order: Order = match serde_json::from_slice(&body) {
        Ok(o) => o,
        Err(e) => {
            warn!("Invalid order: {}", e);
            return failure(StatusCode::BAD_REQUEST, "Invalid order");
        }
    };

    if order.id.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Order id is required");
    }

    let order_id = order.id.clone();
    if let Err(e) = gateway.orders().put_order(order).await {
        error!("Could not store order {}: {}", order_id, e);
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
    }

    let paid = match gateway.orders().get_order(&order_id).await {
        Ok(order) => order.map(|o| o.is_paid()).unwrap_or_default(),
        Err(e) => {
            error!("Could not load order {}: {}", order_id, e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    };

    let paid = if paid {
        true
    } else {
        match gateway.issuer().prepare_checkout(&order_id).await {
            Ok(settled) => settled,
            Err(e) => {
                error!("Could not prepare checkout for order {}: {}", order_id, e);
                return failure(error_status(&e), public_message(&e));
            }
        }
    };

    success(OrderAccepted { order_id, paid })
}

/// Check the configured Coinos credentials
async fn test_connection(State(gateway): State<CoinosGateway>) -> Response {
    match gateway.test_api_connection().await {
        Ok(account) => success(ConnectionStatus {
            message: "Connection successful".to_string(),
            username: account.username,
        }),
        Err(e) => {
            warn!("Coinos connection test failed: {}", e);
            failure(error_status(&e), format!("Connection failed: {}", e))
        }
    }
}

/// Compare secrets through HMAC tags under a throwaway key
fn secret_matches(expected: &str, candidate: &str) -> bool {
    let secret: [u8; 32] = rand::random();
    let key = hmac::Key::new(hmac::HMAC_SHA256, &secret);
    let tag = hmac::sign(&key, expected.as_bytes());
    hmac::verify(&key, candidate.trim().as_bytes(), tag.as_ref()).is_ok()
}

/// Whether the request carries `Authorization: Bearer <admin_token>`
fn is_admin(config: &GatewayConfig, headers: &HeaderMap) -> bool {
    let Some(token) = config.admin_token.as_deref().filter(|t| !t.is_empty()) else {
        return false;
    };

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map_or(false, |candidate| secret_matches(token, candidate))
}

/// Middleware requiring the admin token
async fn require_admin(
    State(gateway): State<CoinosGateway>,
    request: Request<Body>,
    next: Next,
) -> Result<impl IntoResponse, Response> {
    if !is_admin(gateway.config(), request.headers()) {
        warn!("Rejected admin request to {}", request.uri().path());
        return Err(failure(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    Ok(next.run(request).await)
}

/// Create the gateway router
///
/// Admin routes are only mounted when an admin token is configured, and the
/// webhook only when it is enabled with a secret.
pub fn create_router(gateway: CoinosGateway) -> Router {
    let config = gateway.config().clone();

    let mut router = Router::new()
        .route("/checkout/:order_id", post(checkout))
        .route("/coinos/check-payment", post(check_payment))
        .with_state(gateway.clone());

    if config.admin_token.as_deref().map_or(false, |t| !t.is_empty()) {
        let admin = Router::new()
            .route("/orders", post(put_order))
            .route("/admin/test-connection", get(test_connection))
            .layer(middleware::from_fn_with_state(
                gateway.clone(),
                require_admin,
            ))
            .with_state(gateway.clone());
        router = router.merge(admin);
    } else {
        debug!("No admin token configured, admin routes disabled");
    }

    if config.webhook_enabled {
        match config.webhook_secret {
            Some(secret) if !secret.is_empty() => {
                router = router.merge(create_webhook_router(
                    &config.webhook_path,
                    gateway.engine().clone(),
                    secret,
                ));
            }
            _ => warn!("Webhook enabled without a secret, webhook route disabled"),
        }
    }

    router
}
