//! Coinos webhook endpoint
//!
//! Coinos calls the webhook URL attached to an invoice when it receives funds.
//! The payload is the invoice itself:
//!
//! ```json
//! {
//!   "hash": "invoice-hash",
//!   "amount": 200000,
//!   "received": 200000,
//!   "secret": "order_42",
//!   "currency": "USD"
//! }
//! ```
//!
//! # Signature Verification
//!
//! Deliveries must carry an `X-Webhook-Signature` header holding the hex
//! HMAC-SHA256 of the raw body under the configured webhook secret. Unsigned or
//! badly signed requests are rejected with 401 before the body is parsed.
//!
//! # Responses
//!
//! - 200: processed, including hashes that are not ours
//! - 400: malformed payload
//! - 401: missing or invalid signature
//! - 500: the order or record store failed, so Coinos should retry

use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use ring::hmac;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::ErrorKind;
use crate::reconcile::{ReconciliationEngine, WebhookEvent, WebhookOutcome};

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Largest accepted webhook body
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// State for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Engine applying deliveries
    pub engine: ReconciliationEngine,
    /// Key deliveries are signed with
    pub key: hmac::Key,
}

/// Query parameters on the callback URL
#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    /// Order the invoice was issued for
    pub order_id: Option<String>,
}

/// Why a delivery was refused before parsing
#[derive(Debug, Error)]
enum Rejection {
    #[error("missing {} header", SIGNATURE_HEADER)]
    MissingSignature,
    #[error("signature is not hex")]
    MalformedSignature,
    #[error("signature does not match body")]
    BadSignature,
    #[error("unreadable body: {0}")]
    Body(axum::Error),
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = match self {
            Rejection::Body(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, self.to_string()).into_response()
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn sign_body(body: &[u8], secret: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hex::encode(hmac::sign(&key, body).as_ref())
}

/// Check a delivery's signature header against its raw body
fn check_signature(headers: &HeaderMap, body: &[u8], key: &hmac::Key) -> Result<(), Rejection> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .ok_or(Rejection::MissingSignature)?;
    let tag = header
        .to_str()
        .ok()
        .and_then(|v| hex::decode(v.trim()).ok())
        .ok_or(Rejection::MalformedSignature)?;

    hmac::verify(key, body, &tag).map_err(|_| Rejection::BadSignature)
}

/// Buffer the body and refuse deliveries that are not signed with our key
async fn require_signature(
    State(state): State<WebhookState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let checked = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => check_signature(&parts.headers, &bytes, &state.key).map(|_| bytes),
        Err(e) => Err(Rejection::Body(e)),
    };

    match checked {
        Ok(bytes) => {
            debug!("Webhook signature verified");
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        Err(rejection) => {
            warn!("Rejected webhook delivery: {}", rejection);
            rejection.into_response()
        }
    }
}

/// Handle invoice webhook deliveries
async fn handle_invoice_webhook(
    State(state): State<WebhookState>,
    Query(query): Query<WebhookQuery>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            warn!("Failed to parse webhook event: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid webhook data");
        }
    };

    debug!(
        "Received invoice webhook: {} ({} sats)",
        event.hash, event.received
    );

    match state
        .engine
        .handle_webhook(&event, query.order_id.as_deref())
        .await
    {
        Ok(WebhookOutcome::Ignored) => (StatusCode::OK, "Ignored"),
        Ok(WebhookOutcome::Reconciled { .. }) => (StatusCode::OK, "OK"),
        Err(e) if e.kind() == ErrorKind::Validation => {
            warn!("Rejected webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid webhook data")
        }
        Err(e) => {
            error!("Failed to process webhook for invoice {}: {}", event.hash, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// Create an Axum router for Coinos invoice webhooks
///
/// The router handles POST requests to `endpoint`, verifies the signature and
/// hands the delivery to the reconciliation engine.
pub fn create_webhook_router(
    endpoint: &str,
    engine: ReconciliationEngine,
    secret: String,
) -> Router {
    let state = WebhookState {
        engine,
        key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
    };

    Router::new()
        .route(endpoint, post(handle_invoice_webhook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_signature,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tower::ServiceExt;

    use super::*;
    use crate::order::OrderStore;
    use crate::record::PaymentRecord;
    use crate::test_utils::{order, stores, MockProvider};

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_check_signature() {
        let key = hmac::Key::new(hmac::HMAC_SHA256, b"test_secret");
        let body = b"test body";
        let mut headers = HeaderMap::new();

        assert!(matches!(
            check_signature(&headers, body, &key),
            Err(Rejection::MissingSignature)
        ));

        headers.insert(SIGNATURE_HEADER, "not hex".parse().unwrap());
        assert!(matches!(
            check_signature(&headers, body, &key),
            Err(Rejection::MalformedSignature)
        ));

        let signature = sign_body(body, b"test_secret");
        headers.insert(SIGNATURE_HEADER, signature.parse().unwrap());
        assert!(check_signature(&headers, body, &key).is_ok());
        assert!(matches!(
            check_signature(&headers, b"wrong body", &key),
            Err(Rejection::BadSignature)
        ));
    }

    async fn setup() -> (Router, crate::order::MemoryOrderStore) {
        let (orders, records) = stores();
        orders.insert_order(order("42", 80.0));
        records
            .put(
                "42",
                &PaymentRecord {
                    invoice_hash: "h42".to_string(),
                    payment_text: "lnbc_h42".to_string(),
                    satoshis: 200_000,
                    usd_amount: 80.0,
                    currency: "USD".to_string(),
                    created_at: 1_700_000_000,
                },
            )
            .await
            .unwrap();

        let engine = ReconciliationEngine::new(
            Arc::new(orders.clone()),
            records,
            Some(Arc::new(MockProvider::new())),
        );
        let router = create_webhook_router("/coinos/webhook", engine, SECRET.to_string());
        (router, orders)
    }

    fn request(body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/coinos/webhook?order_id=42")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn signed(body: &str) -> Request<Body> {
        request(body, Some(sign_body(body.as_bytes(), SECRET.as_bytes())))
    }

    #[tokio::test]
    async fn test_paid_webhook_marks_order() {
        let (router, orders) = setup().await;

        let response = router
            .oneshot(signed(r#"{"hash":"h42","received":200000}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(orders.get_order("42").await.unwrap().unwrap().is_paid());
        assert_eq!(
            orders.notes("42"),
            vec!["Lightning payment completed via Coinos webhook"]
        );
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected() {
        let (router, orders) = setup().await;
        let body = r#"{"hash":"h42","received":200000}"#;

        let response = router
            .clone()
            .oneshot(request(body, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let forged = sign_body(body.as_bytes(), b"wrong secret");
        let response = router.oneshot(request(body, Some(forged))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert!(!orders.get_order("42").await.unwrap().unwrap().is_paid());
    }

    #[tokio::test]
    async fn test_malformed_webhook_is_bad_request() {
        let (router, orders) = setup().await;

        let response = router
            .clone()
            .oneshot(signed(r#"{"received":200000}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .clone()
            .oneshot(signed(r#"{"hash":"","received":200000}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router.oneshot(signed("not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(!orders.get_order("42").await.unwrap().unwrap().is_paid());
    }

    #[tokio::test]
    async fn test_unknown_hash_is_accepted() {
        let (router, orders) = setup().await;

        let response = router
            .oneshot(signed(r#"{"hash":"someone-else","received":5}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(orders.notes("42").is_empty());
    }
}
