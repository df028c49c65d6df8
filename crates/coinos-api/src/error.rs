//! Coinos API error types
//!
//! # Error Handling
//!
//! The Coinos API uses standard HTTP response codes:
//! - 2xx: Success
//! - 4xx: Client errors (bad token, unknown invoice, invalid amount, etc.)
//! - 5xx: Server errors
//!
//! Error bodies are not versioned. Depending on the endpoint they look like
//! `{"message": "..."}`, `{"error": "..."}` or plain text. [`CoinosApiError`]
//! prefers `message`, then `error`, and otherwise falls back to a generic
//! `API Error: <status>` message.
//!
//! Error messages are for operators only. Do not display them to payers.

use serde::Deserialize;
use thiserror::Error;

/// Coinos API error
#[derive(Debug, Error)]
pub enum Error {
    /// Resource not found (404)
    #[error("Not found")]
    NotFound,

    /// Invalid URL format
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request rejected before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Coinos API returned an error response
    #[error("Coinos API error: {0}")]
    Api(#[from] CoinosApiError),
}

impl Error {
    /// Check if this error is transient and the operation may succeed later
    ///
    /// Transport failures (timeouts, refused connections) and provider-side
    /// errors are retryable. Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Api(e) => e.is_retryable(),
            Error::NotFound | Error::InvalidUrl(_) | Error::InvalidRequest(_) | Error::Json(_) => {
                false
            }
        }
    }

    /// HTTP status code reported by the provider, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::NotFound => Some(404),
            Error::Api(e) => Some(e.status),
            Error::Reqwest(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Error response returned by the Coinos API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CoinosApiError {
    /// HTTP status code
    pub status: u16,
    /// Provider supplied message, or a generic status message
    pub message: String,
    /// Raw response body for logging
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl CoinosApiError {
    /// Build an error from a non-2xx response
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorBody>(body).ok();

        let message = parsed
            .and_then(|b| {
                b.message
                    .filter(|m| !m.is_empty())
                    .or(b.error.filter(|e| !e.is_empty()))
            })
            .unwrap_or_else(|| format!("API Error: {}", status));

        Self {
            status,
            message,
            body: body.to_string(),
        }
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a rate limit error
    pub fn is_rate_limit_error(&self) -> bool {
        self.status == 429
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.is_server_error() || self.is_rate_limit_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_message_field() {
        let err = CoinosApiError::from_response(400, r#"{"message":"amount too low","error":"x"}"#);
        assert_eq!(err.message, "amount too low");
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_falls_back_to_error_field() {
        let err = CoinosApiError::from_response(401, r#"{"error":"unauthorized"}"#);
        assert_eq!(err.message, "unauthorized");
    }

    #[test]
    fn test_generic_message_for_plain_text() {
        let err = CoinosApiError::from_response(502, "Bad Gateway");
        assert_eq!(err.message, "API Error: 502");
        assert_eq!(err.body, "Bad Gateway");
        assert!(err.is_server_error());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_empty_message_is_ignored() {
        let err = CoinosApiError::from_response(500, r#"{"message":""}"#);
        assert_eq!(err.message, "API Error: 500");
    }

    #[test]
    fn test_error_status() {
        assert_eq!(Error::NotFound.status(), Some(404));
        let err = Error::Api(CoinosApiError::from_response(429, "{}"));
        assert_eq!(err.status(), Some(429));
        assert!(err.is_retryable());
    }
}
