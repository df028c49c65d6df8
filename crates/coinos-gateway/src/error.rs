//! Error types for the Coinos gateway

use thiserror::Error;

use crate::database;

/// Message shown to payers whenever invoice creation fails
pub const GENERIC_PAYMENT_ERROR: &str = "Error creating payment. Please contact support.";

/// Coinos gateway error
#[derive(Debug, Error)]
pub enum Error {
    /// No API key configured
    #[error("Coinos API key is not configured")]
    MissingApiKey,

    /// API client could not be built
    #[error("Coinos API client not initialized")]
    ClientNotInitialized,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Order currency cannot be converted under the configured policy
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Coinos API error
    #[error("API error: {0}")]
    CoinosApi(#[from] coinos_api::Error),

    /// Rejected input (malformed payload, bad nonce)
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Order unknown to the store
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Order has no active payment record
    #[error("No payment data found")]
    PaymentRecordNotFound,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] database::Error),
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misconfiguration, shown to admins only
    Config,
    /// Provider failure, retried by the polling cadence
    Api,
    /// Rejected at the boundary
    Validation,
    /// Benign lookup miss
    NotFound,
    /// Store or serialization failure
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingApiKey
            | Error::ClientNotInitialized
            | Error::Config(_)
            | Error::UnsupportedCurrency(_) => ErrorKind::Config,
            Error::CoinosApi(_) => ErrorKind::Api,
            Error::Validation(_) => ErrorKind::Validation,
            Error::OrderNotFound(_) | Error::PaymentRecordNotFound => ErrorKind::NotFound,
            Error::Database(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::CoinosApi(e) => e.is_retryable(),
            _ => false,
        }
    }
}
