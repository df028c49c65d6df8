//! Utility functions and constants for the Coinos gateway

use std::time::{SystemTime, UNIX_EPOCH};

/// KV Store namespace for gateway data
pub const COINOS_KV_PRIMARY_NAMESPACE: &str = "coinos_gateway";
/// KV Store secondary namespace for payment records, keyed by order id
pub const COINOS_KV_RECORD_NAMESPACE: &str = "payment_records";
/// KV Store secondary namespace for the invoice hash to order id index
pub const COINOS_KV_HASH_NAMESPACE: &str = "invoice_hashes";

/// Satoshis per bitcoin
pub const SATS_PER_BTC: f64 = 100_000_000.0;

/// Current unix time in seconds
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Convert a fiat amount to satoshis at `btc_price` fiat per BTC
pub fn fiat_to_sats(amount: f64, btc_price: f64) -> u64 {
    if btc_price <= 0.0 || amount <= 0.0 {
        return 0;
    }
    (amount / btc_price * SATS_PER_BTC).round() as u64
}
