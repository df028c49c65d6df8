//! Checkout nonces
//!
//! A nonce is an HMAC-SHA256 tag over `action|order_id|tick`, where the tick
//! advances every half lifetime. A nonce verifies during the tick it was made
//! in and the one after, so it lives between half and one full lifetime.

use ring::hmac;
use tracing::debug;

use crate::util::unix_time;

/// Nonce action for payment status polling
pub const CHECK_PAYMENT_ACTION: &str = "coinos_check_payment";

/// Issues and verifies order-bound nonces
#[derive(Clone)]
pub struct NonceIssuer {
    key: hmac::Key,
    lifetime_secs: u64,
}

impl std::fmt::Debug for NonceIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceIssuer")
            .field("lifetime_secs", &self.lifetime_secs)
            .finish_non_exhaustive()
    }
}

impl NonceIssuer {
    /// Create an issuer keyed with `secret`
    pub fn new(secret: &[u8], lifetime_secs: u64) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            lifetime_secs: lifetime_secs.max(2),
        }
    }

    /// Create an issuer with a random per-process secret
    pub fn random(lifetime_secs: u64) -> Self {
        let secret: [u8; 32] = rand::random();
        Self::new(&secret, lifetime_secs)
    }

    fn tick(&self, now: u64) -> u64 {
        now / (self.lifetime_secs / 2)
    }

    fn message(action: &str, order_id: &str, tick: u64) -> String {
        format!("{}|{}|{}", action, order_id, tick)
    }

    /// Create a nonce for `order_id`
    pub fn create(&self, action: &str, order_id: &str) -> String {
        self.create_at(action, order_id, unix_time())
    }

    /// Create a nonce as of unix time `now`
    pub fn create_at(&self, action: &str, order_id: &str, now: u64) -> String {
        let message = Self::message(action, order_id, self.tick(now));
        hex::encode(hmac::sign(&self.key, message.as_bytes()).as_ref())
    }

    /// Check a nonce for `order_id`
    pub fn verify(&self, action: &str, order_id: &str, nonce: &str) -> bool {
        self.verify_at(action, order_id, nonce, unix_time())
    }

    /// Check a nonce as of unix time `now`
    pub fn verify_at(&self, action: &str, order_id: &str, nonce: &str, now: u64) -> bool {
        let Ok(bytes) = hex::decode(nonce) else {
            debug!("Nonce is not hex");
            return false;
        };

        let tick = self.tick(now);
        [Some(tick), tick.checked_sub(1)]
            .into_iter()
            .flatten()
            .any(|tick| {
                let message = Self::message(action, order_id, tick);
                hmac::verify(&self.key, message.as_bytes(), &bytes).is_ok()
            })
    }
}
